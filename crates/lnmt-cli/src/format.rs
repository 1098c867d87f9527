//! Table and JSON output.

use std::str::FromStr;

use colored::Colorize;

/// Output format selected by `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Fixed-width columns for humans.
    #[default]
    Table,
    /// Pretty JSON for scripts.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format: {other} (expected table|json)")),
        }
    }
}

/// Render rows as fixed-width columns with a bold header.
#[must_use]
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if index < widths.len() {
                widths[index] = widths[index].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    for (index, header) in headers.iter().enumerate() {
        let padded = format!("{:<width$}  ", header, width = widths[index]);
        out.push_str(&padded.bold().to_string());
    }
    out.push('\n');
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            let width = widths.get(index).copied().unwrap_or(cell.len());
            out.push_str(&format!("{cell:<width$}  "));
        }
        out.push('\n');
    }
    out
}

/// Print `value` as a table (via the provided renderer) or as JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn emit<T: serde::Serialize>(
    format: OutputFormat,
    value: &T,
    table: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => print!("{}", table(value)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_table_pads_columns() {
        colored::control::set_override(false);
        let out = render_table(
            &["ID", "NAME"],
            &[
                vec!["a".to_owned(), "longer-name".to_owned()],
                vec!["bbbb".to_owned(), "x".to_owned()],
            ],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("a     "));
        assert!(lines[2].starts_with("bbbb  "));
    }
}
