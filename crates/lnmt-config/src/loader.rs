//! Config file discovery, layered merging, and env overrides.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Load the configuration with layered precedence.
///
/// Order (later wins): embedded defaults, `/etc/lnmt/config.toml`,
/// `~/.lnmt/config.toml`, `override_path`, `LNMT_*` environment
/// variables.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any present file is malformed or the
/// merged result fails validation. Absent files are skipped.
pub fn load(override_path: Option<&Path>) -> ConfigResult<Config> {
    let mut merged: toml::Value = parse(DEFAULTS_TOML, "<embedded defaults>")?;

    let mut layers: Vec<PathBuf> = vec![PathBuf::from("/etc/lnmt/config.toml")];
    if let Some(home) = std::env::var_os("HOME") {
        layers.push(PathBuf::from(home).join(".lnmt").join("config.toml"));
    }
    if let Some(path) = override_path {
        layers.push(path.to_path_buf());
    }

    for path in layers {
        let is_explicit = override_path == Some(path.as_path());
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let overlay = parse(&text, &path.display().to_string())?;
                deep_merge(&mut merged, overlay);
                info!(path = %path.display(), "loaded config layer");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !is_explicit => {}
            Err(err) => {
                // An explicitly requested file must exist; implicit layers
                // may fail only for reasons other than absence.
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    detail: err.to_string(),
                });
            }
        }
    }

    apply_env_overrides(&mut merged, std::env::vars());

    let config: Config = merged
        .try_into()
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    validate::validate(&config)?;
    Ok(config)
}

/// Parse a single TOML document over the embedded defaults. For tests and
/// for `schedctl validate`.
///
/// # Errors
///
/// Returns a [`ConfigError`] on parse or validation failure.
pub fn load_from_str(text: &str) -> ConfigResult<Config> {
    let mut merged: toml::Value = parse(DEFAULTS_TOML, "<embedded defaults>")?;
    deep_merge(&mut merged, parse(text, "<inline>")?);
    let config: Config = merged
        .try_into()
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    validate::validate(&config)?;
    Ok(config)
}

fn parse(text: &str, path: &str) -> ConfigResult<toml::Value> {
    toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_owned(),
        detail: e.to_string(),
    })
}

/// Recursively merge `overlay` into `base`. Tables merge key-by-key;
/// everything else replaces.
fn deep_merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Apply `LNMT_<SECTION>_<KEY>` overrides, e.g. `LNMT_SCHEDULER_MAX_WORKERS=8`.
///
/// The first underscore-separated segment names the section; the rest is
/// the key. Values parse as integers when they look like integers,
/// otherwise as strings.
fn apply_env_overrides(merged: &mut toml::Value, vars: impl Iterator<Item = (String, String)>) {
    let Some(table) = merged.as_table_mut() else {
        return;
    };
    for (name, value) in vars {
        let Some(rest) = name.strip_prefix("LNMT_") else {
            continue;
        };
        let Some((section, key)) = rest.split_once('_') else {
            continue;
        };
        let section = section.to_ascii_lowercase();
        let key = key.to_ascii_lowercase();
        let Some(section_table) = table.get_mut(&section).and_then(toml::Value::as_table_mut)
        else {
            continue;
        };
        let parsed = value
            .parse::<i64>()
            .map_or_else(|_| toml::Value::String(value.clone()), toml::Value::Integer);
        section_table.insert(key, parsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_and_validate() {
        let config = load_from_str("").unwrap();
        assert_eq!(config.scheduler.max_workers, 5);
    }

    #[test]
    fn test_overlay_wins_key_by_key() {
        let config = load_from_str("[scheduler]\nmax_workers = 9\n").unwrap();
        assert_eq!(config.scheduler.max_workers, 9);
        // Untouched keys keep their defaults.
        assert_eq!(config.scheduler.history_retention_days, 30);
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(load_from_str("[scheduler\nmax_workers = 9").is_err());
    }

    #[test]
    fn test_env_override_applies() {
        let mut merged: toml::Value = toml::from_str(DEFAULTS_TOML).unwrap();
        let vars = vec![
            ("LNMT_SCHEDULER_MAX_WORKERS".to_owned(), "12".to_owned()),
            ("LNMT_TRACKER_LEASE_FILE".to_owned(), "/tmp/leases".to_owned()),
            ("UNRELATED".to_owned(), "x".to_owned()),
        ];
        apply_env_overrides(&mut merged, vars.into_iter());
        let config: Config = merged.try_into().unwrap();
        assert_eq!(config.scheduler.max_workers, 12);
        assert_eq!(config.tracker.lease_file, "/tmp/leases");
    }
}
