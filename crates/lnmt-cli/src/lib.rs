//! Shared plumbing for the LNMT operator tools.
//!
//! Each binary parses its own subcommands; this crate opens the store
//! the daemon uses, constructs engines over it, and renders results as
//! a table or JSON. Exit codes: 0 success, 1 operational error, 2 usage
//! error (clap's own convention).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod context;
pub mod format;

pub use context::CliContext;
pub use format::{emit, render_table, OutputFormat};

/// Translate a command outcome into the documented exit codes.
pub fn finish(result: anyhow::Result<()>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
