//! LNMT Auth - credential verification, session tokens, lockout, audit.
//!
//! Every operator-facing surface (CLI, REST) authenticates through this
//! crate. Passwords are stored as salted argon2id verifiers and never
//! logged; session tokens are opaque 32-byte random values; every
//! authentication decision writes an audit row.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod engine;
mod error;
mod storage;
mod types;

pub use engine::{AuthEngine, AuthPolicy};
pub use error::{AuthError, AuthResult};
pub use storage::AuthStorage;
pub use types::{Role, Session, SessionToken, User, ValidatedSession};
