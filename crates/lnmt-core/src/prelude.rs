//! Convenience re-exports for downstream crates.

pub use crate::error::{ErrorClass, StableCoded};
pub use crate::mac::MacAddr;
pub use crate::retry::{retry, RetryConfig};
pub use crate::types::{JobId, ProbeId, RunId, UserId, VlanId};
