//! LNMT Events - cross-subsystem signalling.
//!
//! Subsystems communicate by entity read-back through the store or by
//! messages on this bus; they never share mutable in-memory state. The
//! bus is a bounded broadcast channel: slow receivers skip, they do not
//! apply back-pressure to publishers.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bus;
mod event;

pub use bus::{EventBus, EventReceiver, DEFAULT_CHANNEL_CAPACITY};
pub use event::LnmtEvent;
