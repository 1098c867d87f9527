//! LNMT API - the REST surface as a transport-agnostic service.
//!
//! [`ApiService`] owns handles to the four subsystem engines and exposes
//! one typed method per endpoint; the HTTP layer (out of scope here) is
//! a thin dispatcher that deserializes the request body, calls the
//! method with the caller's bearer token, and serializes the
//! [`Envelope`]. Every non-login operation authenticates the token and
//! checks the caller's role before touching a subsystem.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod dto;
mod error;
mod service;

pub use dto::{
    CreateJobRequest, DeviceHistoryResponse, Envelope, HealthResponse, LoginRequest,
    LoginResponse, UserDto,
};
pub use error::{ApiError, ApiErrorCode, ApiResult};
pub use service::ApiService;
