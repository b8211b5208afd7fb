//! # caravel-api
//!
//! Boundary contract between the Caravel daemon and its clients
//! (desktop UI, CLI). Defines the typed request/response payloads and
//! the typed wire error; deliberately transport-agnostic so the same
//! contract serves REST today and any future IPC channel.
//!
//! ```text
//! ┌──────────┐   typed payloads   ┌────────────────┐
//! │ UI / CLI │◀──────────────────▶│ caravel-daemon │
//! └──────────┘    (this crate)    └───────┬────────┘
//!                                         ▼
//!                                   caravel-core
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod types;

pub use error::{ApiError, ErrorBody, Result};
pub use types::{
    ConfigResponse, OperationResponse, StartRequest, StatusResponse, UpdateConfigResponse,
    VersionResponse,
};
