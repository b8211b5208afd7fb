//! # caravel-daemon
//!
//! Daemon binary crate. The REST surface lives in [`server`] so
//! integration tests can drive the router without binding a socket.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod server;
