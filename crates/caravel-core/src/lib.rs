//! # caravel-core
//!
//! Core lifecycle layer for the Caravel daemon: a local service that
//! sits between desktop/CLI clients and an externally-installed colima
//! VM, imposing a state machine, serialized operations, timeouts, and
//! structured errors on top of a tool whose only interface is text
//! output and exit codes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                   caravel-core                    │
//! │  ┌──────────────┐  ┌───────────────┐              │
//! │  │ Orchestrator │  │ ConfigManager │──▶ policy    │
//! │  └──────┬───────┘  └───────────────┘              │
//! │         │                                         │
//! │         ▼                                         │
//! │  ┌──────────────┐       ┌──────────┐              │
//! │  │  ColimaCli   │──────▶│ Envelope │──▶ colima(1) │
//! │  └──────────────┘       └──────────┘              │
//! └───────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod colima;
pub mod config;
pub mod error;
pub mod exec;
pub mod orchestrator;
pub mod policy;

pub use colima::{
    AdapterTimeouts, ColimaCli, DynHypervisor, Hypervisor, StatusSnapshot, VersionInfo,
    DEFAULT_PROFILE,
};
pub use config::{
    ColimaConfig, ConfigManager, ConfigPatch, ContainerRuntime, DaemonSettings, LogLevel,
    PathSettings, VmSettings,
};
pub use error::{CoreError, Result};
pub use exec::{Envelope, ExecError, ExecOptions, ExecResult, Redactor};
pub use orchestrator::{
    LifecycleOperation, LifecycleRequest, Orchestrator, VmState, VmStatus,
};
pub use policy::{decide, RestartDecision};
