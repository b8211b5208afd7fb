//! Request and response payloads for the daemon API.
//!
//! These are the boundary contract consumed by desktop and CLI clients;
//! they reuse the core's serializable types where those are already
//! wire-shaped (snapshots, configs, patches) and flatten the rest.

use caravel_core::{
    ColimaConfig, ConfigPatch, RestartDecision, StatusSnapshot, VersionInfo, VmState, VmStatus,
};
use serde::{Deserialize, Serialize};

/// `GetStatus` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// State name (`running`, `stopped`, `error`, ...).
    pub state: String,
    /// Failure reason, present only in the `error` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Fresh hypervisor snapshot, when one was obtained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<StatusSnapshot>,
    /// Advisory: persisted config changes await an explicit restart.
    pub restart_required: bool,
}

impl From<VmStatus> for StatusResponse {
    fn from(status: VmStatus) -> Self {
        let reason = match &status.state {
            VmState::Error(reason) => Some(reason.clone()),
            _ => None,
        };
        Self {
            state: status.state.as_str().to_string(),
            reason,
            snapshot: status.snapshot,
            restart_required: status.restart_required,
        }
    }
}

/// `Start` request body. The optional patch is applied over the
/// persisted config for this boot only; it is not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    /// Per-boot configuration override.
    pub config: Option<ConfigPatch>,
}

/// Response for `Start`, `Stop`, and `Restart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    /// State after the operation completed.
    pub state: String,
}

impl From<VmState> for OperationResponse {
    fn from(state: VmState) -> Self {
        Self { state: state.as_str().to_string() }
    }
}

/// `GetConfig` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    /// The current persisted configuration (defaults filled in).
    pub config: ColimaConfig,
}

/// `UpdateConfig` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfigResponse {
    /// True if the change only takes effect after a VM restart.
    pub restart_required: bool,
    /// Every changed field, in declaration order.
    pub changed_fields: Vec<String>,
}

impl From<RestartDecision> for UpdateConfigResponse {
    fn from(decision: RestartDecision) -> Self {
        Self {
            restart_required: decision.restart_required,
            changed_fields: decision
                .changed_fields
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// `GetVersion` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    /// Daemon version.
    pub daemon: String,
    /// Hypervisor version as reported by colima.
    pub colima: VersionInfo,
}
