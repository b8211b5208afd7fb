//! Lifecycle orchestration.
//!
//! The orchestrator owns the daemon's view of the VM state and
//! serializes every state-changing operation through one exclusive
//! lock. The external VM is the source of truth: the in-memory state is
//! a cache reconciled by explicit status queries, never trusted across
//! long gaps. Mutating requests that arrive while an operation is in
//! flight are rejected immediately with [`CoreError::Busy`] rather than
//! queued; status queries are read-only and never blocked.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::colima::{DynHypervisor, StatusSnapshot, VersionInfo};
use crate::config::{ColimaConfig, ConfigManager, ConfigPatch};
use crate::error::{CoreError, Result};
use crate::policy::RestartDecision;

// =============================================================================
// State machine types
// =============================================================================

/// VM lifecycle state, owned exclusively by the orchestrator.
///
/// Mutated only as the result of a completed or failed lifecycle
/// operation, never optimistically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    /// The colima executable is missing from the host.
    NotInstalled,
    /// VM exists (or has never been created) and is not running.
    Stopped,
    /// A start operation is in flight.
    Starting,
    /// VM is running.
    Running,
    /// A stop operation is in flight.
    Stopping,
    /// The last operation failed; recoverable only via a status requery.
    Error(String),
    /// Initial state, and the fallback when a status query itself fails.
    Unknown,
}

impl VmState {
    /// Returns the state name for logging and API payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error(_) => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Lifecycle verbs accepted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOperation {
    Start,
    Stop,
    Restart,
    Status,
}

impl LifecycleOperation {
    /// Returns the verb name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Status => "status",
        }
    }
}

/// One inbound lifecycle call. Immutable, discarded when the call
/// completes; exists so every log line for an operation carries the
/// same correlation id.
#[derive(Debug, Clone)]
pub struct LifecycleRequest {
    /// Requested verb.
    pub operation: LifecycleOperation,
    /// When the request was accepted.
    pub requested_at: DateTime<Utc>,
    /// Correlation id for log lines belonging to this call.
    pub correlation_id: Uuid,
}

impl LifecycleRequest {
    /// Creates a request with a fresh correlation id.
    #[must_use]
    pub fn new(operation: LifecycleOperation) -> Self {
        Self {
            operation,
            requested_at: Utc::now(),
            correlation_id: Uuid::new_v4(),
        }
    }
}

/// Authoritative status returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct VmStatus {
    /// Current state after reconciliation with the hypervisor.
    pub state: VmState,
    /// Fresh snapshot from the hypervisor, when one was obtained.
    pub snapshot: Option<StatusSnapshot>,
    /// Advisory flag: a persisted config change only takes effect after
    /// an explicit restart.
    pub restart_required: bool,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Serializes lifecycle operations against the one VM this daemon
/// manages, and owns the current [`VmState`].
pub struct Orchestrator {
    hypervisor: DynHypervisor,
    config: Arc<ConfigManager>,
    state: RwLock<VmState>,
    /// Exclusive lock for mutating operations. `try_lock` only: a held
    /// lock means callers get `Busy` immediately, never a queue.
    op_lock: Mutex<()>,
    restart_required: AtomicBool,
}

impl Orchestrator {
    /// Creates an orchestrator in the `Unknown` state.
    #[must_use]
    pub fn new(hypervisor: DynHypervisor, config: Arc<ConfigManager>) -> Self {
        Self {
            hypervisor,
            config,
            state: RwLock::new(VmState::Unknown),
            op_lock: Mutex::new(()),
            restart_required: AtomicBool::new(false),
        }
    }

    /// Returns the cached state without touching the hypervisor.
    pub async fn current_state(&self) -> VmState {
        self.state.read().await.clone()
    }

    /// Returns the configuration manager.
    #[must_use]
    pub fn config_manager(&self) -> &ConfigManager {
        &self.config
    }

    async fn set_state(&self, next: VmState) {
        let mut state = self.state.write().await;
        if *state != next {
            tracing::info!(from = state.as_str(), to = next.as_str(), "state transition");
        }
        *state = next;
    }

    /// Queries the hypervisor and reconciles the cached state.
    ///
    /// Never takes the operation lock: status is read-only against the
    /// external tool and must stay available while a slow start/stop is
    /// in flight. This is also the only way out of the `Error` state.
    ///
    /// # Errors
    ///
    /// Propagates hypervisor failures other than a missing executable;
    /// on failure the cached state falls back to `Unknown`.
    pub async fn status(&self) -> Result<VmStatus> {
        let request = LifecycleRequest::new(LifecycleOperation::Status);
        tracing::debug!(correlation_id = %request.correlation_id, "status requested");

        let restart_required = self.restart_required.load(Ordering::SeqCst);
        match self.hypervisor.status().await {
            Ok(snapshot) => {
                let state = if snapshot.running { VmState::Running } else { VmState::Stopped };
                self.set_state(state.clone()).await;
                Ok(VmStatus { state, snapshot: Some(snapshot), restart_required })
            }
            Err(CoreError::NotInstalled) => {
                self.set_state(VmState::NotInstalled).await;
                Ok(VmStatus {
                    state: VmState::NotInstalled,
                    snapshot: None,
                    restart_required,
                })
            }
            Err(e) => {
                tracing::warn!(correlation_id = %request.correlation_id, error = %e, "status query failed");
                self.set_state(VmState::Unknown).await;
                Err(e)
            }
        }
    }

    /// Queries the hypervisor version.
    ///
    /// # Errors
    ///
    /// Propagates hypervisor failures.
    pub async fn version(&self) -> Result<VersionInfo> {
        self.hypervisor.version().await
    }

    /// Starts the VM.
    ///
    /// With `config_override` set, that configuration is used for this
    /// boot without being persisted; otherwise the persisted config is
    /// loaded through the validated path.
    ///
    /// # Errors
    ///
    /// `Busy` if another mutating operation is in flight; otherwise the
    /// adapter's failure, after transitioning to `Error`.
    pub async fn start(&self, config_override: Option<ColimaConfig>) -> Result<VmState> {
        let request = LifecycleRequest::new(LifecycleOperation::Start);
        let _guard = self.op_lock.try_lock().map_err(|_| CoreError::Busy)?;
        tracing::info!(correlation_id = %request.correlation_id, "start requested");

        let config = match config_override {
            Some(config) => {
                // Overrides bypass the persisted file but not validation.
                let violations = config.violations();
                if !violations.is_empty() {
                    return Err(CoreError::InvalidConfig { violations });
                }
                config
            }
            None => self.config.load()?,
        };
        self.start_locked(&config).await?;
        Ok(VmState::Running)
    }

    /// Stops the VM. Stopping an already-stopped VM succeeds.
    ///
    /// # Errors
    ///
    /// `Busy` if another mutating operation is in flight; otherwise the
    /// adapter's failure, after transitioning to `Error`.
    pub async fn stop(&self) -> Result<VmState> {
        let request = LifecycleRequest::new(LifecycleOperation::Stop);
        let _guard = self.op_lock.try_lock().map_err(|_| CoreError::Busy)?;
        tracing::info!(correlation_id = %request.correlation_id, "stop requested");

        self.stop_locked().await?;
        Ok(VmState::Stopped)
    }

    /// Restarts the VM: stop then start composed under one lock, not a
    /// separate hypervisor primitive, so failure semantics compose from
    /// the two halves.
    ///
    /// # Errors
    ///
    /// `Busy` if another mutating operation is in flight; otherwise the
    /// first failing half's error.
    pub async fn restart(&self) -> Result<VmState> {
        let request = LifecycleRequest::new(LifecycleOperation::Restart);
        let _guard = self.op_lock.try_lock().map_err(|_| CoreError::Busy)?;
        tracing::info!(correlation_id = %request.correlation_id, "restart requested");

        let config = self.config.load()?;
        self.stop_locked().await?;
        self.start_locked(&config).await?;

        // The advisory flag is satisfied once a restart has actually
        // happened with the persisted config.
        self.restart_required.store(false, Ordering::SeqCst);
        Ok(VmState::Running)
    }

    /// Applies a partial config update through the validated, atomic
    /// write path and records the advisory restart flag.
    ///
    /// Never restarts the VM: that is a separate, explicit caller
    /// action.
    ///
    /// # Errors
    ///
    /// Propagates validation and persistence failures.
    pub fn update_config(&self, patch: &ConfigPatch) -> Result<RestartDecision> {
        let (_, decision) = self.config.apply_patch(patch)?;
        if decision.restart_required {
            self.restart_required.store(true, Ordering::SeqCst);
            tracing::info!(
                changed_fields = ?decision.changed_fields,
                "config change requires a VM restart"
            );
        }
        Ok(decision)
    }

    /// Loads the current persisted configuration.
    ///
    /// # Errors
    ///
    /// Propagates load and validation failures.
    pub fn get_config(&self) -> Result<ColimaConfig> {
        self.config.load()
    }

    /// Returns the advisory restart flag.
    #[must_use]
    pub fn restart_required(&self) -> bool {
        self.restart_required.load(Ordering::SeqCst)
    }

    // Callers must hold `op_lock`.
    async fn start_locked(&self, config: &ColimaConfig) -> Result<()> {
        self.set_state(VmState::Starting).await;
        match self.hypervisor.start(config).await {
            Ok(()) => {
                self.set_state(VmState::Running).await;
                Ok(())
            }
            Err(CoreError::NotInstalled) => {
                self.set_state(VmState::NotInstalled).await;
                Err(CoreError::NotInstalled)
            }
            Err(e) => {
                self.set_state(VmState::Error(e.to_string())).await;
                Err(e)
            }
        }
    }

    // Callers must hold `op_lock`.
    async fn stop_locked(&self) -> Result<()> {
        self.set_state(VmState::Stopping).await;
        match self.hypervisor.stop().await {
            Ok(()) => {
                self.set_state(VmState::Stopped).await;
                Ok(())
            }
            Err(CoreError::NotInstalled) => {
                self.set_state(VmState::NotInstalled).await;
                Err(CoreError::NotInstalled)
            }
            Err(e) => {
                self.set_state(VmState::Error(e.to_string())).await;
                Err(e)
            }
        }
    }
}
