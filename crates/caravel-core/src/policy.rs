//! Restart policy.
//!
//! A pure decision function over two configurations. Resource fields
//! (cpus, memory, disk, runtime) only take effect after a VM restart;
//! daemon fields (log level, port) apply live. Deciding *whether* a
//! restart is needed is kept separate from performing one: the policy
//! never triggers anything, it is advice surfaced to the caller.

use serde::Serialize;

use crate::config::ColimaConfig;

/// Outcome of comparing an old and a new configuration.
///
/// `changed_fields` lists every differing field in declaration order,
/// regardless of whether it contributes to `restart_required`, so a UI
/// can always show the full diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartDecision {
    /// True if any resource field changed.
    pub restart_required: bool,
    /// Names of all changed fields, in declaration order.
    pub changed_fields: Vec<&'static str>,
}

impl RestartDecision {
    /// Decision for two identical configs.
    #[must_use]
    pub fn unchanged() -> Self {
        Self { restart_required: false, changed_fields: Vec::new() }
    }
}

/// Compares two configurations and decides whether the VM must restart.
///
/// Pure: no I/O, no daemon, no VM required.
#[must_use]
pub fn decide(old: &ColimaConfig, new: &ColimaConfig) -> RestartDecision {
    let mut changed_fields = Vec::new();
    let mut restart_required = false;

    // Resource fields first, then daemon fields, in declaration order.
    if old.vm.cpus != new.vm.cpus {
        changed_fields.push("vm.cpus");
        restart_required = true;
    }
    if old.vm.memory_gib != new.vm.memory_gib {
        changed_fields.push("vm.memory_gib");
        restart_required = true;
    }
    if old.vm.disk_gib != new.vm.disk_gib {
        changed_fields.push("vm.disk_gib");
        restart_required = true;
    }
    if old.vm.runtime != new.vm.runtime {
        changed_fields.push("vm.runtime");
        restart_required = true;
    }
    if old.daemon.log_level != new.daemon.log_level {
        changed_fields.push("daemon.log_level");
    }
    if old.daemon.port != new.daemon.port {
        changed_fields.push("daemon.port");
    }

    RestartDecision { restart_required, changed_fields }
}
