//! Configuration management.
//!
//! The daemon owns a single on-disk configuration file describing the
//! colima VM and the daemon itself. Loading is layered the same way as
//! most of our tooling:
//!
//! 1. Environment variables (CARAVEL_*)
//! 2. Configuration file (~/.config/caravel/config.toml)
//! 3. Default values
//!
//! Writes go through a validated, atomic path: serialize to a temp file
//! in the same directory, flush, rename over the target. A reader never
//! observes a partially-written file, and a crash mid-write leaves the
//! previous valid config intact.
//!
//! ## Example Configuration File
//!
//! ```toml
//! [vm]
//! cpus = 4
//! memory_gib = 8
//! disk_gib = 60
//! runtime = "docker"
//!
//! [daemon]
//! log_level = "info"
//! port = 7450
//!
//! [paths]
//! colima_binary = "colima"
//! ```

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{CoreError, Result};
use crate::policy::{self, RestartDecision};

// =============================================================================
// Validation bounds
// =============================================================================

/// Minimum vCPUs for the VM.
pub const MIN_CPUS: u32 = 1;
/// Maximum vCPUs for the VM.
pub const MAX_CPUS: u32 = 64;
/// Allowed VM memory range in GiB.
pub const MEMORY_GIB_RANGE: std::ops::RangeInclusive<u32> = 1..=512;
/// Allowed VM disk range in GiB.
pub const DISK_GIB_RANGE: std::ops::RangeInclusive<u32> = 10..=1024;
/// Lowest non-privileged port the daemon may bind.
pub const MIN_PORT: u16 = 1024;

// =============================================================================
// Configuration types
// =============================================================================

/// Container runtime inside the VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    /// Docker engine.
    Docker,
    /// Plain containerd.
    Containerd,
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Containerd => write!(f, "containerd"),
        }
    }
}

/// Daemon log verbosity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level name as used by `tracing` env filters.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// VM resource settings. Changing any of these requires a VM restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VmSettings {
    /// Number of vCPUs.
    pub cpus: u32,
    /// Memory in GiB.
    pub memory_gib: u32,
    /// Disk size in GiB.
    pub disk_gib: u32,
    /// Container runtime.
    pub runtime: ContainerRuntime,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            cpus: 2,
            memory_gib: 4,
            disk_gib: 60,
            runtime: ContainerRuntime::Docker,
        }
    }
}

/// Daemon settings. Changes take effect without a VM restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonSettings {
    /// Log level.
    pub log_level: LogLevel,
    /// Port the daemon advertises to local clients.
    pub port: u16,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            port: 7450,
        }
    }
}

/// Host path settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathSettings {
    /// Colima executable (name resolved on PATH, or an absolute path).
    pub colima_binary: PathBuf,
    /// Daemon state directory (pid file, socket).
    pub state_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            colima_binary: PathBuf::from("colima"),
            state_dir: default_state_dir(),
        }
    }
}

/// Caravel configuration: the single on-disk source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ColimaConfig {
    /// VM resource settings.
    pub vm: VmSettings,
    /// Daemon settings.
    pub daemon: DaemonSettings,
    /// Host paths.
    pub paths: PathSettings,
}

impl ColimaConfig {
    /// Checks every range constraint and returns all violations.
    ///
    /// Enumerated fields (runtime, log level) are enforced by the type
    /// system at deserialization; only numeric ranges are checked here.
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.vm.cpus < MIN_CPUS || self.vm.cpus > MAX_CPUS {
            violations.push(format!(
                "vm.cpus must be between {MIN_CPUS} and {MAX_CPUS} (got {})",
                self.vm.cpus
            ));
        }
        if !MEMORY_GIB_RANGE.contains(&self.vm.memory_gib) {
            violations.push(format!(
                "vm.memory_gib must be between {} and {} (got {})",
                MEMORY_GIB_RANGE.start(),
                MEMORY_GIB_RANGE.end(),
                self.vm.memory_gib
            ));
        }
        if !DISK_GIB_RANGE.contains(&self.vm.disk_gib) {
            violations.push(format!(
                "vm.disk_gib must be between {} and {} (got {})",
                DISK_GIB_RANGE.start(),
                DISK_GIB_RANGE.end(),
                self.vm.disk_gib
            ));
        }
        if self.daemon.port < MIN_PORT {
            violations.push(format!(
                "daemon.port must be >= {MIN_PORT} (got {})",
                self.daemon.port
            ));
        }
        if self.paths.colima_binary.as_os_str().is_empty() {
            violations.push("paths.colima_binary must not be empty".to_string());
        }

        violations
    }
}

/// Partial configuration update.
///
/// Every field is optional; unset fields keep their current value.
/// This is the payload shape of the `UpdateConfig` API operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigPatch {
    /// New vCPU count.
    pub cpus: Option<u32>,
    /// New memory in GiB.
    pub memory_gib: Option<u32>,
    /// New disk size in GiB.
    pub disk_gib: Option<u32>,
    /// New container runtime.
    pub runtime: Option<ContainerRuntime>,
    /// New log level.
    pub log_level: Option<LogLevel>,
    /// New daemon port.
    pub port: Option<u16>,
}

impl ConfigPatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merges the patch onto `config`.
    pub fn apply_to(&self, config: &mut ColimaConfig) {
        if let Some(cpus) = self.cpus {
            config.vm.cpus = cpus;
        }
        if let Some(memory_gib) = self.memory_gib {
            config.vm.memory_gib = memory_gib;
        }
        if let Some(disk_gib) = self.disk_gib {
            config.vm.disk_gib = disk_gib;
        }
        if let Some(runtime) = self.runtime {
            config.vm.runtime = runtime;
        }
        if let Some(log_level) = self.log_level {
            config.daemon.log_level = log_level;
        }
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
    }
}

// =============================================================================
// Configuration manager
// =============================================================================

/// Owns the on-disk configuration file.
///
/// This is the single writer of the config file within the daemon.
/// External tools may edit the file too; their changes are picked up on
/// the next [`ConfigManager::load`], never merged.
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Creates a manager for the given config file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the default per-user config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("caravel")
            .join("config.toml")
    }

    /// Returns the config file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the configuration, filling missing fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] listing every type error and
    /// violated range constraint; values are never silently coerced.
    pub fn load(&self) -> Result<ColimaConfig> {
        let config: ColimaConfig = Figment::new()
            .merge(Serialized::defaults(ColimaConfig::default()))
            .merge(Toml::file(&self.path))
            .merge(Env::prefixed("CARAVEL_").split("__"))
            .extract()
            .map_err(|e| CoreError::InvalidConfig {
                violations: e.into_iter().map(|err| err.to_string()).collect(),
            })?;

        let violations = config.violations();
        if !violations.is_empty() {
            return Err(CoreError::InvalidConfig { violations });
        }
        Ok(config)
    }

    /// Validates and atomically persists a new configuration.
    ///
    /// Returns the restart decision comparing against the previously
    /// persisted config (defaults if none existed). The decision is
    /// advice for the caller; this method never restarts anything.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] with every violation, or an
    /// I/O error if the file cannot be written.
    pub fn write(&self, new: &ColimaConfig) -> Result<RestartDecision> {
        let violations = new.violations();
        if !violations.is_empty() {
            return Err(CoreError::InvalidConfig { violations });
        }

        let old = self.load().unwrap_or_default();

        let content = toml::to_string_pretty(new).map_err(|e| CoreError::InvalidConfig {
            violations: vec![format!("failed to serialize config: {e}")],
        })?;

        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        // Temp file must live in the target directory: rename is only
        // atomic within one filesystem.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CoreError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), "config persisted");
        Ok(policy::decide(&old, new))
    }

    /// Applies a partial update through the validated write path.
    ///
    /// # Errors
    ///
    /// Propagates load, validation, and write failures.
    pub fn apply_patch(&self, patch: &ConfigPatch) -> Result<(ColimaConfig, RestartDecision)> {
        let mut config = self.load()?;
        patch.apply_to(&mut config);
        let decision = self.write(&config)?;
        Ok((config, decision))
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".caravel")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ConfigManager {
        ConfigManager::new(dir.path().join("config.toml"))
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config = manager(&temp).load().unwrap();
        assert_eq!(config, ColimaConfig::default());
        assert_eq!(config.vm.cpus, 2);
        assert_eq!(config.vm.runtime, ContainerRuntime::Docker);
    }

    #[test]
    fn test_write_then_load_round_trips_with_defaults() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);

        let mut config = ColimaConfig::default();
        config.vm.cpus = 6;
        config.daemon.log_level = LogLevel::Debug;
        mgr.write(&config).unwrap();

        let loaded = mgr.load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let mut config = ColimaConfig::default();
        config.vm.cpus = 0;
        config.vm.memory_gib = 9000;
        config.daemon.port = 80;

        let violations = config.violations();
        assert_eq!(violations.len(), 3);
        assert!(violations[0].contains("vm.cpus"));
        assert!(violations[1].contains("vm.memory_gib"));
        assert!(violations[2].contains("daemon.port"));

        let temp = TempDir::new().unwrap();
        match manager(&temp).write(&config) {
            Err(CoreError::InvalidConfig { violations }) => assert_eq!(violations.len(), 3),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_file_contents_rejected_not_coerced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[vm]\ncpus = \"many\"\n").unwrap();

        match ConfigManager::new(&path).load() {
            Err(CoreError::InvalidConfig { violations }) => assert!(!violations.is_empty()),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_write_leaves_previous_config_intact() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);

        let mut first = ColimaConfig::default();
        first.vm.cpus = 3;
        mgr.write(&first).unwrap();

        // Simulate a crash between temp-write and rename: the temp file
        // exists next to the target but is never persisted.
        let mut second = ColimaConfig::default();
        second.vm.cpus = 8;
        let content = toml::to_string_pretty(&second).unwrap();
        let mut tmp = NamedTempFile::new_in(temp.path()).unwrap();
        tmp.write_all(content.as_bytes()).unwrap();
        drop(tmp); // crash before rename

        let loaded = mgr.load().unwrap();
        assert_eq!(loaded.vm.cpus, 3);
    }

    #[test]
    fn test_patch_merges_only_set_fields() {
        let mut config = ColimaConfig::default();
        let patch = ConfigPatch {
            memory_gib: Some(16),
            log_level: Some(LogLevel::Trace),
            ..ConfigPatch::default()
        };
        patch.apply_to(&mut config);

        assert_eq!(config.vm.memory_gib, 16);
        assert_eq!(config.daemon.log_level, LogLevel::Trace);
        assert_eq!(config.vm.cpus, VmSettings::default().cpus);
    }

    #[test]
    fn test_apply_patch_returns_decision() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        mgr.write(&ColimaConfig::default()).unwrap();

        let patch = ConfigPatch { cpus: Some(4), ..ConfigPatch::default() };
        let (config, decision) = mgr.apply_patch(&patch).unwrap();
        assert_eq!(config.vm.cpus, 4);
        assert!(decision.restart_required);
        assert_eq!(decision.changed_fields, vec!["vm.cpus"]);
    }
}
