//! Adapter for the external `colima` CLI.
//!
//! Colima's only contract is text on stdout/stderr plus an exit code;
//! no machine-readable API is assumed. All parsing of that text lives
//! here so that format drift between colima versions only ever requires
//! updating this one boundary. Parsers fail closed: output that does
//! not match a known shape is reported as
//! [`CoreError::UnparsableOutput`], never guessed at.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ColimaConfig;
use crate::error::{CoreError, Result};
use crate::exec::{Envelope, ExecError, ExecOptions, ExecResult};

/// Maximum length of a stderr excerpt surfaced in errors.
const EXCERPT_MAX_CHARS: usize = 240;

/// Profile managed by the daemon. Colima supports multiple profiles;
/// this daemon manages exactly one VM instance.
pub const DEFAULT_PROFILE: &str = "default";

// =============================================================================
// Typed projections of colima's reported state
// =============================================================================

/// Point-in-time view of the hypervisor's VM, rebuilt fresh on every
/// query. Never cached across calls: the VM can change underneath the
/// daemon (manual CLI use, crashes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// True if colima knows about the instance at all.
    pub exists: bool,
    /// True if the instance is currently running.
    pub running: bool,
    /// Raw status label as reported (e.g. "Running", "Stopped").
    pub status_label: Option<String>,
    /// Allocated vCPUs.
    pub cpus: Option<u32>,
    /// Allocated memory in GiB.
    pub memory_gib: Option<u32>,
    /// Allocated disk in GiB.
    pub disk_gib: Option<u32>,
    /// Container runtime inside the VM.
    pub runtime: Option<String>,
    /// Guest IP address, when assigned.
    pub address: Option<String>,
}

impl StatusSnapshot {
    /// Snapshot for an instance colima has never created.
    #[must_use]
    pub fn absent() -> Self {
        Self {
            exists: false,
            running: false,
            status_label: None,
            cpus: None,
            memory_gib: None,
            disk_gib: None,
            runtime: None,
            address: None,
        }
    }
}

/// Hypervisor version information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Colima release version (e.g. "0.6.8").
    pub version: String,
    /// Git commit, when reported.
    pub commit: Option<String>,
}

// =============================================================================
// Hypervisor trait
// =============================================================================

/// Lifecycle operations against the external hypervisor tool.
///
/// The orchestrator depends on this trait, not on [`ColimaCli`]
/// directly, so state-machine behavior is testable without colima
/// installed.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Queries the current VM status.
    async fn status(&self) -> Result<StatusSnapshot>;

    /// Queries the hypervisor version.
    async fn version(&self) -> Result<VersionInfo>;

    /// Starts the VM with the given resource configuration.
    ///
    /// Starting an already-running VM succeeds as a no-op.
    async fn start(&self, config: &ColimaConfig) -> Result<()>;

    /// Stops the VM. Stopping an already-stopped VM succeeds as a no-op.
    async fn stop(&self) -> Result<()>;
}

/// Shared hypervisor trait object.
pub type DynHypervisor = std::sync::Arc<dyn Hypervisor>;

// =============================================================================
// Failure classification
// =============================================================================

/// Classification of a non-zero exit, by known stderr substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    /// The hypervisor (or a tool it shells out to) is missing.
    NotFound,
    /// The VM is already in the requested state.
    AlreadyInTargetState,
    /// Stop/status against an instance that is not running.
    NotRunning,
    /// Host denied the operation.
    PermissionDenied,
    /// Host is out of memory or disk.
    ResourceExhausted,
    /// No known substring matched.
    Unknown,
}

/// Fixed substring table. Matching is case-insensitive; first hit wins.
const FAILURE_TABLE: &[(&str, FailureClass)] = &[
    ("command not found", FailureClass::NotFound),
    ("executable file not found", FailureClass::NotFound),
    ("is already running", FailureClass::AlreadyInTargetState),
    ("already running", FailureClass::AlreadyInTargetState),
    ("is not running", FailureClass::NotRunning),
    ("not running", FailureClass::NotRunning),
    ("permission denied", FailureClass::PermissionDenied),
    ("operation not permitted", FailureClass::PermissionDenied),
    ("cannot allocate memory", FailureClass::ResourceExhausted),
    ("no space left on device", FailureClass::ResourceExhausted),
];

fn classify_stderr(stderr: &str) -> FailureClass {
    let lower = stderr.to_lowercase();
    for (needle, class) in FAILURE_TABLE {
        if lower.contains(needle) {
            return *class;
        }
    }
    FailureClass::Unknown
}

/// Trims stderr to a bounded, single-paragraph excerpt.
fn excerpt(stderr: &str) -> String {
    let joined = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    if joined.chars().count() <= EXCERPT_MAX_CHARS {
        joined
    } else {
        joined.chars().take(EXCERPT_MAX_CHARS).collect()
    }
}

// =============================================================================
// Per-operation deadlines
// =============================================================================

/// Deadlines per lifecycle verb. VM boot and shutdown are slow and
/// variable, so start/stop get generous budgets; reads stay short.
#[derive(Debug, Clone)]
pub struct AdapterTimeouts {
    /// Deadline for `colima start`.
    pub start: Duration,
    /// Deadline for `colima stop`.
    pub stop: Duration,
    /// Deadline for `colima list`.
    pub status: Duration,
    /// Deadline for `colima version`.
    pub version: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            start: Duration::from_secs(120),
            stop: Duration::from_secs(60),
            status: Duration::from_secs(15),
            version: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Colima CLI adapter
// =============================================================================

/// Production [`Hypervisor`] implementation shelling out to `colima`.
pub struct ColimaCli {
    binary: PathBuf,
    profile: String,
    envelope: Envelope,
    timeouts: AdapterTimeouts,
}

impl ColimaCli {
    /// Creates an adapter for the given colima binary.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, envelope: Envelope) -> Self {
        Self {
            binary: binary.into(),
            profile: DEFAULT_PROFILE.to_string(),
            envelope,
            timeouts: AdapterTimeouts::default(),
        }
    }

    /// Overrides the per-operation deadlines.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: AdapterTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Overrides the colima profile.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Runs one colima subcommand through the envelope, translating
    /// envelope failures into the core taxonomy.
    async fn run(
        &self,
        operation: &'static str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExecResult> {
        let binary = self.binary.to_string_lossy();
        let opts = ExecOptions { timeout, env: Vec::new() };
        match self.envelope.run(&binary, args, &opts).await {
            Ok(result) => Ok(result),
            Err(ExecError::NotFound { .. }) => Err(CoreError::NotInstalled),
            Err(ExecError::Timeout { result, .. }) => Err(CoreError::Timeout {
                operation,
                elapsed: result.duration,
            }),
            Err(ExecError::Launch { source, .. }) => Err(CoreError::Io(source)),
        }
    }

    fn command_failed(result: &ExecResult) -> CoreError {
        CoreError::CommandFailed {
            exit_code: result.exit_code,
            stderr_excerpt: excerpt(&result.stderr),
        }
    }
}

#[async_trait]
impl Hypervisor for ColimaCli {
    async fn status(&self) -> Result<StatusSnapshot> {
        let result = self
            .run("status", &["list"], self.timeouts.status)
            .await?;

        if !result.success() {
            // Colima reports a never-created instance as a warning, not
            // as data; treat it as an absent VM rather than a failure.
            if classify_stderr(&result.stderr) == FailureClass::NotRunning
                || result.stderr.to_lowercase().contains("no instance")
            {
                return Ok(StatusSnapshot::absent());
            }
            return Err(Self::command_failed(&result));
        }

        match parse_list(&result.stdout, &self.profile) {
            Ok(snapshot) => Ok(snapshot),
            Err(reason) => {
                tracing::warn!(
                    reason = %reason,
                    "colima list output did not match any known format; \
                     possible version mismatch"
                );
                Err(CoreError::UnparsableOutput(reason))
            }
        }
    }

    async fn version(&self) -> Result<VersionInfo> {
        let result = self
            .run("version", &["version"], self.timeouts.version)
            .await?;
        if !result.success() {
            return Err(Self::command_failed(&result));
        }
        parse_version(&result.stdout).map_err(|reason| {
            tracing::warn!(reason = %reason, "unparsable colima version output");
            CoreError::UnparsableOutput(reason)
        })
    }

    async fn start(&self, config: &ColimaConfig) -> Result<()> {
        let cpus = config.vm.cpus.to_string();
        let memory = config.vm.memory_gib.to_string();
        let disk = config.vm.disk_gib.to_string();
        let runtime = config.vm.runtime.to_string();
        let args = [
            "start",
            "--cpu", &cpus,
            "--memory", &memory,
            "--disk", &disk,
            "--runtime", &runtime,
        ];

        let result = self.run("start", &args, self.timeouts.start).await?;
        if result.success() {
            return Ok(());
        }
        match classify_stderr(&result.stderr) {
            FailureClass::AlreadyInTargetState => {
                tracing::debug!("start requested but VM already running; treating as no-op");
                Ok(())
            }
            FailureClass::NotFound => Err(CoreError::NotInstalled),
            _ => Err(Self::command_failed(&result)),
        }
    }

    async fn stop(&self) -> Result<()> {
        let result = self.run("stop", &["stop"], self.timeouts.stop).await?;
        if result.success() {
            return Ok(());
        }
        match classify_stderr(&result.stderr) {
            // Stopping a stopped VM is a success, not an error.
            FailureClass::NotRunning | FailureClass::AlreadyInTargetState => {
                tracing::debug!("stop requested but VM not running; treating as no-op");
                Ok(())
            }
            FailureClass::NotFound => Err(CoreError::NotInstalled),
            _ => Err(Self::command_failed(&result)),
        }
    }
}

// =============================================================================
// Parsers
// =============================================================================
//
// `colima list` prints a whitespace-aligned table:
//
//   PROFILE    STATUS     ARCH       CPUS    MEMORY    DISK     RUNTIME    ADDRESS
//   default    Running    aarch64    2       4GiB      60GiB    docker     192.168.106.2
//
// `colima version` prints:
//
//   colima version 0.6.8
//   git commit: 9b0809d0ac9375f95b00cafad7d27d0b8a8ff2d1
//
// Both parsers return a reason string on mismatch, which the adapter
// reports as UnparsableOutput.

/// Parses `colima list` output into a snapshot for `profile`.
fn parse_list(output: &str, profile: &str) -> std::result::Result<StatusSnapshot, String> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());

    let header = lines.next().ok_or_else(|| "empty list output".to_string())?;
    let header_upper = header.to_uppercase();
    if !header_upper.contains("PROFILE") || !header_upper.contains("STATUS") {
        return Err(format!("unrecognized list header: {header:?}"));
    }
    let columns: Vec<&str> = header_upper.split_whitespace().collect();
    let col = |name: &str| columns.iter().position(|c| *c == name);
    let status_col = col("STATUS").ok_or("missing STATUS column")?;

    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first().copied() != Some(profile) {
            continue;
        }
        let field = |idx: Option<usize>| idx.and_then(|i| fields.get(i)).map(|s| (*s).to_string());

        let status_label = fields
            .get(status_col)
            .map(|s| (*s).to_string())
            .ok_or_else(|| format!("row too short for STATUS: {line:?}"))?;
        let running = status_label.eq_ignore_ascii_case("running");

        return Ok(StatusSnapshot {
            exists: true,
            running,
            cpus: field(col("CPUS")).and_then(|v| v.parse().ok()),
            memory_gib: field(col("MEMORY")).as_deref().and_then(parse_size_gib),
            disk_gib: field(col("DISK")).as_deref().and_then(parse_size_gib),
            runtime: field(col("RUNTIME")),
            address: field(col("ADDRESS")).filter(|a| a.as_str() != "-"),
            status_label: Some(status_label),
        });
    }

    // Header parsed fine but the profile has no row: the instance has
    // never been created.
    Ok(StatusSnapshot::absent())
}

/// Parses a colima size field like "4GiB" or "60GB" into whole GiB.
fn parse_size_gib(value: &str) -> Option<u32> {
    let digits = value
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .trim();
    digits.parse::<f64>().ok().map(|v| v.round() as u32)
}

/// Parses `colima version` output.
fn parse_version(output: &str) -> std::result::Result<VersionInfo, String> {
    let mut version = None;
    let mut commit = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("colima version ") {
            version = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("git commit:") {
            commit = Some(rest.trim().to_string());
        }
    }

    match version {
        Some(version) if !version.is_empty() => Ok(VersionInfo { version, commit }),
        _ => Err(format!("no version line in output: {:?}", excerpt(output))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_RUNNING: &str = "\
PROFILE    STATUS     ARCH       CPUS    MEMORY    DISK     RUNTIME    ADDRESS
default    Running    aarch64    4       8GiB      60GiB    docker     192.168.106.2
";

    const LIST_STOPPED: &str = "\
PROFILE    STATUS     ARCH       CPUS    MEMORY    DISK     RUNTIME    ADDRESS
default    Stopped    aarch64    2       4GiB      60GiB    docker
";

    const LIST_EMPTY: &str = "\
PROFILE    STATUS    ARCH    CPUS    MEMORY    DISK    RUNTIME    ADDRESS
";

    #[test]
    fn test_parse_list_running_instance() {
        let snap = parse_list(LIST_RUNNING, "default").unwrap();
        assert!(snap.exists);
        assert!(snap.running);
        assert_eq!(snap.cpus, Some(4));
        assert_eq!(snap.memory_gib, Some(8));
        assert_eq!(snap.disk_gib, Some(60));
        assert_eq!(snap.runtime.as_deref(), Some("docker"));
        assert_eq!(snap.address.as_deref(), Some("192.168.106.2"));
    }

    #[test]
    fn test_parse_list_stopped_instance() {
        let snap = parse_list(LIST_STOPPED, "default").unwrap();
        assert!(snap.exists);
        assert!(!snap.running);
        assert_eq!(snap.status_label.as_deref(), Some("Stopped"));
        assert_eq!(snap.address, None);
    }

    #[test]
    fn test_parse_list_missing_profile_is_absent() {
        let snap = parse_list(LIST_EMPTY, "default").unwrap();
        assert!(!snap.exists);
        assert!(!snap.running);
    }

    #[test]
    fn test_parse_list_other_profile_ignored() {
        let snap = parse_list(LIST_RUNNING, "work").unwrap();
        assert!(!snap.exists);
    }

    #[test]
    fn test_parse_list_drift_fails_closed() {
        assert!(parse_list("", "default").is_err());
        assert!(parse_list("colima: unknown flag --format", "default").is_err());
        assert!(parse_list("{\"profiles\": []}", "default").is_err());
    }

    #[test]
    fn test_parse_size_gib_variants() {
        assert_eq!(parse_size_gib("8GiB"), Some(8));
        assert_eq!(parse_size_gib("60GB"), Some(60));
        assert_eq!(parse_size_gib("2"), Some(2));
        assert_eq!(parse_size_gib("lots"), None);
    }

    #[test]
    fn test_parse_version() {
        let output = "colima version 0.6.8\ngit commit: 9b0809d0ac9375f95b00cafad7d27d0b8a8ff2d1\n";
        let info = parse_version(output).unwrap();
        assert_eq!(info.version, "0.6.8");
        assert_eq!(
            info.commit.as_deref(),
            Some("9b0809d0ac9375f95b00cafad7d27d0b8a8ff2d1")
        );
    }

    #[test]
    fn test_parse_version_drift_fails_closed() {
        assert!(parse_version("limactl version 1.0.0").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_classify_known_failures() {
        assert_eq!(
            classify_stderr("FATA[0000] error: vm is already running"),
            FailureClass::AlreadyInTargetState
        );
        assert_eq!(
            classify_stderr("FATA[0000] colima is not running"),
            FailureClass::NotRunning
        );
        assert_eq!(
            classify_stderr("open /dev/vmnet: permission denied"),
            FailureClass::PermissionDenied
        );
        assert_eq!(
            classify_stderr("fork: cannot allocate memory"),
            FailureClass::ResourceExhausted
        );
        assert_eq!(classify_stderr("something novel"), FailureClass::Unknown);
    }

    #[test]
    fn test_excerpt_is_bounded_and_single_paragraph() {
        let long = "x".repeat(1000);
        let bounded = excerpt(&long);
        assert!(bounded.chars().count() <= EXCERPT_MAX_CHARS);

        let multi = "line one\n\n  line two  \n";
        assert_eq!(excerpt(multi), "line one; line two");
    }
}
