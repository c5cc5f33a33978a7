//! Resource-limited execution of untrusted programs.
//!
//! The grading logic talks to the [`Executor`] trait only; the backend is
//! picked from [`IsolationMode`] at service construction, never branched on
//! in grading code.

mod process;

pub use process::ProcessExecutor;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ResourceProfile;

/// Extra wall-clock allowance past the CPU budget, in ms.
const WALL_CLOCK_BUFFER_MS: u64 = 1000;

/// How a monitored process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Killed by a signal not attributable to a resource limit.
    Signaled(i32),
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
}

impl ExecutionStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

/// Measured result of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// CPU time consumed, in ms.
    pub time_ms: u64,
    /// Wall-clock time, in ms.
    pub wall_ms: u64,
    /// Peak memory, in KB.
    pub memory_kb: u64,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Limits enforced on a single execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
    pub memory_kb: u64,
    pub output_bytes: u64,
}

impl ExecutionLimits {
    /// Limits with the wall budget derived from the CPU budget.
    pub fn new(cpu_time_ms: u64, memory_kb: u64, output_bytes: u64) -> Self {
        Self {
            cpu_time_ms,
            wall_time_ms: cpu_time_ms * 2 + WALL_CLOCK_BUFFER_MS,
            memory_kb,
            output_bytes,
        }
    }

    pub fn from_profile(profile: &ResourceProfile) -> Self {
        Self::new(
            profile.cpu_time_ms,
            profile.memory_kb,
            profile.output_limit_bytes,
        )
    }
}

/// One execution request.
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    /// Directory whose contents seed the scratch directory.
    pub work_dir: PathBuf,
    pub command: Vec<String>,
    pub limits: ExecutionLimits,
    pub stdin: Option<Vec<u8>>,
    /// Copy scratch contents back here after a successful exit
    /// (compile artifacts).
    pub copy_out_dir: Option<PathBuf>,
}

impl ExecutionSpec {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            command: Vec::new(),
            limits: ExecutionLimits::new(1000, 256 * 1024, 8 * 1024 * 1024),
            stdin: None,
            copy_out_dir: None,
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_copy_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.copy_out_dir = Some(dir.into());
        self
    }
}

/// Runs one program under the spec's limits.
///
/// Limit overruns and crashes are reported in the outcome; `Err` means the
/// execution machinery itself failed (spawn, scratch dir) and the caller may
/// retry.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, spec: &ExecutionSpec) -> anyhow::Result<ExecutionOutcome>;
}

/// Whether namespace isolation (no network, read-only filesystem outside
/// the scratch directory) failures abort the spawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NamespaceIsolation {
    /// Try to unshare; fall back to rlimit-only confinement.
    #[default]
    BestEffort,
    /// Fail the spawn if the namespaces cannot be set up.
    Required,
    /// Do not attempt namespace isolation.
    Disabled,
}

/// Executor backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    /// Direct subprocess with rlimits, process-group kill, and optional
    /// user/mount/network namespacing.
    Process { namespaces: NamespaceIsolation },
}

impl Default for IsolationMode {
    fn default() -> Self {
        Self::Process {
            namespaces: NamespaceIsolation::default(),
        }
    }
}

pub fn build_executor(mode: &IsolationMode) -> Arc<dyn Executor> {
    match mode {
        IsolationMode::Process { namespaces } => Arc::new(ProcessExecutor::new(*namespaces)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_budget_derived_from_cpu() {
        let limits = ExecutionLimits::new(1500, 1024, 4096);
        assert_eq!(limits.wall_time_ms, 4000);
    }

    #[test]
    fn test_status_success() {
        assert!(ExecutionStatus::Exited(0).success());
        assert!(!ExecutionStatus::Exited(1).success());
        assert!(!ExecutionStatus::TimeLimitExceeded.success());
    }
}
