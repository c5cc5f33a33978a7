//! Subprocess execution backend.
//!
//! Each execution gets a private scratch directory seeded from the spec's
//! work dir. The child is put in its own session with rlimits applied
//! between fork and exec; the wall clock is enforced from the parent with a
//! process-group SIGKILL, and CPU/peak-memory are sampled from /proc while
//! the child runs.

use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setsid, sysconf, Pid, SysconfVar};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{
    ExecutionOutcome, ExecutionSpec, ExecutionStatus, Executor, NamespaceIsolation,
};

const MAX_PROCESSES: u64 = 64;
const MAX_OPEN_FILES: u64 = 256;
const STDERR_CAP_BYTES: u64 = 64 * 1024;
const SAMPLE_INTERVAL_MS: u64 = 4;
/// Headroom between the judged memory limit and the address-space rlimit.
/// The rlimit is only a runaway backstop; the sampled peak against the true
/// limit decides memory-limit verdicts, so the cap must sit well above the
/// limit or an over-allocating program dies of a failed mmap before its
/// peak ever crosses the line.
const ADDRESS_SPACE_SLACK_BYTES: u64 = 256 * 1024 * 1024;

pub struct ProcessExecutor {
    namespaces: NamespaceIsolation,
}

impl ProcessExecutor {
    pub fn new(namespaces: NamespaceIsolation) -> Self {
        Self { namespaces }
    }
}

/// SIGKILLs the child's session when dropped. Arms every exit path,
/// including the evaluation future being dropped on cancellation, and
/// reaps background processes a submission left behind.
struct SessionGuard {
    pid: i32,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        kill_process_group(self.pid);
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, spec: &ExecutionSpec) -> Result<ExecutionOutcome> {
        if spec.command.is_empty() {
            bail!("empty command");
        }

        let scratch = tempfile::TempDir::new().context("Failed to create scratch directory")?;
        copy_dir_flat(&spec.work_dir, scratch.path())
            .await
            .context("Failed to populate scratch directory")?;

        debug!(command = ?spec.command, scratch = ?scratch.path(), "spawning");

        let mut cmd = Command::new(&spec.command[0]);
        cmd.args(&spec.command[1..])
            .current_dir(scratch.path())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limits = spec.limits;
        let namespaces = self.namespaces;
        let scratch_c = CString::new(scratch.path().as_os_str().as_bytes())
            .context("Scratch path contains a NUL byte")?;
        unsafe {
            cmd.pre_exec(move || apply_child_limits(&limits, namespaces, &scratch_c));
        }

        let mut child = cmd.spawn().context("Failed to spawn submission process")?;
        let pid = child.id().context("Child has no pid")? as i32;
        let _session = SessionGuard { pid };

        if let Some(input) = spec.stdin.clone() {
            if let Some(mut stdin) = child.stdin.take() {
                // EPIPE here just means the child exited before reading.
                tokio::spawn(async move {
                    let _ = stdin.write_all(&input).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let stdout_pipe = child.stdout.take().context("Child stdout not captured")?;
        let stderr_pipe = child.stderr.take().context("Child stderr not captured")?;
        let stdout_task = tokio::spawn(read_capped(stdout_pipe, limits.output_bytes, Some(pid)));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, STDERR_CAP_BYTES, None));

        let (stop_tx, stop_rx) = watch::channel(false);
        let sampler = tokio::spawn(sample_usage(pid, stop_rx));

        let start = Instant::now();
        let mut timed_out = false;
        let exit_status =
            match tokio::time::timeout(Duration::from_millis(limits.wall_time_ms), child.wait())
                .await
            {
                Ok(status) => status.context("Failed to wait for submission process")?,
                Err(_) => {
                    timed_out = true;
                    kill_process_group(pid);
                    child
                        .wait()
                        .await
                        .context("Failed to reap killed submission process")?
                }
            };
        let wall_ms = start.elapsed().as_millis() as u64;

        let _ = stop_tx.send(true);
        let (peak_kb, cpu_ms) = sampler.await.unwrap_or((0, 0));

        let (stdout, stdout_truncated) = stdout_task
            .await
            .context("stdout reader task panicked")?;
        let (stderr_bytes, _) = stderr_task
            .await
            .context("stderr reader task panicked")?;
        let stderr = String::from_utf8_lossy(&stderr_bytes).to_string();

        let status = classify(
            &exit_status,
            timed_out,
            stdout_truncated,
            cpu_ms,
            peak_kb,
            &limits,
        );

        if status.success() {
            if let Some(out_dir) = &spec.copy_out_dir {
                copy_dir_flat(scratch.path(), out_dir)
                    .await
                    .context("Failed to copy artifacts out of scratch directory")?;
            }
        }

        Ok(ExecutionOutcome {
            status,
            time_ms: cpu_ms,
            wall_ms,
            memory_kb: peak_kb,
            stdout,
            stderr,
        })
    }
}

fn classify(
    exit_status: &std::process::ExitStatus,
    timed_out: bool,
    stdout_truncated: bool,
    cpu_ms: u64,
    peak_kb: u64,
    limits: &super::ExecutionLimits,
) -> ExecutionStatus {
    use std::os::unix::process::ExitStatusExt;

    if timed_out {
        return ExecutionStatus::TimeLimitExceeded;
    }
    if stdout_truncated {
        return ExecutionStatus::OutputLimitExceeded;
    }

    if let Some(signal) = exit_status.signal() {
        if signal == Signal::SIGXCPU as i32 || cpu_ms >= limits.cpu_time_ms {
            return ExecutionStatus::TimeLimitExceeded;
        }
        if signal == Signal::SIGXFSZ as i32 {
            return ExecutionStatus::OutputLimitExceeded;
        }
        // A crash with the sampled peak past the limit is a memory-limit
        // death, not a plain runtime error.
        if peak_kb > limits.memory_kb {
            return ExecutionStatus::MemoryLimitExceeded;
        }
        return ExecutionStatus::Signaled(signal);
    }

    if peak_kb > limits.memory_kb {
        return ExecutionStatus::MemoryLimitExceeded;
    }
    if cpu_ms > limits.cpu_time_ms {
        return ExecutionStatus::TimeLimitExceeded;
    }
    ExecutionStatus::Exited(exit_status.code().unwrap_or(-1))
}

/// Applied in the child between fork and exec.
fn apply_child_limits(
    limits: &super::ExecutionLimits,
    namespaces: NamespaceIsolation,
    scratch: &CStr,
) -> io::Result<()> {
    setsid().map_err(errno_to_io)?;

    let ns_flags =
        CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWNET;
    match namespaces {
        NamespaceIsolation::Disabled => {}
        NamespaceIsolation::BestEffort => {
            if unshare(ns_flags).is_ok() {
                let _ = confine_filesystem(scratch);
            }
        }
        NamespaceIsolation::Required => {
            unshare(ns_flags).map_err(errno_to_io)?;
            confine_filesystem(scratch).map_err(errno_to_io)?;
        }
    }

    // Soft CPU limit delivers SIGXCPU at the budget; the hard limit one
    // second later is the backstop if the signal is ignored.
    let cpu_secs = limits.cpu_time_ms.div_ceil(1000).max(1);
    set_limit(Resource::RLIMIT_CPU, cpu_secs, cpu_secs + 1)?;

    let address_space_bytes = limits.memory_kb * 1024 + ADDRESS_SPACE_SLACK_BYTES;
    set_limit(Resource::RLIMIT_AS, address_space_bytes, address_space_bytes)?;
    set_limit(Resource::RLIMIT_FSIZE, limits.output_bytes, limits.output_bytes)?;
    set_limit(Resource::RLIMIT_CORE, 0, 0)?;
    set_limit(Resource::RLIMIT_NPROC, MAX_PROCESSES, MAX_PROCESSES)?;
    set_limit(Resource::RLIMIT_NOFILE, MAX_OPEN_FILES, MAX_OPEN_FILES)?;

    Ok(())
}

/// Inside a fresh user+mount namespace: keep the scratch directory
/// writable through a private bind mount, then flip the rest of the tree
/// read-only.
fn confine_filesystem(scratch: &CStr) -> nix::Result<()> {
    mount(
        None::<&CStr>,
        "/",
        None::<&CStr>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&CStr>,
    )?;
    mount(
        Some(scratch),
        scratch,
        None::<&CStr>,
        MsFlags::MS_BIND,
        None::<&CStr>,
    )?;
    mount(
        None::<&CStr>,
        "/",
        None::<&CStr>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&CStr>,
    )?;
    Ok(())
}

fn set_limit(resource: Resource, soft: u64, hard: u64) -> io::Result<()> {
    setrlimit(resource, soft, hard).map_err(errno_to_io)
}

fn errno_to_io(err: Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

/// SIGKILL the child's whole session. ESRCH means it is already gone.
fn kill_process_group(pid: i32) {
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid, %err, "failed to kill process group"),
    }
}

/// Read a pipe up to `cap` bytes. On overflow the excess is dropped, the
/// truncation is reported, and the producer's process group is killed when
/// a pid is given.
async fn read_capped(
    reader: impl tokio::io::AsyncRead + Unpin,
    cap: u64,
    kill_pid: Option<i32>,
) -> (Vec<u8>, bool) {
    let mut limited = reader.take(cap + 1);
    let mut buf = Vec::new();
    let _ = limited.read_to_end(&mut buf).await;

    let truncated = buf.len() as u64 > cap;
    if truncated {
        buf.truncate(cap as usize);
        if let Some(pid) = kill_pid {
            kill_process_group(pid);
        }
    }
    (buf, truncated)
}

/// Poll /proc for peak memory and accumulated CPU until told to stop.
/// Returns (peak KB, cpu ms); samples after process exit simply fail and
/// the last good values win.
async fn sample_usage(pid: i32, mut stop: watch::Receiver<bool>) -> (u64, u64) {
    let tick_ms = clock_tick_ms();
    let mut peak_kb = 0u64;
    let mut cpu_ms = 0u64;
    let mut interval = tokio::time::interval(Duration::from_millis(SAMPLE_INTERVAL_MS));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Ok(status) = tokio::fs::read_to_string(format!("/proc/{}/status", pid)).await {
                    if let Some(kb) = parse_vm_peak(&status) {
                        peak_kb = peak_kb.max(kb);
                    }
                }
                if let Ok(stat) = tokio::fs::read_to_string(format!("/proc/{}/stat", pid)).await {
                    if let Some(ticks) = parse_cpu_ticks(&stat) {
                        cpu_ms = ticks * tick_ms;
                    }
                }
            }
            _ = stop.changed() => break,
        }
    }

    (peak_kb, cpu_ms)
}

fn parse_vm_peak(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmPeak:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// utime + stime in clock ticks from /proc/<pid>/stat. The comm field can
/// contain spaces, so fields are counted after the closing paren.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

fn clock_tick_ms() -> u64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => 1000 / ticks as u64,
        _ => 10,
    }
}

/// Copy the regular files of `src` into `dst` (no recursion; submission
/// workspaces are flat).
async fn copy_dir_flat(src: &Path, dst: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dst).await?;
    let mut entries = tokio::fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
        let ty = entry.file_type().await?;
        if ty.is_file() {
            tokio::fs::copy(entry.path(), dst.join(entry.file_name())).await?;
        }
    }
    Ok(())
}
