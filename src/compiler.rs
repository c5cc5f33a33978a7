//! Compilation step, executed once per submission.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::executor::{ExecutionLimits, ExecutionSpec, Executor};

/// Outcome of compiling a submission. `success == false` carries the
/// diagnostic shown to the user.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub success: bool,
    pub message: Option<String>,
}

/// Compile the sources in `work_dir` in place; artifacts land back in
/// `work_dir` so the run step can reuse them across test cases.
///
/// An absent compile command (interpreted languages) succeeds immediately.
pub async fn compile_submission(
    executor: &Arc<dyn Executor>,
    work_dir: &Path,
    compile_command: Option<&[String]>,
    time_limit_ms: u64,
    memory_kb: u64,
) -> Result<CompileResult> {
    let command = match compile_command {
        Some(command) if !command.is_empty() => command,
        _ => {
            debug!("no compile step for this language");
            return Ok(CompileResult {
                success: true,
                message: None,
            });
        }
    };

    let spec = ExecutionSpec::new(work_dir)
        .with_command(command.to_vec())
        .with_limits(ExecutionLimits::new(time_limit_ms, memory_kb, 8 * 1024 * 1024))
        .with_copy_out_dir(work_dir);

    let outcome = executor
        .execute(&spec)
        .await
        .context("Compiler execution failed")?;

    if outcome.status.success() {
        info!(time_ms = outcome.time_ms, "compilation succeeded");
        return Ok(CompileResult {
            success: true,
            message: None,
        });
    }

    // Prefer stderr, then stdout, then a generic status line.
    let message = if !outcome.stderr.trim().is_empty() {
        outcome.stderr
    } else if !outcome.stdout.is_empty() {
        String::from_utf8_lossy(&outcome.stdout).to_string()
    } else {
        format!("compiler terminated with status {:?}", outcome.status)
    };

    info!(status = ?outcome.status, "compilation failed");
    Ok(CompileResult {
        success: false,
        message: Some(message),
    })
}
