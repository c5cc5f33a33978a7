//! Engine configuration.

use crate::executor::IsolationMode;
use crate::leaderboard::ScoreAggregation;

/// Tunables for the evaluation service. Defaults are usable as-is;
/// `from_env` overrides individual fields from `GAVEL_*` variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent evaluation workers.
    pub worker_count: usize,
    /// Capacity of the pending-submission queue.
    pub queue_capacity: usize,
    /// CPU time allowed for compilation, in ms.
    pub compile_time_limit_ms: u64,
    /// Memory allowed for compilation, in KB.
    pub compile_memory_kb: u64,
    /// Maximum accepted submission source size, in bytes.
    pub max_source_bytes: usize,
    /// Per-case stdout preview kept in results, in bytes.
    pub output_preview_bytes: usize,
    /// Cap on captured stderr, in bytes.
    pub stderr_limit_bytes: usize,
    /// Retries on infrastructure failure before the submission is marked error.
    pub max_retries: u32,
    /// Mark remaining cases skipped after the first non-accepted case.
    pub stop_on_first_failure: bool,
    /// Leaderboard aggregation policy.
    pub score_aggregation: ScoreAggregation,
    /// Executor backend selection.
    pub isolation: IsolationMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            compile_time_limit_ms: 30_000,
            compile_memory_kb: 2 * 1024 * 1024,
            max_source_bytes: 256 * 1024,
            output_preview_bytes: 4096,
            stderr_limit_bytes: 4096,
            max_retries: 2,
            stop_on_first_failure: false,
            score_aggregation: ScoreAggregation::default(),
            isolation: IsolationMode::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with `GAVEL_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_env("GAVEL_WORKER_COUNT") {
            config.worker_count = n;
        }
        if let Some(n) = parse_env("GAVEL_QUEUE_CAPACITY") {
            config.queue_capacity = n;
        }
        if let Some(n) = parse_env("GAVEL_COMPILE_TIME_LIMIT_MS") {
            config.compile_time_limit_ms = n;
        }
        if let Some(n) = parse_env("GAVEL_COMPILE_MEMORY_KB") {
            config.compile_memory_kb = n;
        }
        if let Some(n) = parse_env("GAVEL_MAX_SOURCE_BYTES") {
            config.max_source_bytes = n;
        }
        if let Some(n) = parse_env("GAVEL_MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(b) = parse_env("GAVEL_STOP_ON_FIRST_FAILURE") {
            config.stop_on_first_failure = b;
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_retries, 2);
        assert!(!config.stop_on_first_failure);
    }
}
