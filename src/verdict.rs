//! Verdict engine: per-case outcomes and their reduction to a verdict.

use serde::{Deserialize, Serialize};

use crate::model::ScoringPolicy;

/// Outcome of a single test case, or of a whole submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    CompileError,
    Skipped,
    Error,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Ordering used to pick the overall label under weighted scoring.
    /// Higher is worse.
    fn severity(&self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::Skipped => 1,
            Self::WrongAnswer => 2,
            Self::RuntimeError => 3,
            Self::OutputLimitExceeded => 4,
            Self::TimeLimitExceeded => 5,
            Self::MemoryLimitExceeded => 6,
            Self::Error => 7,
            Self::CompileError => 8,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::RuntimeError => "runtime_error",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::MemoryLimitExceeded => "memory_limit_exceeded",
            Self::OutputLimitExceeded => "output_limit_exceeded",
            Self::CompileError => "compile_error",
            Self::Skipped => "skipped",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Result of running one test case. `case_no` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub case_no: usize,
    pub outcome: Outcome,
    pub weight: f64,
    pub time_ms: u64,
    pub memory_kb: u64,
    pub output: Option<String>,
    pub message: Option<String>,
}

impl TestCaseResult {
    pub fn new(case_no: usize, outcome: Outcome, weight: f64) -> Self {
        Self {
            case_no,
            outcome,
            weight,
            time_ms: 0,
            memory_kb: 0,
            output: None,
            message: None,
        }
    }

    pub fn skipped(case_no: usize, weight: f64) -> Self {
        Self::new(case_no, Outcome::Skipped, weight)
    }

    pub fn compile_error(case_no: usize, weight: f64) -> Self {
        Self::new(case_no, Outcome::CompileError, weight)
    }
}

/// Final judgment of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub score: f64,
    /// 1-based index of the earliest non-accepted case, if any.
    pub first_failure: Option<usize>,
    pub max_time_ms: u64,
    pub max_memory_kb: u64,
    pub message: Option<String>,
}

impl Verdict {
    /// Terminal verdict when evaluation itself failed after retries.
    pub fn infrastructure_error(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Error,
            score: 0.0,
            first_failure: None,
            max_time_ms: 0,
            max_memory_kb: 0,
            message: Some(message.into()),
        }
    }
}

/// Reduce per-case results to a verdict. Pure and idempotent.
pub fn reduce(results: &[TestCaseResult], policy: ScoringPolicy, max_score: f64) -> Verdict {
    let max_time_ms = results.iter().map(|r| r.time_ms).max().unwrap_or(0);
    let max_memory_kb = results.iter().map(|r| r.memory_kb).max().unwrap_or(0);

    let first_failure = results
        .iter()
        .find(|r| !r.outcome.is_accepted())
        .map(|r| r.case_no);

    // Compile failure dominates everything else.
    if results.iter().any(|r| r.outcome == Outcome::CompileError) {
        let message = results.iter().find_map(|r| r.message.clone());
        return Verdict {
            outcome: Outcome::CompileError,
            score: 0.0,
            first_failure,
            max_time_ms: 0,
            max_memory_kb: 0,
            message,
        };
    }

    match policy {
        ScoringPolicy::AllOrNothing => match results.iter().find(|r| !r.outcome.is_accepted()) {
            Some(failed) => Verdict {
                outcome: failed.outcome,
                score: 0.0,
                first_failure,
                max_time_ms,
                max_memory_kb,
                message: failed.message.clone(),
            },
            None => Verdict {
                outcome: Outcome::Accepted,
                score: max_score,
                first_failure: None,
                max_time_ms,
                max_memory_kb,
                message: None,
            },
        },
        ScoringPolicy::Weighted => {
            let total_weight: f64 = results.iter().map(|r| r.weight).sum();
            let accepted_weight: f64 = results
                .iter()
                .filter(|r| r.outcome.is_accepted())
                .map(|r| r.weight)
                .sum();

            let score = if total_weight > 0.0 {
                max_score * accepted_weight / total_weight
            } else if first_failure.is_none() {
                max_score
            } else {
                0.0
            };

            // Worst observed outcome labels the verdict; earliest case wins ties.
            let worst = results
                .iter()
                .max_by_key(|r| (r.outcome.severity(), std::cmp::Reverse(r.case_no)));

            match worst {
                Some(worst) if !worst.outcome.is_accepted() => Verdict {
                    outcome: worst.outcome,
                    score,
                    first_failure,
                    max_time_ms,
                    max_memory_kb,
                    message: worst.message.clone(),
                },
                _ => Verdict {
                    outcome: Outcome::Accepted,
                    score,
                    first_failure: None,
                    max_time_ms,
                    max_memory_kb,
                    message: None,
                },
            }
        }
    }
}
