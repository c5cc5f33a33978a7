//! Core data model: problems, submissions, contests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verdict::Verdict;

pub type UserId = i64;
pub type ProblemId = i64;
pub type SubmissionId = i64;
pub type ContestId = i64;

/// One input/expected-output pair with an optional scoring weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Base resource limits for a problem, before language adjustment.
///
/// Time is milliseconds, memory is KB. The wall-clock budget is derived
/// from the CPU budget by the executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub cpu_time_ms: u64,
    pub memory_kb: u64,
    pub output_limit_bytes: u64,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            cpu_time_ms: 1000,
            memory_kb: 256 * 1024,
            output_limit_bytes: 8 * 1024 * 1024,
        }
    }
}

/// How a program's output is compared against the expected output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// Ignore trailing whitespace on each line and trailing empty lines.
    TrimTrailing,
}

/// How per-case results are reduced to a score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Full score iff every case is accepted, zero otherwise.
    #[default]
    AllOrNothing,
    /// Partial credit proportional to the accepted weight.
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: ProblemId,
    pub statement: String,
    pub test_cases: Vec<TestCase>,
    pub limits: ResourceProfile,
    pub comparison: ComparisonMode,
    pub scoring: ScoringPolicy,
    pub max_score: f64,
    /// Skip the per-language limit multipliers for this problem.
    #[serde(default)]
    pub ignore_language_bonus: bool,
}

impl Problem {
    pub fn new(id: ProblemId, statement: impl Into<String>) -> Self {
        Self {
            id,
            statement: statement.into(),
            test_cases: Vec::new(),
            limits: ResourceProfile::default(),
            comparison: ComparisonMode::default(),
            scoring: ScoringPolicy::default(),
            max_score: 100.0,
            ignore_language_bonus: false,
        }
    }

    pub fn with_test_cases(mut self, test_cases: Vec<TestCase>) -> Self {
        self.test_cases = test_cases;
        self
    }

    pub fn with_limits(mut self, limits: ResourceProfile) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_comparison(mut self, comparison: ComparisonMode) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringPolicy, max_score: f64) -> Self {
        self.scoring = scoring;
        self.max_score = max_score;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub language: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a submission inside the service.
///
/// Pending -> Running -> Judged; Cancelled is terminal and reachable from
/// Pending or Running only.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionState {
    Pending,
    Running,
    Judged(Verdict),
    Cancelled,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Judged(_) | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
    pub id: ContestId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub problem_ids: Vec<ProblemId>,
    pub participant_ids: Vec<UserId>,
}

impl Contest {
    pub fn contains_problem(&self, problem_id: ProblemId) -> bool {
        self.problem_ids.contains(&problem_id)
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }
}
