//! Boundary to the surrounding contest platform.
//!
//! The platform owns the problem catalog, contest scheduling, and user
//! registration; the engine pulls what it needs through this trait and
//! pushes verdicts back. `MemoryPlatform` backs tests and embedded use.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{Contest, Problem, ProblemId, SubmissionId, UserId};
use crate::verdict::Verdict;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Problem definition including its test-case matrix.
    async fn problem(&self, problem_id: ProblemId) -> Result<Option<Problem>>;

    /// The contest a problem is currently attached to, if any. Problems
    /// outside any contest are judged ungated.
    async fn contest_for_problem(&self, problem_id: ProblemId) -> Result<Option<Contest>>;

    /// Registration beyond the contest's own participant roster.
    async fn is_user_registered(&self, user_id: UserId, contest: &Contest) -> Result<bool>;

    /// Called once per submission when its verdict becomes final.
    async fn verdict_ready(&self, submission_id: SubmissionId, verdict: &Verdict) -> Result<()>;
}

/// In-memory platform for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryPlatform {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    problems: HashMap<ProblemId, Problem>,
    contests: Vec<Contest>,
    verdicts: HashMap<SubmissionId, Verdict>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_problem(&self, problem: Problem) {
        self.inner.write().await.problems.insert(problem.id, problem);
    }

    pub async fn add_contest(&self, contest: Contest) {
        self.inner.write().await.contests.push(contest);
    }

    /// Verdicts delivered so far, keyed by submission.
    pub async fn verdicts(&self) -> HashMap<SubmissionId, Verdict> {
        self.inner.read().await.verdicts.clone()
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn problem(&self, problem_id: ProblemId) -> Result<Option<Problem>> {
        Ok(self.inner.read().await.problems.get(&problem_id).cloned())
    }

    async fn contest_for_problem(&self, problem_id: ProblemId) -> Result<Option<Contest>> {
        Ok(self
            .inner
            .read()
            .await
            .contests
            .iter()
            .find(|c| c.contains_problem(problem_id))
            .cloned())
    }

    async fn is_user_registered(&self, user_id: UserId, contest: &Contest) -> Result<bool> {
        Ok(contest.has_participant(user_id))
    }

    async fn verdict_ready(&self, submission_id: SubmissionId, verdict: &Verdict) -> Result<()> {
        self.inner
            .write()
            .await
            .verdicts
            .insert(submission_id, verdict.clone());
        Ok(())
    }
}
