//! Evaluation service: queue, worker pool, cancellation, verdict store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::SubmitError;
use crate::executor::{build_executor, Executor};
use crate::gate;
use crate::languages::LanguageRegistry;
use crate::leaderboard::{self, LeaderboardEntry, ScoredSubmission};
use crate::model::{
    Contest, ContestId, Problem, ProblemId, Submission, SubmissionId, SubmissionState, UserId,
};
use crate::platform::Platform;
use crate::runner::TestCaseRunner;
use crate::verdict::{reduce, Verdict};

struct SubmissionRecord {
    submission: Submission,
    state: SubmissionState,
    judged_at: Option<DateTime<Utc>>,
    contest: Option<Contest>,
}

struct Inner {
    config: EngineConfig,
    runner: TestCaseRunner,
    platform: Arc<dyn Platform>,
    submissions: RwLock<HashMap<SubmissionId, SubmissionRecord>>,
    cancels: Mutex<HashMap<SubmissionId, watch::Sender<bool>>>,
    leaderboards: RwLock<HashMap<ContestId, Vec<LeaderboardEntry>>>,
    next_id: AtomicI64,
}

/// The engine's front door. Owns the submission queue and the worker pool;
/// every public method is safe to call concurrently.
pub struct JudgeService {
    inner: Arc<Inner>,
    queue_tx: mpsc::Sender<SubmissionId>,
    workers: Vec<JoinHandle<()>>,
}

impl JudgeService {
    pub fn new(
        platform: Arc<dyn Platform>,
        registry: LanguageRegistry,
        config: EngineConfig,
    ) -> Self {
        let executor = build_executor(&config.isolation);
        Self::with_executor(platform, registry, config, executor)
    }

    /// Construction with an explicit executor backend, used by tests and
    /// embedders with their own isolation.
    pub fn with_executor(
        platform: Arc<dyn Platform>,
        registry: LanguageRegistry,
        config: EngineConfig,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let runner = TestCaseRunner::new(executor, Arc::new(registry), config.clone());

        let inner = Arc::new(Inner {
            config: config.clone(),
            runner,
            platform,
            submissions: RwLock::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            leaderboards: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        });

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let workers = (0..config.worker_count)
            .map(|worker_id| {
                let inner = inner.clone();
                let queue_rx = queue_rx.clone();
                tokio::spawn(worker_loop(worker_id, inner, queue_rx))
            })
            .collect();

        Self {
            inner,
            queue_tx,
            workers,
        }
    }

    /// Validate and enqueue a submission. All user errors surface here,
    /// before any process is spawned.
    pub async fn submit(
        &self,
        user_id: UserId,
        problem_id: ProblemId,
        language: &str,
        source: String,
    ) -> Result<SubmissionId, SubmitError> {
        if source.len() > self.inner.config.max_source_bytes {
            return Err(SubmitError::SourceTooLarge {
                limit: self.inner.config.max_source_bytes,
                actual: source.len(),
            });
        }
        self.inner.runner.registry().resolve(language)?;

        self.inner
            .platform
            .problem(problem_id)
            .await
            .map_err(SubmitError::Platform)?
            .ok_or(SubmitError::UnknownProblem(problem_id))?;

        let contest = self
            .inner
            .platform
            .contest_for_problem(problem_id)
            .await
            .map_err(SubmitError::Platform)?;

        if let Some(contest) = &contest {
            let registered = self
                .inner
                .platform
                .is_user_registered(user_id, contest)
                .await
                .map_err(SubmitError::Platform)?;
            gate::authorize(user_id, problem_id, contest, registered, Utc::now())?;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let submission = Submission {
            id,
            user_id,
            problem_id,
            language: language.to_string(),
            source,
            created_at: Utc::now(),
        };

        self.inner.submissions.write().await.insert(
            id,
            SubmissionRecord {
                submission,
                state: SubmissionState::Pending,
                judged_at: None,
                contest,
            },
        );

        if self.queue_tx.send(id).await.is_err() {
            self.inner.submissions.write().await.remove(&id);
            return Err(SubmitError::QueueClosed);
        }

        info!(submission_id = id, user_id, problem_id, language, "submission accepted");
        Ok(id)
    }

    /// Cancel a pending or running submission. Returns false if it is
    /// already terminal or unknown.
    pub async fn cancel(&self, submission_id: SubmissionId) -> bool {
        {
            let mut submissions = self.inner.submissions.write().await;
            let Some(record) = submissions.get_mut(&submission_id) else {
                return false;
            };
            if record.state.is_terminal() {
                return false;
            }
            record.state = SubmissionState::Cancelled;
        }

        if let Some(cancel) = self.inner.cancels.lock().await.remove(&submission_id) {
            let _ = cancel.send(true);
        }
        info!(submission_id, "submission cancelled");
        true
    }

    pub async fn state(&self, submission_id: SubmissionId) -> Option<SubmissionState> {
        self.inner
            .submissions
            .read()
            .await
            .get(&submission_id)
            .map(|record| record.state.clone())
    }

    pub async fn verdict(&self, submission_id: SubmissionId) -> Option<Verdict> {
        match self.state(submission_id).await {
            Some(SubmissionState::Judged(verdict)) => Some(verdict),
            _ => None,
        }
    }

    /// Current leaderboard snapshot for a contest.
    pub async fn leaderboard(&self, contest_id: ContestId) -> Vec<LeaderboardEntry> {
        self.inner
            .leaderboards
            .read()
            .await
            .get(&contest_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Force a recomputation from the current verdict store.
    pub async fn recompute_leaderboard(&self, contest: &Contest) {
        refresh_leaderboard(&self.inner, contest).await;
    }

    /// Stop accepting submissions and wait for in-flight evaluations.
    pub async fn shutdown(self) {
        drop(self.queue_tx);
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!(%err, "worker task failed during shutdown");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    inner: Arc<Inner>,
    queue_rx: Arc<Mutex<mpsc::Receiver<SubmissionId>>>,
) {
    loop {
        // Hold the receiver lock only for the dequeue itself.
        let next = { queue_rx.lock().await.recv().await };
        match next {
            Some(submission_id) => evaluate_one(&inner, submission_id).await,
            None => break,
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn evaluate_one(inner: &Arc<Inner>, submission_id: SubmissionId) {
    let (submission, contest) = {
        let mut submissions = inner.submissions.write().await;
        let Some(record) = submissions.get_mut(&submission_id) else {
            return;
        };
        if !matches!(record.state, SubmissionState::Pending) {
            // Cancelled while queued.
            return;
        }
        record.state = SubmissionState::Running;
        (record.submission.clone(), record.contest.clone())
    };

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    inner.cancels.lock().await.insert(submission_id, cancel_tx);

    // cancel() may have flipped the state between the two locks above,
    // before our channel was registered.
    let still_running = matches!(
        inner
            .submissions
            .read()
            .await
            .get(&submission_id)
            .map(|r| &r.state),
        Some(SubmissionState::Running)
    );
    if !still_running {
        inner.cancels.lock().await.remove(&submission_id);
        return;
    }

    let verdict = tokio::select! {
        _ = wait_cancelled(&mut cancel_rx) => None,
        verdict = judge_with_retries(inner, &submission) => Some(verdict),
    };

    inner.cancels.lock().await.remove(&submission_id);

    let Some(verdict) = verdict else {
        debug!(submission_id, "evaluation aborted by cancellation");
        return;
    };

    let judged_at = Utc::now();
    {
        let mut submissions = inner.submissions.write().await;
        let Some(record) = submissions.get_mut(&submission_id) else {
            return;
        };
        if !matches!(record.state, SubmissionState::Running) {
            // Lost the race against cancellation; drop the verdict.
            return;
        }
        record.state = SubmissionState::Judged(verdict.clone());
        record.judged_at = Some(judged_at);
    }

    info!(
        submission_id,
        outcome = %verdict.outcome,
        score = verdict.score,
        max_time_ms = verdict.max_time_ms,
        max_memory_kb = verdict.max_memory_kb,
        "submission judged"
    );

    if let Err(err) = inner.platform.verdict_ready(submission_id, &verdict).await {
        warn!(submission_id, %err, "verdict delivery to platform failed");
    }

    if let Some(contest) = contest {
        refresh_leaderboard(inner, &contest).await;
    }
}

/// Resolves only when cancellation actually fires; a dropped sender parks
/// forever so the evaluation branch wins the select.
async fn wait_cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    // The Ok value is a read guard into the channel; it must not live
    // across an await point or the worker future stops being Send.
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn judge_with_retries(inner: &Arc<Inner>, submission: &Submission) -> Verdict {
    let problem: Problem = match inner.platform.problem(submission.problem_id).await {
        Ok(Some(problem)) => problem,
        Ok(None) => {
            error!(
                submission_id = submission.id,
                problem_id = submission.problem_id,
                "problem disappeared before evaluation"
            );
            return Verdict::infrastructure_error("problem no longer exists");
        }
        Err(err) => {
            error!(submission_id = submission.id, %err, "problem fetch failed");
            return Verdict::infrastructure_error(format!("problem fetch failed: {err:#}"));
        }
    };

    let mut attempt = 0u32;
    loop {
        match inner.runner.run(submission, &problem).await {
            Ok(report) => {
                return reduce(&report.results, problem.scoring, problem.max_score);
            }
            Err(err) => {
                attempt += 1;
                if attempt > inner.config.max_retries {
                    error!(
                        submission_id = submission.id,
                        attempts = attempt,
                        %err,
                        "evaluation failed, giving up"
                    );
                    return Verdict::infrastructure_error(format!(
                        "evaluation failed after {} attempts: {err:#}",
                        attempt
                    ));
                }
                warn!(submission_id = submission.id, attempt, %err, "evaluation failed, retrying");
            }
        }
    }
}

async fn refresh_leaderboard(inner: &Arc<Inner>, contest: &Contest) {
    // One read lock: the snapshot never mixes verdicts from different
    // points in time.
    let rows: Vec<ScoredSubmission> = {
        let submissions = inner.submissions.read().await;
        submissions
            .values()
            .filter_map(|record| match &record.state {
                SubmissionState::Judged(verdict) => Some(ScoredSubmission {
                    user_id: record.submission.user_id,
                    problem_id: record.submission.problem_id,
                    outcome: verdict.outcome,
                    score: verdict.score,
                    judged_at: record.judged_at.unwrap_or(record.submission.created_at),
                }),
                _ => None,
            })
            .collect()
    };

    let entries = leaderboard::recompute(contest, &rows, inner.config.score_aggregation);
    inner
        .leaderboards
        .write()
        .await
        .insert(contest.id, entries);
}
