//! End-to-end tests driving the full pipeline with shell-based languages,
//! so no compiler toolchain is needed on the test host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gavel::languages::AdapterSpec;
use gavel::model::{ComparisonMode, ScoringPolicy};
use gavel::{
    Contest, EngineConfig, JudgeService, LanguageRegistry, MemoryPlatform, Outcome, Problem,
    SubmissionState, SubmitError, TestCase, Verdict,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn shell_registry() -> LanguageRegistry {
    let mut registry = LanguageRegistry::empty();
    registry.insert(
        "shell",
        AdapterSpec {
            source_file: "main.sh".into(),
            compile_command: None,
            run_command: vec!["/bin/sh".into(), "main.sh".into()],
            time_limit: None,
            memory_limit: None,
        },
    );
    // A "compiled" shell whose compile step always fails.
    registry.insert(
        "broken-shell",
        AdapterSpec {
            source_file: "main.sh".into(),
            compile_command: Some(vec!["false".into()]),
            run_command: vec!["/bin/sh".into(), "main.sh".into()],
            time_limit: None,
            memory_limit: None,
        },
    );
    registry
}

fn echo_problem(id: i64) -> Problem {
    Problem::new(id, "echo the input back")
        .with_test_cases(vec![
            TestCase::new("alpha\n", "alpha\n"),
            TestCase::new("beta\n", "beta\n"),
        ])
        .with_comparison(ComparisonMode::TrimTrailing)
}

async fn service_with(problems: Vec<Problem>, contests: Vec<Contest>) -> (JudgeService, Arc<MemoryPlatform>) {
    init_tracing();
    let platform = Arc::new(MemoryPlatform::new());
    for problem in problems {
        platform.add_problem(problem).await;
    }
    for contest in contests {
        platform.add_contest(contest).await;
    }
    let service = JudgeService::new(platform.clone(), shell_registry(), EngineConfig::default());
    (service, platform)
}

async fn wait_for_verdict(service: &JudgeService, id: i64) -> Verdict {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        if let Some(verdict) = service.verdict(id).await {
            return verdict;
        }
        if let Some(SubmissionState::Cancelled) = service.state(id).await {
            panic!("submission {} was cancelled while awaiting verdict", id);
        }
        assert!(Instant::now() < deadline, "timed out waiting for verdict");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn active_contest(id: i64, problem_ids: Vec<i64>, participant_ids: Vec<i64>) -> Contest {
    let now = chrono::Utc::now();
    Contest {
        id,
        start: now - chrono::Duration::hours(1),
        end: now + chrono::Duration::hours(1),
        problem_ids,
        participant_ids,
    }
}

#[tokio::test]
async fn accepted_submission_scores_full() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;
    let id = service.submit(10, 1, "shell", "cat".into()).await.unwrap();

    let verdict = wait_for_verdict(&service, id).await;
    assert_eq!(verdict.outcome, Outcome::Accepted);
    assert_eq!(verdict.score, 100.0);
    assert_eq!(verdict.first_failure, None);
}

#[tokio::test]
async fn wrong_output_is_wrong_answer() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;
    let id = service
        .submit(10, 1, "shell", "echo not-the-answer".into())
        .await
        .unwrap();

    let verdict = wait_for_verdict(&service, id).await;
    assert_eq!(verdict.outcome, Outcome::WrongAnswer);
    assert_eq!(verdict.score, 0.0);
    assert_eq!(verdict.first_failure, Some(1));
}

#[tokio::test]
async fn weighted_partial_credit() {
    // Three equal-weight cases, the program fails case 2, max score 90.
    let problem = Problem::new(1, "echo, but case 2 expects something else")
        .with_test_cases(vec![
            TestCase::new("a\n", "a\n"),
            TestCase::new("b\n", "unreachable\n"),
            TestCase::new("c\n", "c\n"),
        ])
        .with_comparison(ComparisonMode::TrimTrailing)
        .with_scoring(ScoringPolicy::Weighted, 90.0);
    let (service, _) = service_with(vec![problem], vec![]).await;

    let id = service.submit(10, 1, "shell", "cat".into()).await.unwrap();
    let verdict = wait_for_verdict(&service, id).await;

    assert_eq!(verdict.outcome, Outcome::WrongAnswer);
    assert!((verdict.score - 60.0).abs() < 1e-9);
    assert_eq!(verdict.first_failure, Some(2));
}

#[tokio::test]
async fn infinite_loop_terminates_with_tle() {
    let mut problem = echo_problem(1);
    problem.test_cases = vec![TestCase::new("", "")];
    problem.limits.cpu_time_ms = 300;
    let (service, _) = service_with(vec![problem], vec![]).await;

    let start = Instant::now();
    let id = service
        .submit(10, 1, "shell", "while :; do :; done".into())
        .await
        .unwrap();
    let verdict = wait_for_verdict(&service, id).await;

    assert_eq!(verdict.outcome, Outcome::TimeLimitExceeded);
    assert_eq!(verdict.score, 0.0);
    // Wall budget is 2 * cpu + 1s; everything beyond that is overhead.
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn compile_failure_short_circuits() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;
    let id = service
        .submit(10, 1, "broken-shell", "cat".into())
        .await
        .unwrap();

    let verdict = wait_for_verdict(&service, id).await;
    assert_eq!(verdict.outcome, Outcome::CompileError);
    assert_eq!(verdict.score, 0.0);
    assert_eq!(verdict.max_time_ms, 0);
}

#[tokio::test]
async fn crashing_program_is_runtime_error() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;
    let id = service.submit(10, 1, "shell", "exit 3".into()).await.unwrap();

    let verdict = wait_for_verdict(&service, id).await;
    assert_eq!(verdict.outcome, Outcome::RuntimeError);
}

#[tokio::test]
async fn unsupported_language_rejected_at_submit() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;
    let err = service.submit(10, 1, "malbolge", "x".into()).await.unwrap_err();
    assert!(matches!(err, SubmitError::UnsupportedLanguage(_)));
}

#[tokio::test]
async fn oversized_source_rejected_at_submit() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;
    let huge = "x".repeat(EngineConfig::default().max_source_bytes + 1);
    let err = service.submit(10, 1, "shell", huge).await.unwrap_err();
    assert!(matches!(err, SubmitError::SourceTooLarge { .. }));
}

#[tokio::test]
async fn closed_contest_rejects_submissions() {
    let now = chrono::Utc::now();
    let contest = Contest {
        id: 7,
        start: now - chrono::Duration::hours(2),
        end: now - chrono::Duration::hours(1),
        problem_ids: vec![1],
        participant_ids: vec![10],
    };
    let (service, _) = service_with(vec![echo_problem(1)], vec![contest]).await;

    let err = service.submit(10, 1, "shell", "cat".into()).await.unwrap_err();
    assert!(matches!(err, SubmitError::Gate(_)));
}

#[tokio::test]
async fn unregistered_user_rejected() {
    let contest = active_contest(7, vec![1], vec![10]);
    let (service, _) = service_with(vec![echo_problem(1)], vec![contest]).await;

    let err = service.submit(99, 1, "shell", "cat".into()).await.unwrap_err();
    assert!(matches!(err, SubmitError::Gate(_)));
}

#[tokio::test]
async fn cancellation_is_prompt_and_terminal() {
    let mut problem = echo_problem(1);
    problem.test_cases = vec![TestCase::new("", "")];
    problem.limits.cpu_time_ms = 5000;
    let (service, _) = service_with(vec![problem], vec![]).await;

    let id = service.submit(10, 1, "shell", "sleep 30".into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    assert!(service.cancel(id).await);
    assert!(start.elapsed() < Duration::from_secs(1));

    assert!(matches!(
        service.state(id).await,
        Some(SubmissionState::Cancelled)
    ));
    assert!(service.verdict(id).await.is_none());

    // Cancelling a terminal submission is a no-op.
    assert!(!service.cancel(id).await);
}

fn process_with_marker_alive(marker: &str) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    for entry in entries.flatten() {
        if let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) {
            if String::from_utf8_lossy(&cmdline).contains(marker) {
                return true;
            }
        }
    }
    false
}

#[tokio::test]
async fn cancellation_kills_whole_process_tree() {
    let mut problem = echo_problem(1);
    problem.test_cases = vec![TestCase::new("", "")];
    problem.limits.cpu_time_ms = 5000;
    let (service, _) = service_with(vec![problem], vec![]).await;

    // The background shell keeps the marker in its argv for the /proc
    // scan; the two-command body keeps it from exec-optimizing into a
    // bare sleep.
    let marker = format!("cancel-tree-{}", std::process::id());
    let source = format!("sh -c 'sleep 60; :' {} & sleep 60", marker);
    let id = service.submit(10, 1, "shell", source).await.unwrap();

    let start_deadline = Instant::now() + Duration::from_secs(5);
    while !process_with_marker_alive(&marker) {
        assert!(
            Instant::now() < start_deadline,
            "submission never started running"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert!(service.cancel(id).await);

    let deadline = Instant::now() + Duration::from_secs(3);
    while process_with_marker_alive(&marker) {
        assert!(
            Instant::now() < deadline,
            "descendant process survived cancellation"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn verdict_delivered_to_platform() {
    let (service, platform) = service_with(vec![echo_problem(1)], vec![]).await;
    let id = service.submit(10, 1, "shell", "cat".into()).await.unwrap();
    wait_for_verdict(&service, id).await;

    let verdicts = platform.verdicts().await;
    assert_eq!(verdicts.get(&id).map(|v| v.outcome), Some(Outcome::Accepted));
}

#[tokio::test]
async fn leaderboard_orders_by_score_then_time() {
    let contest = active_contest(7, vec![1], vec![10, 11]);
    let (service, _) = service_with(vec![echo_problem(1)], vec![contest]).await;

    let losing = service
        .submit(11, 1, "shell", "echo wrong".into())
        .await
        .unwrap();
    wait_for_verdict(&service, losing).await;

    let winning = service.submit(10, 1, "shell", "cat".into()).await.unwrap();
    wait_for_verdict(&service, winning).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    let entries = loop {
        let entries = service.leaderboard(7).await;
        if entries.len() == 2 {
            break entries;
        }
        assert!(Instant::now() < deadline, "leaderboard never settled");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(entries[0].user_id, 10);
    assert_eq!(entries[0].score, 100.0);
    assert_eq!(entries[1].user_id, 11);
    assert_eq!(entries[1].score, 0.0);
}

#[tokio::test]
async fn repeated_evaluation_is_deterministic() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;

    let first = service.submit(10, 1, "shell", "cat".into()).await.unwrap();
    let second = service.submit(10, 1, "shell", "cat".into()).await.unwrap();

    let a = wait_for_verdict(&service, first).await;
    let b = wait_for_verdict(&service, second).await;

    assert_eq!(a.outcome, b.outcome);
    assert_eq!(a.score, b.score);
    assert_eq!(a.first_failure, b.first_failure);
}

#[tokio::test]
async fn shutdown_drains_workers() {
    let (service, _) = service_with(vec![echo_problem(1)], vec![]).await;
    let id = service.submit(10, 1, "shell", "cat".into()).await.unwrap();
    let verdict = wait_for_verdict(&service, id).await;
    assert_eq!(verdict.outcome, Outcome::Accepted);
    service.shutdown().await;
}
