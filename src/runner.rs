//! Test-case runner: drives one submission through compile and all cases.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::compare::outputs_match;
use crate::compiler::compile_submission;
use crate::config::EngineConfig;
use crate::executor::{ExecutionLimits, ExecutionSpec, ExecutionStatus, Executor};
use crate::languages::LanguageRegistry;
use crate::model::{Problem, Submission};
use crate::verdict::{Outcome, TestCaseResult};

/// Per-case results of one submission, in case order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<TestCaseResult>,
    pub compile_message: Option<String>,
    /// Number of candidate-program executions (compile excluded).
    pub executions: u64,
}

pub struct TestCaseRunner {
    executor: Arc<dyn Executor>,
    registry: Arc<LanguageRegistry>,
    config: EngineConfig,
}

impl TestCaseRunner {
    pub fn new(
        executor: Arc<dyn Executor>,
        registry: Arc<LanguageRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Evaluate a submission against every test case of a problem.
    ///
    /// The submission gets a fresh workspace, one compile, then one
    /// execution per case with the compiled artifact reused. `Err` is
    /// infrastructure failure only; program misbehavior lands in the
    /// per-case outcomes.
    pub async fn run(&self, submission: &Submission, problem: &Problem) -> Result<RunReport> {
        let adapter = self.registry.resolve(&submission.language)?;

        let workspace = tempfile::tempdir().context("Failed to create submission workspace")?;
        tokio::fs::write(
            workspace.path().join(&adapter.source_file),
            &submission.source,
        )
        .await
        .context("Failed to write submission source")?;

        let compile = compile_submission(
            &self.executor,
            workspace.path(),
            adapter.compile_command.as_deref(),
            self.config.compile_time_limit_ms,
            self.config.compile_memory_kb,
        )
        .await?;

        if !compile.success {
            let mut results: Vec<TestCaseResult> = problem
                .test_cases
                .iter()
                .enumerate()
                .map(|(i, case)| TestCaseResult::compile_error(i + 1, case.weight))
                .collect();
            if let Some(first) = results.first_mut() {
                first.message = compile.message.clone();
            }
            info!(
                submission_id = submission.id,
                "compilation failed, no cases executed"
            );
            return Ok(RunReport {
                results,
                compile_message: compile.message,
                executions: 0,
            });
        }

        let (cpu_time_ms, memory_kb) = if problem.ignore_language_bonus {
            (problem.limits.cpu_time_ms, problem.limits.memory_kb)
        } else {
            (
                adapter.calculate_time_limit(problem.limits.cpu_time_ms),
                adapter.calculate_memory_limit(problem.limits.memory_kb),
            )
        };
        let limits = ExecutionLimits::new(cpu_time_ms, memory_kb, problem.limits.output_limit_bytes);

        let mut results = Vec::with_capacity(problem.test_cases.len());
        let mut executions = 0u64;
        let mut short_circuited = false;

        for (i, case) in problem.test_cases.iter().enumerate() {
            let case_no = i + 1;

            if short_circuited {
                results.push(TestCaseResult::skipped(case_no, case.weight));
                continue;
            }

            let spec = ExecutionSpec::new(workspace.path())
                .with_command(adapter.run_command.clone())
                .with_limits(limits)
                .with_stdin(case.input.clone().into_bytes());

            let outcome = self
                .executor
                .execute(&spec)
                .await
                .with_context(|| format!("Execution of case {} failed", case_no))?;
            executions += 1;

            let mut result = TestCaseResult::new(case_no, Outcome::Accepted, case.weight);
            result.time_ms = outcome.time_ms;
            result.memory_kb = outcome.memory_kb;
            result.output = Some(preview(&outcome.stdout, self.config.output_preview_bytes));

            result.outcome = match outcome.status {
                ExecutionStatus::Exited(0) => {
                    if outputs_match(&outcome.stdout, &case.expected_output, problem.comparison) {
                        Outcome::Accepted
                    } else {
                        Outcome::WrongAnswer
                    }
                }
                ExecutionStatus::Exited(code) => {
                    result.message = Some(runtime_message(&outcome.stderr, self.config.stderr_limit_bytes)
                        .unwrap_or_else(|| format!("exited with code {}", code)));
                    Outcome::RuntimeError
                }
                ExecutionStatus::Signaled(signal) => {
                    result.message = Some(runtime_message(&outcome.stderr, self.config.stderr_limit_bytes)
                        .unwrap_or_else(|| format!("killed by signal {}", signal)));
                    Outcome::RuntimeError
                }
                ExecutionStatus::TimeLimitExceeded => Outcome::TimeLimitExceeded,
                ExecutionStatus::MemoryLimitExceeded => Outcome::MemoryLimitExceeded,
                ExecutionStatus::OutputLimitExceeded => Outcome::OutputLimitExceeded,
            };

            debug!(
                submission_id = submission.id,
                case_no,
                outcome = %result.outcome,
                time_ms = result.time_ms,
                memory_kb = result.memory_kb,
                "case finished"
            );

            if self.config.stop_on_first_failure && !result.outcome.is_accepted() {
                short_circuited = true;
            }
            results.push(result);
        }

        let accepted = results.iter().filter(|r| r.outcome.is_accepted()).count();
        info!(
            submission_id = submission.id,
            accepted,
            total = results.len(),
            executions,
            "submission evaluated"
        );

        Ok(RunReport {
            results,
            compile_message: None,
            executions,
        })
    }
}

fn preview(output: &[u8], cap_bytes: usize) -> String {
    let mut text = String::from_utf8_lossy(output).into_owned();
    truncate_to_bytes(&mut text, cap_bytes);
    text
}

fn runtime_message(stderr: &str, cap_bytes: usize) -> Option<String> {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut message = trimmed.to_string();
    truncate_to_bytes(&mut message, cap_bytes);
    Some(message)
}

/// Byte-cap truncation that never splits a UTF-8 sequence.
fn truncate_to_bytes(text: &mut String, cap_bytes: usize) {
    if text.len() <= cap_bytes {
        return;
    }
    let mut end = cap_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionOutcome;
    use crate::languages::AdapterSpec;
    use crate::model::{ScoringPolicy, TestCase};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Echoes stdin back, like `cat`.
    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, spec: &ExecutionSpec) -> Result<ExecutionOutcome> {
            Ok(ExecutionOutcome {
                status: ExecutionStatus::Exited(0),
                time_ms: 5,
                wall_ms: 6,
                memory_kb: 128,
                stdout: spec.stdin.clone().unwrap_or_default(),
                stderr: String::new(),
            })
        }
    }

    /// Fails every execution, so compiled languages never build.
    struct FailingExecutor;

    #[async_trait]
    impl Executor for FailingExecutor {
        async fn execute(&self, _spec: &ExecutionSpec) -> Result<ExecutionOutcome> {
            Ok(ExecutionOutcome {
                status: ExecutionStatus::Exited(1),
                time_ms: 1,
                wall_ms: 1,
                memory_kb: 64,
                stdout: Vec::new(),
                stderr: "syntax error".to_string(),
            })
        }
    }

    fn echo_registry() -> Arc<LanguageRegistry> {
        let mut registry = LanguageRegistry::empty();
        registry.insert(
            "echo",
            AdapterSpec {
                source_file: "main.txt".into(),
                compile_command: None,
                run_command: vec!["cat".into()],
                time_limit: None,
                memory_limit: None,
            },
        );
        Arc::new(registry)
    }

    fn compiled_registry() -> Arc<LanguageRegistry> {
        let mut registry = LanguageRegistry::empty();
        registry.insert(
            "compiled",
            AdapterSpec {
                source_file: "main.src".into(),
                compile_command: Some(vec!["cc".into(), "main.src".into()]),
                run_command: vec!["./main".into()],
                time_limit: None,
                memory_limit: None,
            },
        );
        Arc::new(registry)
    }

    fn submission(language: &str) -> Submission {
        Submission {
            id: 1,
            user_id: 10,
            problem_id: 100,
            language: language.into(),
            source: "source text".into(),
            created_at: Utc::now(),
        }
    }

    fn problem(cases: Vec<TestCase>) -> Problem {
        Problem::new(100, "echo the input")
            .with_test_cases(cases)
            .with_scoring(ScoringPolicy::AllOrNothing, 100.0)
    }

    #[tokio::test]
    async fn test_all_cases_in_order() {
        let runner = TestCaseRunner::new(
            Arc::new(EchoExecutor),
            echo_registry(),
            EngineConfig::default(),
        );
        let problem = problem(vec![
            TestCase::new("a\n", "a\n"),
            TestCase::new("b\n", "nope\n"),
            TestCase::new("c\n", "c\n"),
        ]);

        let report = runner.run(&submission("echo"), &problem).await.unwrap();
        assert_eq!(report.executions, 3);
        let outcomes: Vec<Outcome> = report.results.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Accepted, Outcome::WrongAnswer, Outcome::Accepted]
        );
        assert_eq!(report.results[1].case_no, 2);
    }

    #[tokio::test]
    async fn test_compile_failure_runs_nothing() {
        let runner = TestCaseRunner::new(
            Arc::new(FailingExecutor),
            compiled_registry(),
            EngineConfig::default(),
        );
        let problem = problem(vec![TestCase::new("a", "a"), TestCase::new("b", "b")]);

        let report = runner.run(&submission("compiled"), &problem).await.unwrap();
        assert_eq!(report.executions, 0);
        assert!(report
            .results
            .iter()
            .all(|r| r.outcome == Outcome::CompileError));
        assert_eq!(report.compile_message.as_deref(), Some("syntax error"));
    }

    #[tokio::test]
    async fn test_stop_on_first_failure_skips_rest() {
        let config = EngineConfig {
            stop_on_first_failure: true,
            ..EngineConfig::default()
        };
        let runner = TestCaseRunner::new(Arc::new(EchoExecutor), echo_registry(), config);
        let problem = problem(vec![
            TestCase::new("a\n", "a\n"),
            TestCase::new("b\n", "nope\n"),
            TestCase::new("c\n", "c\n"),
        ]);

        let report = runner.run(&submission("echo"), &problem).await.unwrap();
        assert_eq!(report.executions, 2);
        let outcomes: Vec<Outcome> = report.results.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Accepted, Outcome::WrongAnswer, Outcome::Skipped]
        );
    }

    #[test]
    fn test_preview_caps_bytes_on_char_boundary() {
        // "abc" followed by a three-byte euro sign; a 4-byte cap lands
        // mid-character and must back off to the boundary.
        assert_eq!(preview("abc\u{20ac}".as_bytes(), 4), "abc");
        assert_eq!(preview(b"abcdef", 4), "abcd");
        assert_eq!(preview(b"abc", 16), "abc");
    }

    #[tokio::test]
    async fn test_unknown_language_is_error() {
        let runner = TestCaseRunner::new(
            Arc::new(EchoExecutor),
            echo_registry(),
            EngineConfig::default(),
        );
        let problem = problem(vec![TestCase::new("a", "a")]);
        assert!(runner.run(&submission("cobol"), &problem).await.is_err());
    }
}
