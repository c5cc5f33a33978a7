//! Submission evaluation engine for a competitive-programming platform.
//!
//! Takes untrusted source code, runs it against a problem's test cases
//! under strict resource limits, reduces the results to a verdict and a
//! score, gates submissions on contest windows, and derives leaderboards.
//! The surrounding platform talks to the engine through the [`Platform`]
//! trait and [`JudgeService`].

pub mod compare;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod languages;
pub mod leaderboard;
pub mod model;
pub mod platform;
pub mod runner;
pub mod service;
pub mod verdict;

pub use config::EngineConfig;
pub use error::SubmitError;
pub use executor::{Executor, IsolationMode, NamespaceIsolation};
pub use gate::{ContestPhase, GateError};
pub use languages::{LanguageRegistry, UnsupportedLanguage};
pub use leaderboard::{LeaderboardEntry, ScoreAggregation};
pub use model::{
    Contest, ContestId, Problem, ProblemId, ResourceProfile, Submission, SubmissionId,
    SubmissionState, TestCase, UserId,
};
pub use platform::{MemoryPlatform, Platform};
pub use service::JudgeService;
pub use verdict::{Outcome, TestCaseResult, Verdict};
