//! Typed errors on the submit surface.

use thiserror::Error;

use crate::gate::GateError;
use crate::languages::UnsupportedLanguage;
use crate::model::ProblemId;

/// Rejections raised by `JudgeService::submit`, before any process exists.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("source too large: {actual} bytes (limit {limit})")]
    SourceTooLarge { limit: usize, actual: usize },

    #[error("unknown problem: {0}")]
    UnknownProblem(ProblemId),

    #[error("platform lookup failed")]
    Platform(#[source] anyhow::Error),

    #[error("judge queue is closed")]
    QueueClosed,
}
