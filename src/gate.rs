//! Contest scoring gate: submit-time authorization against contest windows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::{Contest, ProblemId, UserId};

/// Where a contest sits relative to a point in time. The window is
/// half-open: inclusive start, exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestPhase {
    Scheduled,
    Active,
    Closed,
}

impl std::fmt::Display for ContestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

impl Contest {
    pub fn phase_at(&self, now: DateTime<Utc>) -> ContestPhase {
        if now < self.start {
            ContestPhase::Scheduled
        } else if now < self.end {
            ContestPhase::Active
        } else {
            ContestPhase::Closed
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("contest is not active (currently {phase})")]
    ContestNotActive { phase: ContestPhase },

    #[error("problem {0} is not part of this contest")]
    ProblemNotInContest(ProblemId),

    #[error("user {0} is not registered for this contest")]
    UserNotRegistered(UserId),
}

/// Admit or reject a scored submission. `registered` comes from the
/// platform; contest membership and the window come from the contest value.
pub fn authorize(
    user_id: UserId,
    problem_id: ProblemId,
    contest: &Contest,
    registered: bool,
    now: DateTime<Utc>,
) -> Result<(), GateError> {
    let phase = contest.phase_at(now);
    if phase != ContestPhase::Active {
        return Err(GateError::ContestNotActive { phase });
    }
    if !contest.contains_problem(problem_id) {
        return Err(GateError::ProblemNotInContest(problem_id));
    }
    if !registered && !contest.has_participant(user_id) {
        return Err(GateError::UserNotRegistered(user_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn contest() -> Contest {
        Contest {
            id: 1,
            start: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap(),
            problem_ids: vec![100, 101],
            participant_ids: vec![10],
        }
    }

    #[test]
    fn test_start_is_inclusive() {
        let c = contest();
        assert_eq!(c.phase_at(c.start), ContestPhase::Active);
        assert!(authorize(10, 100, &c, false, c.start).is_ok());
    }

    #[test]
    fn test_end_is_exclusive() {
        let c = contest();
        assert_eq!(c.phase_at(c.end), ContestPhase::Closed);
        assert_eq!(
            authorize(10, 100, &c, false, c.end),
            Err(GateError::ContestNotActive {
                phase: ContestPhase::Closed
            })
        );
    }

    #[test]
    fn test_before_start_is_scheduled() {
        let c = contest();
        let before = c.start - chrono::Duration::seconds(1);
        assert_eq!(
            authorize(10, 100, &c, false, before),
            Err(GateError::ContestNotActive {
                phase: ContestPhase::Scheduled
            })
        );
    }

    #[test]
    fn test_problem_must_belong_to_contest() {
        let c = contest();
        let during = c.start + chrono::Duration::hours(1);
        assert_eq!(
            authorize(10, 999, &c, false, during),
            Err(GateError::ProblemNotInContest(999))
        );
    }

    #[test]
    fn test_unregistered_user_rejected() {
        let c = contest();
        let during = c.start + chrono::Duration::hours(1);
        assert_eq!(
            authorize(99, 100, &c, false, during),
            Err(GateError::UserNotRegistered(99))
        );
    }

    #[test]
    fn test_platform_registration_overrides_roster() {
        let c = contest();
        let during = c.start + chrono::Duration::hours(1);
        assert!(authorize(99, 100, &c, true, during).is_ok());
    }
}
