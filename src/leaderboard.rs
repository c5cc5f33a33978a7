//! Leaderboard aggregation, fully derived from judged submissions.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Contest, ContestId, ProblemId, UserId};
use crate::verdict::Outcome;

/// Which judged submissions count toward a user's per-problem score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreAggregation {
    /// Only fully accepted submissions score.
    #[default]
    AcceptedOnly,
    /// The best score per problem counts, partial or not.
    BestPartial,
}

/// The slice of a judged submission the aggregator needs.
#[derive(Debug, Clone)]
pub struct ScoredSubmission {
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub outcome: Outcome,
    pub score: f64,
    pub judged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub contest_id: ContestId,
    pub score: f64,
    /// When the user's total last went up.
    pub last_improved: DateTime<Utc>,
}

/// Recompute the full ranking for a contest from a consistent snapshot of
/// judged submissions.
///
/// Ordering: score descending, then earlier improvement first, then user id
/// for determinism. Submissions to problems outside the contest are ignored.
pub fn recompute(
    contest: &Contest,
    submissions: &[ScoredSubmission],
    aggregation: ScoreAggregation,
) -> Vec<LeaderboardEntry> {
    use std::collections::HashMap;

    let mut rows: Vec<&ScoredSubmission> = submissions
        .iter()
        .filter(|s| contest.contains_problem(s.problem_id))
        .collect();
    rows.sort_by_key(|s| s.judged_at);

    // user -> (total, last_improved, per-problem best)
    let mut totals: HashMap<UserId, (f64, DateTime<Utc>, HashMap<ProblemId, f64>)> =
        HashMap::new();

    for row in rows {
        let counted = match aggregation {
            ScoreAggregation::AcceptedOnly => {
                if row.outcome == Outcome::Accepted {
                    row.score
                } else {
                    0.0
                }
            }
            ScoreAggregation::BestPartial => row.score,
        };

        let entry = totals
            .entry(row.user_id)
            .or_insert_with(|| (0.0, row.judged_at, HashMap::new()));

        let best = entry.2.entry(row.problem_id).or_insert(0.0);
        if counted > *best {
            entry.0 += counted - *best;
            entry.1 = row.judged_at;
            *best = counted;
        }
    }

    let mut entries: Vec<LeaderboardEntry> = totals
        .into_iter()
        .map(|(user_id, (score, last_improved, _))| LeaderboardEntry {
            user_id,
            contest_id: contest.id,
            score,
            last_improved,
        })
        .collect();

    entries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.last_improved.cmp(&b.last_improved))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    entries
}
