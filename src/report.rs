//! Reporting pass
//!
//! Reads both ledgers and assembles everything the rendering layer shows:
//! progress counts, token usage, completion forecasts, score histograms per
//! evaluator version, matrix coverage and the most recent arguments.

use crate::db::{Counts, Database, RecentArgument};
use crate::error::Result;
use crate::matrix::Coverage;
use crate::projection::{self, Projection};
use crate::usage::{DailyUsageBucket, ProgressKey, UsageTotals};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Histogram buckets 0 through 10.
pub const BUCKETS: usize = 11;

/// Score distribution of one evaluator version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreHistogram {
    pub evaluator_version: i32,
    pub count: usize,
    pub average: f64,
    pub buckets: [u64; BUCKETS],
}

/// A forecast with its display label and explanatory note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionSummary {
    pub label: String,
    pub note: String,
    pub projection: Projection,
}

impl From<Projection> for ProjectionSummary {
    fn from(projection: Projection) -> Self {
        Self {
            label: projection.label(),
            note: projection.note(),
            projection,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub generated_on: NaiveDate,
    pub counts: Counts,
    pub usage: UsageTotals,
    pub daily_usage: Vec<DailyUsageBucket>,
    pub generation_projection: ProjectionSummary,
    pub evaluation_projection: ProjectionSummary,
    pub histograms: Vec<ScoreHistogram>,
    pub coverage: Coverage,
    pub recent: Vec<RecentArgument>,
}

/// Nearest whole score, clamped to the 0..=10 scale.
pub fn score_bucket(score: f64) -> usize {
    let rounded = (score + 0.5).floor();
    if rounded.is_nan() || rounded < 0.0 {
        0
    } else {
        (rounded as usize).min(BUCKETS - 1)
    }
}

/// One histogram per evaluator version, ascending.
pub fn histograms(scores_by_version: &BTreeMap<i32, Vec<f64>>) -> Vec<ScoreHistogram> {
    scores_by_version
        .iter()
        .map(|(version, scores)| {
            let mut buckets = [0u64; BUCKETS];
            for score in scores {
                buckets[score_bucket(*score)] += 1;
            }
            let average = if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            };
            ScoreHistogram {
                evaluator_version: *version,
                count: scores.len(),
                average,
                buckets,
            }
        })
        .collect()
}

/// Build the full report as of `today`.
pub fn build_report(
    db: &Database,
    window_days: u32,
    recent_limit: i64,
    today: NaiveDate,
) -> Result<ProgressReport> {
    let counts = db.counts()?;
    let daily = db.daily_progress()?;

    let generation_projection = projection::project_completion(
        counts.total_pairs,
        counts.generated,
        &daily,
        ProgressKey::Generated,
        window_days,
        today,
    );
    let evaluation_projection = projection::project_completion(
        counts.total_pairs,
        counts.evaluated,
        &daily,
        ProgressKey::Evaluated,
        window_days,
        today,
    );

    Ok(ProgressReport {
        generated_on: today,
        counts,
        usage: db.usage_totals()?,
        daily_usage: db.daily_usage()?,
        generation_projection: generation_projection.into(),
        evaluation_projection: evaluation_projection.into(),
        histograms: histograms(&db.scores_by_version()?),
        coverage: db.status_matrix()?.coverage(),
        recent: db.recent_arguments(recent_limit)?,
    })
}
