//! Token accounting and daily activity rollups
//!
//! Both ledgers carry the same nullable token triple. Totals and daily
//! buckets resolve the non-reasoning count per row with one policy:
//! the explicit value if present, else `total - reasoning` floored at zero
//! when both are known, else zero.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token counts reported by the completion service for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: Option<i64>,
    pub reasoning: Option<i64>,
    pub non_reasoning: Option<i64>,
}

impl TokenUsage {
    pub fn new(total: Option<i64>, reasoning: Option<i64>, non_reasoning: Option<i64>) -> Self {
        Self {
            total,
            reasoning,
            non_reasoning,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.total.is_none() && self.reasoning.is_none() && self.non_reasoning.is_none()
    }

    pub fn resolved_non_reasoning(&self) -> i64 {
        resolve_non_reasoning(self.total, self.reasoning, self.non_reasoning)
    }
}

/// Resolve the non-reasoning token count for a single row.
pub fn resolve_non_reasoning(
    total: Option<i64>,
    reasoning: Option<i64>,
    non_reasoning: Option<i64>,
) -> i64 {
    if let Some(explicit) = non_reasoning {
        return explicit;
    }
    match (total, reasoning) {
        (Some(total), Some(reasoning)) => (total - reasoning).max(0),
        _ => 0,
    }
}

/// One ledger row's contribution to accounting: when it was written and what it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRow {
    pub created_at: String,
    pub usage: TokenUsage,
}

impl UsageRow {
    pub fn new(created_at: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            created_at: created_at.into(),
            usage,
        }
    }
}

/// Token totals across both ledgers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub generation_total: i64,
    pub generation_reasoning: i64,
    pub generation_non_reasoning: i64,
    pub evaluation_total: i64,
    pub evaluation_reasoning: i64,
    pub evaluation_non_reasoning: i64,
    pub overall_total: i64,
    pub overall_reasoning: i64,
    pub overall_non_reasoning: i64,
}

/// Usage for a single UTC calendar day, generation and evaluation merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUsageBucket {
    pub day: NaiveDate,
    pub generation_total: i64,
    pub evaluation_total: i64,
    pub total: i64,
    pub reasoning_total: i64,
    pub non_reasoning_total: i64,
}

impl DailyUsageBucket {
    fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            generation_total: 0,
            evaluation_total: 0,
            total: 0,
            reasoning_total: 0,
            non_reasoning_total: 0,
        }
    }
}

/// Which per-day counter a projection reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKey {
    Generated,
    Evaluated,
}

/// Arguments generated and pairs first evaluated on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyProgress {
    pub day: NaiveDate,
    pub generated: u64,
    pub evaluated: u64,
}

impl DailyProgress {
    pub fn count(&self, key: ProgressKey) -> u64 {
        match key {
            ProgressKey::Generated => self.generated,
            ProgressKey::Evaluated => self.evaluated,
        }
    }
}

/// UTC calendar day of a stored timestamp.
///
/// Accepts RFC 3339 (current writers) and naive `YYYY-MM-DDTHH:MM:SS`
/// timestamps, which older stores wrote in UTC without an offset.
pub fn utc_day(timestamp: &str) -> Option<NaiveDate> {
    let ts = timestamp.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
        return Some(parsed.with_timezone(&Utc).date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(ts, format) {
            return Some(naive.date());
        }
    }
    ts.get(..10)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
}

fn side_totals(rows: &[UsageRow]) -> (i64, i64, i64) {
    rows.iter().fold((0, 0, 0), |(total, reasoning, non_reasoning), row| {
        (
            total + row.usage.total.unwrap_or(0),
            reasoning + row.usage.reasoning.unwrap_or(0),
            non_reasoning + row.usage.resolved_non_reasoning(),
        )
    })
}

/// Sum usage across the generation and evaluation ledgers.
pub fn usage_totals(generation: &[UsageRow], evaluation: &[UsageRow]) -> UsageTotals {
    let (generation_total, generation_reasoning, generation_non_reasoning) =
        side_totals(generation);
    let (evaluation_total, evaluation_reasoning, evaluation_non_reasoning) =
        side_totals(evaluation);

    UsageTotals {
        generation_total,
        generation_reasoning,
        generation_non_reasoning,
        evaluation_total,
        evaluation_reasoning,
        evaluation_non_reasoning,
        overall_total: generation_total + evaluation_total,
        overall_reasoning: generation_reasoning + evaluation_reasoning,
        overall_non_reasoning: generation_non_reasoning + evaluation_non_reasoning,
    }
}

/// Usage grouped by UTC creation day, ascending.
///
/// Rows whose timestamp cannot be parsed still count in [`usage_totals`]
/// but are left out of the daily series.
pub fn daily_usage(generation: &[UsageRow], evaluation: &[UsageRow]) -> Vec<DailyUsageBucket> {
    let mut buckets: BTreeMap<NaiveDate, DailyUsageBucket> = BTreeMap::new();

    let sides = [(generation, true), (evaluation, false)];
    for (rows, is_generation) in sides {
        for row in rows {
            let Some(day) = utc_day(&row.created_at) else {
                continue;
            };
            let bucket = buckets
                .entry(day)
                .or_insert_with(|| DailyUsageBucket::empty(day));
            let total = row.usage.total.unwrap_or(0);
            if is_generation {
                bucket.generation_total += total;
            } else {
                bucket.evaluation_total += total;
            }
            bucket.total += total;
            bucket.reasoning_total += row.usage.reasoning.unwrap_or(0);
            bucket.non_reasoning_total += row.usage.resolved_non_reasoning();
        }
    }

    buckets.into_values().collect()
}

/// Progress per UTC day, ascending.
///
/// `generation` counts one per argument row. `evaluation` holds
/// `(pair_id, created_at)` for every evaluation row; a pair counts once, on
/// the day of its earliest evaluation, so rescoring never adds progress.
pub fn daily_progress(generation: &[UsageRow], evaluation: &[(i32, String)]) -> Vec<DailyProgress> {
    let mut days: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
    for day in generation.iter().filter_map(|row| utc_day(&row.created_at)) {
        days.entry(day).or_default().0 += 1;
    }

    let mut first_evaluated: BTreeMap<i32, NaiveDate> = BTreeMap::new();
    for (pair_id, created_at) in evaluation {
        let Some(day) = utc_day(created_at) else {
            continue;
        };
        first_evaluated
            .entry(*pair_id)
            .and_modify(|earliest| *earliest = (*earliest).min(day))
            .or_insert(day);
    }
    for day in first_evaluated.into_values() {
        days.entry(day).or_default().1 += 1;
    }

    days.into_iter()
        .map(|(day, (generated, evaluated))| DailyProgress {
            day,
            generated,
            evaluated,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(created_at: &str, total: Option<i64>, reasoning: Option<i64>, non: Option<i64>) -> UsageRow {
        UsageRow::new(created_at, TokenUsage::new(total, reasoning, non))
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_resolve_derives_from_total_and_reasoning() {
        assert_eq!(resolve_non_reasoning(Some(100), Some(30), None), 70);
    }

    #[test]
    fn test_resolve_explicit_wins() {
        assert_eq!(resolve_non_reasoning(Some(100), Some(30), Some(20)), 20);
        assert_eq!(resolve_non_reasoning(Some(100), None, Some(20)), 20);
    }

    #[test]
    fn test_resolve_floors_at_zero_and_defaults() {
        assert_eq!(resolve_non_reasoning(Some(10), Some(30), None), 0);
        assert_eq!(resolve_non_reasoning(Some(100), None, None), 0);
        assert_eq!(resolve_non_reasoning(None, Some(5), None), 0);
        assert_eq!(resolve_non_reasoning(None, None, None), 0);
    }

    #[test]
    fn test_utc_day_formats() {
        assert_eq!(utc_day("2025-03-01T23:30:00Z"), Some(day("2025-03-01")));
        // Offset timestamps roll over to the UTC day
        assert_eq!(utc_day("2025-03-01T23:30:00-02:00"), Some(day("2025-03-02")));
        assert_eq!(utc_day("2025-03-01T10:00:00"), Some(day("2025-03-01")));
        assert_eq!(utc_day("2025-03-01T10:00:00.123456"), Some(day("2025-03-01")));
        assert_eq!(utc_day("2025-03-01"), Some(day("2025-03-01")));
        assert_eq!(utc_day("yesterday"), None);
    }

    #[test]
    fn test_usage_totals() {
        let generation = vec![
            row("2025-03-01T10:00:00Z", Some(100), Some(30), None),
            row("2025-03-01T11:00:00Z", Some(50), None, None),
            row("2025-03-02T11:00:00Z", None, None, None),
        ];
        let evaluation = vec![row("2025-03-02T12:00:00Z", Some(40), Some(10), Some(25))];

        let totals = usage_totals(&generation, &evaluation);
        assert_eq!(totals.generation_total, 150);
        assert_eq!(totals.generation_reasoning, 30);
        assert_eq!(totals.generation_non_reasoning, 70);
        assert_eq!(totals.evaluation_total, 40);
        assert_eq!(totals.evaluation_reasoning, 10);
        assert_eq!(totals.evaluation_non_reasoning, 25);
        assert_eq!(totals.overall_total, 190);
        assert_eq!(totals.overall_reasoning, 40);
        assert_eq!(totals.overall_non_reasoning, 95);
    }

    #[test]
    fn test_daily_usage_merges_sides() {
        let generation = vec![
            row("2025-03-02T10:00:00Z", Some(100), Some(30), None),
            row("2025-03-01T10:00:00", Some(10), Some(4), None),
        ];
        let evaluation = vec![
            row("2025-03-02T18:00:00Z", Some(40), Some(10), Some(25)),
            row("not a date", Some(1000), None, None),
        ];

        let daily = daily_usage(&generation, &evaluation);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].day, day("2025-03-01"));
        assert_eq!(daily[0].generation_total, 10);
        assert_eq!(daily[0].non_reasoning_total, 6);

        let second = &daily[1];
        assert_eq!(second.day, day("2025-03-02"));
        assert_eq!(second.generation_total, 100);
        assert_eq!(second.evaluation_total, 40);
        assert_eq!(second.total, 140);
        assert_eq!(second.reasoning_total, 40);
        assert_eq!(second.non_reasoning_total, 95);
    }

    #[test]
    fn test_daily_progress_counts_rows() {
        let generation = vec![
            row("2025-03-01T10:00:00Z", None, None, None),
            row("2025-03-01T12:00:00Z", None, None, None),
            row("2025-03-03T12:00:00Z", None, None, None),
        ];
        let evaluation = vec![(1, "2025-03-03T13:00:00Z".to_string())];

        let progress = daily_progress(&generation, &evaluation);
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].count(ProgressKey::Generated), 2);
        assert_eq!(progress[0].count(ProgressKey::Evaluated), 0);
        assert_eq!(progress[1].day, day("2025-03-03"));
        assert_eq!(progress[1].count(ProgressKey::Evaluated), 1);
    }

    #[test]
    fn test_daily_progress_counts_each_pair_once() {
        let evaluation = vec![
            (1, "2025-03-04T09:00:00Z".to_string()),
            (1, "2025-03-02T09:00:00Z".to_string()),
            (1, "2025-03-04T10:00:00Z".to_string()),
            (2, "2025-03-04T11:00:00Z".to_string()),
            (3, "garbled".to_string()),
        ];

        let progress = daily_progress(&[], &evaluation);
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].day, day("2025-03-02"));
        assert_eq!(progress[0].evaluated, 1);
        assert_eq!(progress[1].day, day("2025-03-04"));
        assert_eq!(progress[1].evaluated, 1);
    }
}
