//! Completion forecasting from a moving average of recent daily activity.

use crate::usage::{DailyProgress, ProgressKey};
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Averaging window used by reports unless configured otherwise.
pub const DEFAULT_WINDOW_DAYS: u32 = 14;

/// Label shown when no completion date can be projected.
pub const UNDEFINED_LABEL: &str = "—";

/// Outcome of a completion forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Projection {
    /// Nothing to forecast: the workload is empty.
    Undefined,
    Complete {
        completed: i64,
    },
    /// No rate available. `window_days` is `None` when nothing was ever recorded.
    NoActivity {
        window_days: Option<u32>,
    },
    OnTrack {
        date: NaiveDate,
        rate: f64,
        remaining: i64,
        window_days: u32,
    },
}

impl Projection {
    pub fn label(&self) -> String {
        match self {
            Projection::Complete { .. } => "Complete".to_string(),
            Projection::OnTrack { date, .. } => date.format("%Y-%m-%d").to_string(),
            Projection::Undefined | Projection::NoActivity { .. } => UNDEFINED_LABEL.to_string(),
        }
    }

    pub fn note(&self) -> String {
        match self {
            Projection::Undefined => String::new(),
            Projection::Complete { completed } => format!("All {} pairs processed.", completed),
            Projection::NoActivity { window_days: None } => "No recorded activity yet.".to_string(),
            Projection::NoActivity {
                window_days: Some(days),
            } => format!("No activity in last {} days.", days),
            Projection::OnTrack {
                rate,
                remaining,
                window_days,
                ..
            } => format!(
                "Avg {:.1}/day over last {} days; {} remaining",
                rate, window_days, remaining
            ),
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Projection::Complete { .. } | Projection::OnTrack { .. })
    }
}

/// Per-day counts for the `window_days` days ending at `today`, oldest first.
/// Days without a bucket count as zero.
pub fn recent_activity(
    buckets: &[DailyProgress],
    key: ProgressKey,
    window_days: u32,
    today: NaiveDate,
) -> Vec<u64> {
    if window_days == 0 {
        return Vec::new();
    }
    let mut by_day: HashMap<NaiveDate, u64> = HashMap::new();
    for bucket in buckets {
        *by_day.entry(bucket.day).or_default() += bucket.count(key);
    }

    (0..window_days)
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
        .map(|day| by_day.get(&day).copied().unwrap_or(0))
        .collect()
}

/// Forecast when `total - completed` outstanding items will be done.
pub fn project_completion(
    total: i64,
    completed: i64,
    buckets: &[DailyProgress],
    key: ProgressKey,
    window_days: u32,
    today: NaiveDate,
) -> Projection {
    if total <= 0 {
        return Projection::Undefined;
    }
    if completed >= total {
        return Projection::Complete { completed };
    }
    if buckets.is_empty() {
        return Projection::NoActivity { window_days: None };
    }

    let recent_total: u64 = recent_activity(buckets, key, window_days, today).iter().sum();
    if recent_total == 0 {
        return Projection::NoActivity {
            window_days: Some(window_days),
        };
    }

    let rate = recent_total as f64 / f64::from(window_days);
    let remaining = (total - completed).max(0);
    let days_needed = (remaining as f64 / rate).ceil() as u64;
    let date = today
        .checked_add_days(Days::new(days_needed))
        .unwrap_or(NaiveDate::MAX);

    Projection::OnTrack {
        date,
        rate,
        remaining,
        window_days,
    }
}

/// [`project_completion`] anchored at the current UTC date.
pub fn project_completion_today(
    total: i64,
    completed: i64,
    buckets: &[DailyProgress],
    key: ProgressKey,
    window_days: u32,
) -> Projection {
    project_completion(
        total,
        completed,
        buckets,
        key,
        window_days,
        Utc::now().date_naive(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn progress(d: &str, generated: u64, evaluated: u64) -> DailyProgress {
        DailyProgress {
            day: day(d),
            generated,
            evaluated,
        }
    }

    #[test]
    fn test_undefined_for_empty_workload() {
        let p = project_completion(0, 0, &[], ProgressKey::Generated, 14, day("2025-06-01"));
        assert_eq!(p, Projection::Undefined);
        assert_eq!(p.label(), UNDEFINED_LABEL);
        assert_eq!(p.note(), "");
    }

    #[test]
    fn test_complete_ignores_buckets() {
        let today = day("2025-06-01");
        let buckets = vec![progress("2025-05-30", 10, 0)];
        let empty: Vec<DailyProgress> = Vec::new();
        for b in [&buckets, &empty] {
            let p = project_completion(100, 100, b, ProgressKey::Generated, 14, today);
            assert_eq!(p, Projection::Complete { completed: 100 });
            assert_eq!(p.label(), "Complete");
            assert_eq!(p.note(), "All 100 pairs processed.");
        }
    }

    #[test]
    fn test_no_buckets_is_no_activity() {
        let p = project_completion(100, 0, &[], ProgressKey::Generated, 14, day("2025-06-01"));
        assert_eq!(p, Projection::NoActivity { window_days: None });
        assert_eq!(p.label(), UNDEFINED_LABEL);
        assert!(!p.is_defined());
    }

    #[test]
    fn test_stale_activity_outside_window() {
        let buckets = vec![progress("2025-01-01", 50, 50)];
        let p = project_completion(100, 50, &buckets, ProgressKey::Generated, 14, day("2025-06-01"));
        assert_eq!(p, Projection::NoActivity { window_days: Some(14) });
        assert_eq!(p.note(), "No activity in last 14 days.");
    }

    #[test]
    fn test_zero_window_does_not_divide() {
        let buckets = vec![progress("2025-06-01", 5, 0)];
        let p = project_completion(100, 5, &buckets, ProgressKey::Generated, 0, day("2025-06-01"));
        assert_eq!(p, Projection::NoActivity { window_days: Some(0) });
    }

    #[test]
    fn test_projected_date_uses_window_average() {
        let today = day("2025-06-14");
        // 28 items over the 14-day window ending today => 2/day
        let buckets = vec![
            progress("2025-06-01", 14, 0),
            progress("2025-06-14", 14, 3),
            // Outside the window
            progress("2025-05-31", 1000, 0),
        ];
        let p = project_completion(100, 28, &buckets, ProgressKey::Generated, 14, today);
        match &p {
            Projection::OnTrack {
                date,
                rate,
                remaining,
                window_days,
            } => {
                assert_eq!(*rate, 2.0);
                assert_eq!(*remaining, 72);
                assert_eq!(*window_days, 14);
                assert_eq!(*date, day("2025-07-20"));
            }
            other => panic!("expected OnTrack, got {:?}", other),
        }
        assert_eq!(p.label(), "2025-07-20");
        assert_eq!(p.note(), "Avg 2.0/day over last 14 days; 72 remaining");
    }

    #[test]
    fn test_rate_rounds_days_up() {
        let today = day("2025-06-14");
        let buckets = vec![progress("2025-06-10", 0, 3)];
        // 3 over 14 days; 10 remaining => ceil(46.67) = 47 days
        let p = project_completion(20, 10, &buckets, ProgressKey::Evaluated, 14, today);
        assert_eq!(p.label(), "2025-07-31");
    }

    #[test]
    fn test_recent_activity_series_is_oldest_first() {
        let today = day("2025-06-03");
        let buckets = vec![progress("2025-06-01", 1, 0), progress("2025-06-03", 3, 0)];
        let series = recent_activity(&buckets, ProgressKey::Generated, 3, today);
        assert_eq!(series, vec![1, 0, 3]);
    }
}
