//! crates/session_ledger_core/src/metrics.rs
//!
//! Pure derivation of a `MetricsSnapshot` from raw records and "now".
//! Nothing here looks at a previous snapshot.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::domain::TimestampedRecord;

/// Days of history a snapshot needs: the 30-day window and the 30 days before it.
pub const LOOKBACK_DAYS: i64 = 60;

//=========================================================================================
// Configuration
//=========================================================================================

/// A (daily rate, success ratio) pair a health level requires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthBand {
    pub daily_rate: f64,
    pub success_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub excellent: HealthBand,
    pub good: HealthBand,
    pub warning: HealthBand,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            excellent: HealthBand { daily_rate: 5.0, success_ratio: 0.9 },
            good: HealthBand { daily_rate: 2.0, success_ratio: 0.75 },
            warning: HealthBand { daily_rate: 0.5, success_ratio: 0.5 },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub thresholds: HealthThresholds,
    /// Length of the most-recent-activity list.
    pub recent_capacity: usize,
    /// Quiet period before a burst of live events triggers a recompute.
    pub debounce: Duration,
    /// Upper bound on how long a steady stream of events can defer a recompute.
    pub debounce_max_wait: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            thresholds: HealthThresholds::default(),
            recent_capacity: 10,
            debounce: Duration::from_millis(1000),
            debounce_max_wait: Duration::from_millis(5000),
        }
    }
}

//=========================================================================================
// Snapshot
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// A rolling window compared with the window of equal length just before it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeriodMetrics {
    pub current: usize,
    pub previous: usize,
    pub growth_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub today: PeriodMetrics,
    pub last_7_days: PeriodMetrics,
    pub last_30_days: PeriodMetrics,
    pub recent_activity: Vec<TimestampedRecord>,
    pub distinct_owners: usize,
    pub distinct_subjects: usize,
    /// Completed records over all records in the 30-day window, in `[0, 1]`.
    pub success_ratio: f64,
    pub average_daily_rate: f64,
    pub health: HealthStatus,
    pub total_records: usize,
    pub computed_for: NaiveDateTime,
    /// Incremented by the aggregator on every recompute.
    pub revision: u64,
}

//=========================================================================================
// Derivation
//=========================================================================================

pub fn growth_rate(current: usize, previous: usize) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}

/// Ordered threshold rules; the first that holds wins.
pub fn classify_health(
    average_daily_rate: f64,
    success_ratio: f64,
    thresholds: &HealthThresholds,
) -> HealthStatus {
    let meets_both = |band: &HealthBand| {
        average_daily_rate >= band.daily_rate && success_ratio >= band.success_ratio
    };
    if meets_both(&thresholds.excellent) {
        HealthStatus::Excellent
    } else if meets_both(&thresholds.good) {
        HealthStatus::Good
    } else if average_daily_rate >= thresholds.warning.daily_rate
        || success_ratio >= thresholds.warning.success_ratio
    {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}

/// First day a snapshot for `today` can be influenced by.
pub fn lookback_start(today: NaiveDate) -> NaiveDate {
    today - chrono::Duration::days(LOOKBACK_DAYS - 1)
}

/// `days`-long window ending today, and the equal-length window before it.
fn windows(today: NaiveDate, days: i64) -> (RangeInclusive<NaiveDate>, RangeInclusive<NaiveDate>) {
    let start = today - chrono::Duration::days(days - 1);
    let prev_end = start - chrono::Duration::days(1);
    let prev_start = start - chrono::Duration::days(days);
    (start..=today, prev_start..=prev_end)
}

fn period(records: &[&TimestampedRecord], today: NaiveDate, days: i64) -> PeriodMetrics {
    let (current_range, previous_range) = windows(today, days);
    let current = records
        .iter()
        .filter(|r| current_range.contains(&r.occurred_on))
        .count();
    let previous = records
        .iter()
        .filter(|r| previous_range.contains(&r.occurred_on))
        .count();
    PeriodMetrics {
        current,
        previous,
        growth_percent: growth_rate(current, previous),
    }
}

/// Derives a snapshot. The result does not depend on the order of `records`.
///
/// Records dated after `now` (scheduled, not yet happened) count in no window
/// and never appear in the recent-activity list.
pub fn compute_snapshot<'a, I>(
    records: I,
    now: NaiveDateTime,
    config: &MetricsConfig,
) -> MetricsSnapshot
where
    I: IntoIterator<Item = &'a TimestampedRecord>,
{
    let today = now.date();
    let past: Vec<&TimestampedRecord> = records
        .into_iter()
        .filter(|r| r.occurred_on.and_time(r.occurred_at) <= now)
        .collect();

    let today_metrics = period(&past, today, 1);
    let week = period(&past, today, 7);
    let month = period(&past, today, 30);

    let (month_range, _) = windows(today, 30);
    let in_month: Vec<&TimestampedRecord> = past
        .iter()
        .copied()
        .filter(|r| month_range.contains(&r.occurred_on))
        .collect();

    let distinct_owners = in_month.iter().map(|r| r.owner_id).collect::<HashSet<_>>().len();
    let distinct_subjects = in_month
        .iter()
        .map(|r| r.subject_name.as_str())
        .collect::<HashSet<_>>()
        .len();
    let successes = in_month.iter().filter(|r| r.status.is_success()).count();
    let success_ratio = if in_month.is_empty() {
        0.0
    } else {
        successes as f64 / in_month.len() as f64
    };
    let average_daily_rate = month.current as f64 / 30.0;

    let mut recent_activity: Vec<TimestampedRecord> = past.iter().map(|r| (*r).clone()).collect();
    recent_activity.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    recent_activity.truncate(config.recent_capacity);

    MetricsSnapshot {
        today: today_metrics,
        last_7_days: week,
        last_30_days: month,
        recent_activity,
        distinct_owners,
        distinct_subjects,
        success_ratio,
        average_daily_rate,
        health: classify_health(average_daily_rate, success_ratio, &config.thresholds),
        total_records: past.len(),
        computed_for: now,
        revision: 0,
    }
}
