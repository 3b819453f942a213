//! services/dashboard/src/seed.rs
//!
//! Deterministic demo records for a fresh database.

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use session_ledger_core::{ClassificationTag, FreeText, RecordStatus, TimestampedRecord};
use uuid::Uuid;

const SUBJECTS: [&str; 5] = [
    "Ana García",
    "Carlos Mendoza",
    "Lucía Torres",
    "Miguel Ortega",
    "Sofía Ruiz",
];

fn status_for(n: usize) -> RecordStatus {
    match n % 10 {
        0 => RecordStatus::Cancelled,
        1 => RecordStatus::Pending,
        2 => RecordStatus::Confirmed,
        _ => RecordStatus::Completed,
    }
}

/// Builds between one and three sessions per day for the last `days` days,
/// ending today.
///
/// Ids are derived from `owner_id` and the position, so seeding the same owner
/// twice rewrites the same rows.
pub fn demo_records(owner_id: Uuid, today: NaiveDate, days: u32) -> Vec<TimestampedRecord> {
    let mut records = Vec::new();
    for offset in 0..days {
        let occurred_on = today - Duration::days(i64::from(offset));
        let per_day = 1 + (offset % 3);
        for slot in 0..per_day {
            let n = records.len();
            let occurred_at = NaiveTime::from_hms_opt(9 + slot * 2, 0, 0).unwrap_or_default();
            let stamp = Utc.from_utc_datetime(&occurred_on.and_time(occurred_at));
            let subject = SUBJECTS[n % SUBJECTS.len()];
            let status = status_for(n);
            records.push(TimestampedRecord {
                id: Uuid::from_u128(owner_id.as_u128() ^ (n as u128 + 1)),
                owner_id,
                subject_name: subject.to_string(),
                occurred_on,
                occurred_at,
                duration_minutes: 45 + 15 * (n as u32 % 3),
                status,
                classification_tags: vec![ClassificationTag::ALL[n % ClassificationTag::ALL.len()]],
                free_text: FreeText {
                    reason: (status == RecordStatus::Cancelled).then(|| "Rescheduled".to_string()),
                    notes: Some(format!("Follow-up with {subject}")),
                    summary: None,
                    recommendation: None,
                },
                created_at: stamp,
                updated_at: stamp,
            });
        }
    }
    records
}
