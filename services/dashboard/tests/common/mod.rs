//! Fixtures shared by the dashboard integration tests.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use session_ledger_core::{FreeText, RecordStatus, TimestampedRecord};
use uuid::Uuid;

pub fn owner() -> Uuid {
    Uuid::from_u128(0xA11CE)
}

/// The pinned "now" of every test: 2024-05-20 12:00 local time.
pub fn now() -> NaiveDateTime {
    today().and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
}

pub fn record(n: u128, occurred_on: NaiveDate, status: RecordStatus) -> TimestampedRecord {
    let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    TimestampedRecord {
        id: Uuid::from_u128(n),
        owner_id: owner(),
        subject_name: format!("Subject {}", n % 4),
        occurred_on,
        occurred_at: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        duration_minutes: 50,
        status,
        classification_tags: Vec::new(),
        free_text: FreeText::default(),
        created_at: stamp,
        updated_at: stamp,
    }
}
