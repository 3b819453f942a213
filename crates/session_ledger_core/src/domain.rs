//! crates/session_ledger_core/src/domain.rs
//!
//! Defines the pure, core data structures for the ledger.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raised when a textual enum value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

//=========================================================================================
// Record Vocabulary
//=========================================================================================

/// Lifecycle of a session or validation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 5] = [
        RecordStatus::Pending,
        RecordStatus::Confirmed,
        RecordStatus::InProgress,
        RecordStatus::Completed,
        RecordStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Confirmed => "confirmed",
            RecordStatus::InProgress => "in_progress",
            RecordStatus::Completed => "completed",
            RecordStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the record counts towards the success ratio.
    pub fn is_success(&self) -> bool {
        matches!(self, RecordStatus::Completed)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// Emotional-state classification attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClassificationTag {
    VeryPositive,
    Positive,
    Neutral,
    Anxious,
    Sad,
    Irritated,
    Confused,
}

impl ClassificationTag {
    pub const ALL: [ClassificationTag; 7] = [
        ClassificationTag::VeryPositive,
        ClassificationTag::Positive,
        ClassificationTag::Neutral,
        ClassificationTag::Anxious,
        ClassificationTag::Sad,
        ClassificationTag::Irritated,
        ClassificationTag::Confused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationTag::VeryPositive => "very_positive",
            ClassificationTag::Positive => "positive",
            ClassificationTag::Neutral => "neutral",
            ClassificationTag::Anxious => "anxious",
            ClassificationTag::Sad => "sad",
            ClassificationTag::Irritated => "irritated",
            ClassificationTag::Confused => "confused",
        }
    }
}

impl fmt::Display for ClassificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationTag {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClassificationTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "classification tag",
                value: s.to_string(),
            })
    }
}

//=========================================================================================
// Records
//=========================================================================================

/// Named free-text fields. Each one is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeText {
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub recommendation: Option<String>,
}

impl FreeText {
    /// Iterates over the fields that are present.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        [&self.reason, &self.notes, &self.summary, &self.recommendation]
            .into_iter()
            .filter_map(|field| field.as_deref())
    }
}

/// The unit flowing through the system: a clinical session or a validation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub subject_name: String,
    pub occurred_on: NaiveDate,
    pub occurred_at: NaiveTime,
    pub duration_minutes: u32,
    pub status: RecordStatus,
    pub classification_tags: Vec<ClassificationTag>,
    pub free_text: FreeText,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimestampedRecord {
    pub fn sort_key(&self) -> SortKey {
        SortKey {
            occurred_on: self.occurred_on,
            occurred_at: self.occurred_at,
            id: self.id,
        }
    }
}

/// Stable total order over records. Ties on the timestamp are broken by `id`,
/// so a cursor stays valid when new records land on the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    pub occurred_on: NaiveDate,
    pub occurred_at: NaiveTime,
    pub id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    /// Whether `key` comes strictly after `cursor` when walking in this order.
    pub fn is_after(&self, key: &SortKey, cursor: &SortKey) -> bool {
        match self {
            SortOrder::Ascending => key > cursor,
            SortOrder::Descending => key < cursor,
        }
    }
}

impl FromStr for SortOrder {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            _ => Err(UnknownValue {
                kind: "sort order",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Inserted,
    Updated,
}

/// A change pushed by the store's live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    pub record: TimestampedRecord,
    pub change: ChangeType,
}

//=========================================================================================
// Filters and Queries
//=========================================================================================

/// Inclusive bounds on `occurred_on`. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// The user-facing filter. Empty fields mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpecification {
    pub date_range: DateRange,
    pub statuses: BTreeSet<RecordStatus>,
    pub tags: BTreeSet<ClassificationTag>,
    pub search: Option<String>,
    pub subject_name: Option<String>,
}

impl FilterSpecification {
    pub fn is_empty(&self) -> bool {
        *self == FilterSpecification::default()
    }
}

/// The portion of a filter the store evaluates natively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PushdownQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub status: Option<RecordStatus>,
}

impl PushdownQuery {
    /// Evaluates the query in memory, exactly as a store would.
    pub fn matches(&self, record: &TimestampedRecord) -> bool {
        self.date_from.map_or(true, |from| record.occurred_on >= from)
            && self.date_to.map_or(true, |to| record.occurred_on <= to)
            && self.status.map_or(true, |status| record.status == status)
    }
}

/// Resume position for a paginated query: the adapter's opaque token
/// plus the key of the last raw record it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCursor {
    pub token: Option<String>,
    pub last_key: SortKey,
}
