//! services/dashboard/src/web/protocol.rs
//!
//! Wire shapes shared by the REST handlers and the live metrics socket, and
//! their conversion to and from the core's domain types.

use crate::views::{HistoryState, MetricsView};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use session_ledger_core::metrics::PeriodMetrics;
use session_ledger_core::{
    ChangeType, DateRange, EngineError, FilterSpecification, MetricsSnapshot, RecordEvent,
    TimestampedRecord,
};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Filters
//=========================================================================================

/// The user's filter selection, as sent by the client.
#[derive(Deserialize, Serialize, Debug, Clone, Default, ToSchema)]
#[serde(default)]
pub struct FilterPayload {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Status names, e.g. `completed`, `in_progress`.
    pub statuses: Vec<String>,
    /// Classification tag names, e.g. `anxious`, `very_positive`.
    pub tags: Vec<String>,
    pub search: Option<String>,
    pub subject_name: Option<String>,
}

impl FilterPayload {
    pub fn into_spec(self) -> Result<FilterSpecification, EngineError> {
        let invalid = |e: session_ledger_core::domain::UnknownValue| {
            EngineError::InvalidFilterSpecification(e.to_string())
        };
        Ok(FilterSpecification {
            date_range: DateRange {
                from: self.from,
                to: self.to,
            },
            statuses: self
                .statuses
                .iter()
                .map(|s| s.trim().parse())
                .collect::<Result<_, _>>()
                .map_err(invalid)?,
            tags: self
                .tags
                .iter()
                .map(|t| t.trim().parse())
                .collect::<Result<_, _>>()
                .map_err(invalid)?,
            search: self.search,
            subject_name: self.subject_name,
        })
    }
}

/// Query-string form of a filter, for `GET` endpoints. Lists are comma-separated.
#[derive(Deserialize, Debug, Clone, Default, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct ScopeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub statuses: Option<String>,
    pub tags: Option<String>,
    pub search: Option<String>,
    pub subject_name: Option<String>,
}

fn split_list(list: Option<String>) -> Vec<String> {
    list.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

impl From<ScopeQuery> for FilterPayload {
    fn from(query: ScopeQuery) -> Self {
        Self {
            from: query.from,
            to: query.to,
            statuses: split_list(query.statuses),
            tags: split_list(query.tags),
            search: query.search,
            subject_name: query.subject_name,
        }
    }
}

//=========================================================================================
// History
//=========================================================================================

#[derive(Deserialize, Debug, Default, ToSchema)]
#[serde(default)]
pub struct CreateHistoryRequest {
    pub filters: FilterPayload,
    pub page_size: Option<usize>,
    /// `asc` or `desc`.
    pub sort: Option<String>,
}

#[derive(Deserialize, Debug, Default, ToSchema)]
#[serde(default)]
pub struct ExportRequest {
    /// Column names in output order. Defaults to the essential columns.
    pub fields: Option<Vec<String>>,
    /// Restricts the export to these records. Empty means every loaded record.
    pub selected_ids: Vec<Uuid>,
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct RecordDto {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub subject_name: String,
    pub occurred_on: NaiveDate,
    /// `HH:MM`.
    pub occurred_at: String,
    pub duration_minutes: u32,
    pub status: String,
    pub classification_tags: Vec<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub recommendation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TimestampedRecord> for RecordDto {
    fn from(record: &TimestampedRecord) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            subject_name: record.subject_name.clone(),
            occurred_on: record.occurred_on,
            occurred_at: record.occurred_at.format("%H:%M").to_string(),
            duration_minutes: record.duration_minutes,
            status: record.status.to_string(),
            classification_tags: record
                .classification_tags
                .iter()
                .map(|t| t.to_string())
                .collect(),
            reason: record.free_text.reason.clone(),
            notes: record.free_text.notes.clone(),
            summary: record.free_text.summary.clone(),
            recommendation: record.free_text.recommendation.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// The list view state: `{ records, has_more, loading, error }`.
#[derive(Serialize, Debug, ToSchema)]
pub struct HistoryResponse {
    pub view_id: Uuid,
    pub records: Vec<RecordDto>,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl HistoryResponse {
    pub fn new(view_id: Uuid, state: HistoryState) -> Self {
        Self {
            view_id,
            records: state.records.iter().map(RecordDto::from).collect(),
            has_more: state.has_more,
            loading: state.loading,
            error: state.error,
        }
    }
}

//=========================================================================================
// Metrics
//=========================================================================================

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct PeriodDto {
    pub current: usize,
    pub previous: usize,
    pub growth_percent: f64,
}

impl From<PeriodMetrics> for PeriodDto {
    fn from(period: PeriodMetrics) -> Self {
        Self {
            current: period.current,
            previous: period.previous,
            growth_percent: period.growth_percent,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct MetricsDto {
    pub today: PeriodDto,
    pub last_7_days: PeriodDto,
    pub last_30_days: PeriodDto,
    pub recent_activity: Vec<RecordDto>,
    pub distinct_owners: usize,
    pub distinct_subjects: usize,
    pub success_ratio: f64,
    pub average_daily_rate: f64,
    /// `excellent`, `good`, `warning` or `critical`.
    pub health: String,
    pub total_records: usize,
    pub computed_for: NaiveDateTime,
    pub revision: u64,
}

impl From<&MetricsSnapshot> for MetricsDto {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            today: snapshot.today.into(),
            last_7_days: snapshot.last_7_days.into(),
            last_30_days: snapshot.last_30_days.into(),
            recent_activity: snapshot.recent_activity.iter().map(RecordDto::from).collect(),
            distinct_owners: snapshot.distinct_owners,
            distinct_subjects: snapshot.distinct_subjects,
            success_ratio: snapshot.success_ratio,
            average_daily_rate: snapshot.average_daily_rate,
            health: snapshot.health.as_str().to_string(),
            total_records: snapshot.total_records,
            computed_for: snapshot.computed_for,
            revision: snapshot.revision,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct LiveEventDto {
    /// `inserted` or `updated`.
    pub change: String,
    pub record: RecordDto,
}

impl From<&RecordEvent> for LiveEventDto {
    fn from(event: &RecordEvent) -> Self {
        let change = match event.change {
            ChangeType::Inserted => "inserted",
            ChangeType::Updated => "updated",
        };
        Self {
            change: change.to_string(),
            record: RecordDto::from(&event.record),
        }
    }
}

//=========================================================================================
// Messages Sent FROM the Client TO the Server (metrics socket)
//=========================================================================================

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Reload the scope in full.
    Refresh,
    /// Switch to a new scope.
    Scope {
        #[serde(default)]
        filters: FilterPayload,
    },
    /// Dismiss the current error.
    ClearError,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (metrics socket)
//=========================================================================================

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The current live view: `{ snapshot, recent_events, loading, error }`.
    Metrics {
        snapshot: Option<MetricsDto>,
        recent_events: Vec<LiveEventDto>,
        loading: bool,
        error: Option<String>,
    },

    /// A message the client sent could not be handled.
    Error { message: String },
}

impl From<&MetricsView> for ServerMessage {
    fn from(view: &MetricsView) -> Self {
        ServerMessage::Metrics {
            snapshot: view.snapshot.as_ref().map(MetricsDto::from),
            recent_events: view.recent_events.iter().map(LiveEventDto::from).collect(),
            loading: view.loading,
            error: view.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_ledger_core::{ClassificationTag, RecordStatus};

    #[test]
    fn test_filter_payload_parses_names() {
        let payload: FilterPayload = serde_json::from_str(
            r#"{"from":"2024-05-01","statuses":["completed","in_progress"],"tags":["very_positive"]}"#,
        )
        .unwrap();
        let spec = payload.into_spec().unwrap();
        assert_eq!(spec.date_range.from, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!(spec.statuses.contains(&RecordStatus::InProgress));
        assert!(spec.tags.contains(&ClassificationTag::VeryPositive));
    }

    #[test]
    fn test_unknown_status_is_an_invalid_filter() {
        let payload = FilterPayload {
            statuses: vec!["archived".into()],
            ..Default::default()
        };
        assert!(matches!(
            payload.into_spec(),
            Err(EngineError::InvalidFilterSpecification(_))
        ));
    }

    #[test]
    fn test_scope_query_splits_lists() {
        let query = ScopeQuery {
            statuses: Some("completed, pending,".into()),
            ..Default::default()
        };
        let payload = FilterPayload::from(query);
        assert_eq!(payload.statuses, vec!["completed".to_string(), "pending".to_string()]);
        assert!(payload.tags.is_empty());
    }

    #[test]
    fn test_client_messages_are_tagged() {
        let refresh: ClientMessage = serde_json::from_str(r#"{"type":"refresh"}"#).unwrap();
        assert!(matches!(refresh, ClientMessage::Refresh));
        let raw = r#"{"type":"scope","filters":{"statuses":["completed"]}}"#;
        let scope: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(scope, ClientMessage::Scope { filters } if filters.statuses.len() == 1));
    }

    #[test]
    fn test_loading_view_serializes_without_snapshot() {
        let message = ServerMessage::from(&MetricsView {
            loading: true,
            ..MetricsView::default()
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "metrics");
        assert_eq!(json["loading"], true);
        assert!(json["snapshot"].is_null());
    }
}
