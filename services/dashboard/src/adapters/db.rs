//! services/dashboard/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `RecordStoreService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`: keyset-paginated reads and live change
//! notifications delivered through `LISTEN/NOTIFY`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use session_ledger_core::ports::{
    PortError, PortResult, RecordStoreService, StorePage, Subscription, SubscriptionHandle,
};
use session_ledger_core::{
    ChangeType, ClassificationTag, FreeText, PushdownQuery, QueryCursor, RecordEvent,
    RecordStatus, SortOrder, TimestampedRecord,
};
use sqlx::postgres::{PgListener, PgPool};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The channel the `records` table trigger notifies on.
pub const RECORD_EVENTS_CHANNEL: &str = "record_events";

const RECORD_COLUMNS: &str = "id, owner_id, subject_name, occurred_on, occurred_at, \
    duration_minutes, status, classification_tags, reason, notes, summary, recommendation, \
    created_at, updated_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `RecordStoreService` port.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    subscriptions: Arc<Mutex<HashMap<SubscriptionHandle, CancellationToken>>>,
    next_handle: Arc<AtomicU64>,
}

impl PgRecordStore {
    /// Creates a new `PgRecordStore`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_handle: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a new record. The table trigger notifies live subscribers.
    pub async fn insert_record(&self, record: &TimestampedRecord) -> PortResult<()> {
        let duration = duration_column(record)?;
        let tags: Vec<&str> = record.classification_tags.iter().map(|t| t.as_str()).collect();
        sqlx::query(
            "INSERT INTO records (id, owner_id, subject_name, occurred_on, occurred_at, \
             duration_minutes, status, classification_tags, reason, notes, summary, \
             recommendation, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(&record.subject_name)
        .bind(record.occurred_on)
        .bind(record.occurred_at)
        .bind(duration)
        .bind(record.status.as_str())
        .bind(&tags)
        .bind(&record.free_text.reason)
        .bind(&record.free_text.notes)
        .bind(&record.free_text.summary)
        .bind(&record.free_text.recommendation)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Overwrites the mutable fields of an existing record.
    pub async fn update_record(&self, record: &TimestampedRecord) -> PortResult<()> {
        let duration = duration_column(record)?;
        let tags: Vec<&str> = record.classification_tags.iter().map(|t| t.as_str()).collect();
        let result = sqlx::query(
            "UPDATE records SET subject_name = $2, occurred_on = $3, occurred_at = $4, \
             duration_minutes = $5, status = $6, classification_tags = $7, reason = $8, \
             notes = $9, summary = $10, recommendation = $11, updated_at = $12 \
             WHERE id = $1",
        )
        .bind(record.id)
        .bind(&record.subject_name)
        .bind(record.occurred_on)
        .bind(record.occurred_at)
        .bind(duration)
        .bind(record.status.as_str())
        .bind(&tags)
        .bind(&record.free_text.reason)
        .bind(&record.free_text.notes)
        .bind(&record.free_text.summary)
        .bind(&record.free_text.recommendation)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Record {} not found", record.id)));
        }
        Ok(())
    }

    /// Updates the record if it exists and inserts it otherwise.
    pub async fn save_record(&self, record: &TimestampedRecord) -> PortResult<ChangeType> {
        match self.update_record(record).await {
            Ok(()) => Ok(ChangeType::Updated),
            Err(PortError::NotFound(_)) => {
                self.insert_record(record).await?;
                Ok(ChangeType::Inserted)
            }
            Err(e) => Err(e),
        }
    }
}

/// The `duration_minutes` column is a Postgres `INTEGER`.
fn duration_column(record: &TimestampedRecord) -> PortResult<i32> {
    i32::try_from(record.duration_minutes).map_err(|_| {
        PortError::Unexpected(format!(
            "record {} has a duration too large to store ({})",
            record.id, record.duration_minutes
        ))
    })
}

fn map_sqlx_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct RecordRow {
    id: Uuid,
    owner_id: Uuid,
    subject_name: String,
    occurred_on: NaiveDate,
    occurred_at: NaiveTime,
    duration_minutes: i32,
    status: String,
    classification_tags: Vec<String>,
    reason: Option<String>,
    notes: Option<String>,
    summary: Option<String>,
    recommendation: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn to_domain(self) -> PortResult<TimestampedRecord> {
        let status = self
            .status
            .parse::<RecordStatus>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let classification_tags = self
            .classification_tags
            .iter()
            .map(|tag| tag.parse::<ClassificationTag>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let duration_minutes = u32::try_from(self.duration_minutes).map_err(|_| {
            PortError::Unexpected(format!(
                "record {} has a negative duration ({})",
                self.id, self.duration_minutes
            ))
        })?;

        Ok(TimestampedRecord {
            id: self.id,
            owner_id: self.owner_id,
            subject_name: self.subject_name,
            occurred_on: self.occurred_on,
            occurred_at: self.occurred_at,
            duration_minutes,
            status,
            classification_tags,
            free_text: FreeText {
                reason: self.reason,
                notes: self.notes,
                summary: self.summary,
                recommendation: self.recommendation,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// The JSON payload the `records` trigger sends with every notification.
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    id: Uuid,
    owner_id: Uuid,
    op: String,
    old_status: Option<String>,
    old_occurred_on: Option<NaiveDate>,
}

impl NotifyPayload {
    fn change(&self) -> ChangeType {
        if self.op.eq_ignore_ascii_case("UPDATE") {
            ChangeType::Updated
        } else {
            ChangeType::Inserted
        }
    }

    /// Whether the row matched `predicate` before this update.
    fn previously_matched(&self, current: &TimestampedRecord, predicate: &PushdownQuery) -> bool {
        let Some(old_on) = self.old_occurred_on else {
            return false;
        };
        let Some(old_status) = self.old_status.as_deref().and_then(|s| s.parse().ok()) else {
            return false;
        };
        let previous = TimestampedRecord {
            occurred_on: old_on,
            status: old_status,
            ..current.clone()
        };
        predicate.matches(&previous)
    }
}

async fn fetch_record(pool: &PgPool, id: Uuid) -> PortResult<TimestampedRecord> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = $1");
    sqlx::query_as::<_, RecordRow>(&sql)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?
        .to_domain()
}

/// Builds the keyset query for one page.
fn build_page_query<'a>(
    owner_id: Uuid,
    query: &'a PushdownQuery,
    cursor: Option<&'a QueryCursor>,
    page_size: usize,
    order: SortOrder,
) -> QueryBuilder<'a, Postgres> {
    let mut builder =
        QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM records WHERE owner_id = "));
    builder.push_bind(owner_id);

    if let Some(from) = query.date_from {
        builder.push(" AND occurred_on >= ").push_bind(from);
    }
    if let Some(to) = query.date_to {
        builder.push(" AND occurred_on <= ").push_bind(to);
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }

    let (comparison, direction) = match order {
        SortOrder::Ascending => (">", "ASC"),
        SortOrder::Descending => ("<", "DESC"),
    };
    if let Some(cursor) = cursor {
        let key = cursor.last_key;
        builder
            .push(format!(" AND (occurred_on, occurred_at, id) {comparison} ("))
            .push_bind(key.occurred_on)
            .push(", ")
            .push_bind(key.occurred_at)
            .push(", ")
            .push_bind(key.id)
            .push(")");
    }

    builder.push(format!(
        " ORDER BY occurred_on {direction}, occurred_at {direction}, id {direction} LIMIT "
    ));
    builder.push_bind(page_size as i64);
    builder
}

//=========================================================================================
// `RecordStoreService` Trait Implementation
//=========================================================================================

#[async_trait]
impl RecordStoreService for PgRecordStore {
    async fn query(
        &self,
        owner_id: Uuid,
        query: &PushdownQuery,
        cursor: Option<&QueryCursor>,
        page_size: usize,
        order: SortOrder,
    ) -> PortResult<StorePage> {
        let mut builder = build_page_query(owner_id, query, cursor, page_size, order);
        let rows = builder
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let records = rows
            .into_iter()
            .map(RecordRow::to_domain)
            .collect::<PortResult<Vec<_>>>()?;
        Ok(StorePage {
            raw_count: records.len(),
            records,
            continuation: None,
        })
    }

    async fn subscribe(
        &self,
        owner_id: Uuid,
        predicate: PushdownQuery,
    ) -> PortResult<Subscription> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        listener
            .listen(RECORD_EVENTS_CHANNEL)
            .await
            .map_err(map_sqlx_error)?;

        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        let token = CancellationToken::new();
        self.subscriptions.lock().await.insert(handle, token.clone());
        info!(subscription = %handle, %owner_id, "Listening for record changes");

        let pool = self.pool.clone();
        let events = async_stream::stream! {
            loop {
                let notification = tokio::select! {
                    _ = token.cancelled() => break,
                    received = listener.try_recv() => received,
                };
                let notification = match notification {
                    Ok(Some(notification)) => notification,
                    // The connection was lost: notifications may have been missed.
                    Ok(None) => {
                        warn!(subscription = %handle, "Listener connection lost");
                        let lost = "listener connection lost".to_string();
                        yield Err(PortError::SubscriptionClosed(lost));
                        break;
                    }
                    Err(e) => {
                        error!(subscription = %handle, "Listener failed: {}", e);
                        yield Err(PortError::SubscriptionClosed(e.to_string()));
                        break;
                    }
                };

                let payload: NotifyPayload = match serde_json::from_str(notification.payload()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(subscription = %handle, "Ignoring malformed notification: {}", e);
                        continue;
                    }
                };
                if payload.owner_id != owner_id {
                    continue;
                }

                match fetch_record(&pool, payload.id).await {
                    Ok(record) => {
                        let relevant = predicate.matches(&record)
                            || payload.previously_matched(&record, &predicate);
                        if relevant {
                            yield Ok(RecordEvent { record, change: payload.change() });
                        }
                    }
                    Err(PortError::NotFound(_)) => continue,
                    Err(e) => {
                        yield Err(e);
                    }
                }
            }
        };

        Ok(Subscription {
            handle,
            events: Box::pin(events),
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> PortResult<()> {
        if let Some(token) = self.subscriptions.lock().await.remove(&handle) {
            token.cancel();
            info!(subscription = %handle, "Stopped listening for record changes");
        }
        Ok(())
    }
}
