//! services/dashboard/src/views/history.rs
//!
//! Controller behind the session history list: owns one paginator, turns UI
//! intents (filter change, load more, refresh, export) into store round-trips
//! and exposes `{ records, has_more, loading, error }`.
//!
//! The paginator lock is never held across a store call, so a filter change can
//! land while a page is in flight. That page then completes as stale and is
//! dropped by the paginator.

use session_ledger_core::export::{self, ExportField};
use session_ledger_core::filter::compile;
use session_ledger_core::{
    CursorPaginator, EngineResult, FilterSpecification, PageOutcome, PaginatorOptions,
    RecordStoreService, TimestampedRecord, VisibleScan,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the list view renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryState {
    pub records: Vec<TimestampedRecord>,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<String>,
}

struct Inner {
    spec: FilterSpecification,
    paginator: CursorPaginator,
    in_flight: usize,
    error: Option<String>,
}

impl Inner {
    fn state(&self) -> HistoryState {
        HistoryState {
            records: self.paginator.accumulated().to_vec(),
            has_more: self.paginator.has_more(),
            loading: self.in_flight > 0,
            error: self.error.clone(),
        }
    }
}

pub struct HistoryView {
    id: Uuid,
    owner_id: Uuid,
    store: Arc<dyn RecordStoreService>,
    max_auto_pages: usize,
    inner: Mutex<Inner>,
}

impl HistoryView {
    /// Builds a view for `owner_id`. Nothing is fetched until the first load.
    pub fn new(
        store: Arc<dyn RecordStoreService>,
        owner_id: Uuid,
        spec: FilterSpecification,
        options: PaginatorOptions,
        max_auto_pages: usize,
    ) -> EngineResult<Self> {
        let filter = compile(&spec)?;
        let paginator = CursorPaginator::new(Arc::clone(&store), owner_id, filter, options);
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            store,
            max_auto_pages: max_auto_pages.max(1),
            inner: Mutex::new(Inner {
                spec,
                paginator,
                in_flight: 0,
                error: None,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub async fn filters(&self) -> FilterSpecification {
        self.inner.lock().await.spec.clone()
    }

    pub async fn state(&self) -> HistoryState {
        self.inner.lock().await.state()
    }

    /// Applies a new filter set. Any change, even a narrowing one, discards the
    /// loaded records and starts again from the first page.
    pub async fn on_filters_change(&self, spec: FilterSpecification) -> EngineResult<HistoryState> {
        let filter = compile(&spec)?;
        {
            let mut inner = self.inner.lock().await;
            if !inner.paginator.reset_if_changed(filter) {
                debug!(view = %self.id, "Filters unchanged");
                return Ok(inner.state());
            }
            inner.spec = spec;
            inner.error = None;
            info!(view = %self.id, owner_id = %self.owner_id, "History filters changed");
        }
        self.on_load_more().await
    }

    /// Fetches the next page. Pages the residual filter empties entirely are
    /// skipped, up to the configured number of round-trips.
    pub async fn on_load_more(&self) -> EngineResult<HistoryState> {
        let mut scan = {
            let inner = self.inner.lock().await;
            VisibleScan::new(self.max_auto_pages, inner.paginator.has_more())
        };
        loop {
            let request = {
                let mut inner = self.inner.lock().await;
                let Some(request) = inner.paginator.begin_fetch() else {
                    break;
                };
                inner.in_flight += 1;
                request
            };

            let result = request.send(self.store.as_ref()).await;

            let mut inner = self.inner.lock().await;
            inner.in_flight -= 1;
            match inner.paginator.complete_fetch(request, result) {
                Ok(PageOutcome::Applied(page)) => {
                    inner.error = None;
                    if !scan.absorb(page) {
                        break;
                    }
                }
                Ok(PageOutcome::Stale) => {
                    warn!(view = %self.id, "Load superseded by a newer query");
                    break;
                }
                Err(e) => {
                    inner.error = Some(e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(self.state().await)
    }

    /// Re-runs the current filters from the first page.
    pub async fn on_refresh(&self) -> EngineResult<HistoryState> {
        {
            let mut inner = self.inner.lock().await;
            let filter = inner.paginator.filter().clone();
            inner.paginator.reset(filter);
            inner.error = None;
        }
        self.on_load_more().await
    }

    /// Serializes the loaded records, optionally restricted to `selected_ids`.
    pub async fn on_export(
        &self,
        fields: &[ExportField],
        selected_ids: &[Uuid],
    ) -> EngineResult<String> {
        let inner = self.inner.lock().await;
        let rows = export::select_records(inner.paginator.accumulated(), selected_ids);
        info!(view = %self.id, rows = rows.len(), columns = fields.len(), "Exporting history");
        export::serialize(rows, fields)
    }

    pub async fn clear_error(&self) {
        self.inner.lock().await.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryRecordStore;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use session_ledger_core::{
        DateRange, EngineError, FreeText, PortError, RecordStatus, SortOrder,
    };

    fn owner() -> Uuid {
        Uuid::from_u128(7)
    }

    fn record(n: u128, day: u32, status: RecordStatus) -> TimestampedRecord {
        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        TimestampedRecord {
            id: Uuid::from_u128(n),
            owner_id: owner(),
            subject_name: format!("Subject {n}"),
            occurred_on: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            occurred_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration_minutes: 50,
            status,
            classification_tags: Vec::new(),
            free_text: FreeText::default(),
            created_at: stamp,
            updated_at: stamp,
        }
    }

    fn view(store: Arc<MemoryRecordStore>, page_size: usize) -> HistoryView {
        HistoryView::new(
            store,
            owner(),
            FilterSpecification::default(),
            PaginatorOptions {
                page_size,
                sort_order: SortOrder::Ascending,
            },
            10,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_completed_filter_loads_in_two_pages() {
        let mut records: Vec<_> = (1..=3).map(|n| record(n, 4, RecordStatus::Completed)).collect();
        records.extend((4..=5).map(|n| record(n, 4, RecordStatus::Pending)));
        let store = Arc::new(MemoryRecordStore::with_records(records));
        let view = view(store, 2);

        let spec = FilterSpecification {
            statuses: [RecordStatus::Completed].into(),
            ..Default::default()
        };
        let first = view.on_filters_change(spec).await.unwrap();
        assert_eq!((first.records.len(), first.has_more), (2, true));
        let second = view.on_load_more().await.unwrap();
        assert_eq!((second.records.len(), second.has_more), (3, false));
        assert!(!second.loading);
    }

    #[tokio::test]
    async fn test_auto_paging_is_bounded_per_load() {
        let records = (1..=8).map(|n| {
            let status = if n == 6 { RecordStatus::Cancelled } else { RecordStatus::Pending };
            record(n, n as u32, status)
        });
        let store = Arc::new(MemoryRecordStore::with_records(records));
        let view = HistoryView::new(
            store.clone(),
            owner(),
            FilterSpecification::default(),
            PaginatorOptions {
                page_size: 1,
                sort_order: SortOrder::Ascending,
            },
            3,
        )
        .unwrap();

        let spec = FilterSpecification {
            statuses: [RecordStatus::Cancelled, RecordStatus::Completed].into(),
            ..Default::default()
        };
        let first = view.on_filters_change(spec).await.unwrap();
        assert!(first.records.is_empty());
        assert!(first.has_more);
        assert_eq!(store.query_calls(), 3);

        let second = view.on_load_more().await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].id, Uuid::from_u128(6));
        assert_eq!(store.query_calls(), 6);
    }

    #[tokio::test]
    async fn test_invalid_filters_leave_view_untouched() {
        let records = (1..=3).map(|n| record(n, 2, RecordStatus::Completed));
        let store = Arc::new(MemoryRecordStore::with_records(records));
        let view = view(store.clone(), 10);
        view.on_load_more().await.unwrap();
        let calls = store.query_calls();

        let inverted = FilterSpecification {
            date_range: DateRange {
                from: NaiveDate::from_ymd_opt(2024, 5, 9),
                to: NaiveDate::from_ymd_opt(2024, 5, 1),
            },
            ..Default::default()
        };
        let err = view.on_filters_change(inverted).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidFilterSpecification(_)));
        assert_eq!(store.query_calls(), calls);
        assert_eq!(view.state().await.records.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_keeps_records_and_exposes_error() {
        let records = (1..=4).map(|n| record(n, n as u32, RecordStatus::Completed));
        let store = Arc::new(MemoryRecordStore::with_records(records));
        let view = view(store.clone(), 2);
        view.on_load_more().await.unwrap();

        store
            .fail_next_queries(1, PortError::Unavailable("timeout".into()))
            .await;
        assert!(view.on_load_more().await.unwrap_err().is_retryable());
        let state = view.state().await;
        assert_eq!(state.records.len(), 2);
        assert!(state.error.is_some());
        assert!(state.has_more);

        view.clear_error().await;
        assert!(view.state().await.error.is_none());
        assert_eq!(view.on_load_more().await.unwrap().records.len(), 4);
    }

    #[tokio::test]
    async fn test_unchanged_filters_do_not_refetch() {
        let records = (1..=3).map(|n| record(n, 2, RecordStatus::Completed));
        let store = Arc::new(MemoryRecordStore::with_records(records));
        let view = view(store.clone(), 10);
        view.on_load_more().await.unwrap();
        let calls = store.query_calls();
        view.on_filters_change(FilterSpecification::default()).await.unwrap();
        assert_eq!(store.query_calls(), calls);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_records() {
        let records = (1..=2).map(|n| record(n, 2, RecordStatus::Completed));
        let store = Arc::new(MemoryRecordStore::with_records(records));
        let view = view(store.clone(), 10);
        view.on_load_more().await.unwrap();
        store.upsert(record(3, 3, RecordStatus::Pending)).await;
        assert_eq!(view.on_refresh().await.unwrap().records.len(), 3);
    }

    #[tokio::test]
    async fn test_export_of_selected_rows() {
        let records = (1..=3).map(|n| record(n, n as u32, RecordStatus::Completed));
        let store = Arc::new(MemoryRecordStore::with_records(records));
        let view = view(store, 10);
        view.on_load_more().await.unwrap();

        let csv = view
            .on_export(&[ExportField::SubjectName, ExportField::Date], &[Uuid::from_u128(2)])
            .await
            .unwrap();
        assert_eq!(csv, "Subject,Date\nSubject 2,2024-05-02");
    }
}
