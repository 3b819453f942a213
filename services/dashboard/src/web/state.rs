//! services/dashboard/src/web/state.rs
//!
//! Defines the application's shared state and the registry of open history views.

use crate::config::Config;
use crate::error::ApiError;
use crate::views::{FeedSettings, HistoryView};
use session_ledger_core::{Clock, RecordStoreService};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

/// A registered view and when a request last reached it.
pub struct ViewEntry {
    view: Arc<HistoryView>,
    last_used: Instant,
}

impl ViewEntry {
    fn is_idle(&self, at: Instant, timeout: std::time::Duration) -> bool {
        at.saturating_duration_since(self.last_used) >= timeout
    }
}

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStoreService>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub views: Arc<RwLock<HashMap<Uuid, ViewEntry>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStoreService>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            views: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Settings for a metrics feed, derived from the loaded configuration.
    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            metrics: self.config.metrics.clone(),
            paginator: self.config.paginator,
            resubscribe_backoff: self.config.resubscribe_backoff,
        }
    }

    /// Adds `view` to the registry. Idle views are evicted first, then the
    /// owner's least recently used views beyond the per-owner cap.
    pub async fn register_view(&self, view: HistoryView) -> Arc<HistoryView> {
        let view = Arc::new(view);
        let now = Instant::now();
        let mut views = self.views.write().await;
        self.evict_idle(&mut views, now);

        let owner_id = view.owner_id();
        let mut owned: Vec<(Uuid, Instant)> = views
            .iter()
            .filter(|(_, entry)| entry.view.owner_id() == owner_id)
            .map(|(id, entry)| (*id, entry.last_used))
            .collect();
        let cap = self.config.max_views_per_owner.max(1);
        if owned.len() >= cap {
            owned.sort_by_key(|(_, last_used)| *last_used);
            for (id, _) in owned.iter().take(owned.len() + 1 - cap) {
                views.remove(id);
                info!(view = %id, owner_id = %owner_id, "History view evicted to make room");
            }
        }

        views.insert(
            view.id(),
            ViewEntry {
                view: Arc::clone(&view),
                last_used: now,
            },
        );
        info!(view = %view.id(), owner_id = %owner_id, "History view opened");
        view
    }

    /// Looks a view up and marks it as used. A view idle past the timeout is
    /// treated as closed.
    pub async fn view(&self, view_id: Uuid) -> Result<Arc<HistoryView>, ApiError> {
        let now = Instant::now();
        let mut views = self.views.write().await;
        let timeout = self.config.view_idle_timeout;
        let entry = views
            .get_mut(&view_id)
            .ok_or(ApiError::ViewNotFound(view_id))?;
        if !entry.is_idle(now, timeout) {
            entry.last_used = now;
            return Ok(Arc::clone(&entry.view));
        }
        views.remove(&view_id);
        info!(view = %view_id, "History view expired");
        Err(ApiError::ViewNotFound(view_id))
    }

    pub async fn close_view(&self, view_id: Uuid) -> Result<(), ApiError> {
        self.views
            .write()
            .await
            .remove(&view_id)
            .map(|_| info!(view = %view_id, "History view closed"))
            .ok_or(ApiError::ViewNotFound(view_id))
    }

    /// Drops every view idle past the timeout and returns how many went.
    pub async fn sweep_idle_views(&self) -> usize {
        let mut views = self.views.write().await;
        self.evict_idle(&mut views, Instant::now())
    }

    pub async fn open_views(&self) -> usize {
        self.views.read().await.len()
    }

    fn evict_idle(&self, views: &mut HashMap<Uuid, ViewEntry>, now: Instant) -> usize {
        let timeout = self.config.view_idle_timeout;
        let before = views.len();
        views.retain(|_, entry| !entry.is_idle(now, timeout));
        let evicted = before - views.len();
        if evicted > 0 {
            info!(evicted, "Idle history views evicted");
        }
        evicted
    }
}
