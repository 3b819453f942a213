//! services/dashboard/src/views/metrics_feed.rs
//!
//! The live overview controller. A spawned worker owns a
//! `RollingMetricsAggregator`, the store subscription and the in-flight full
//! refresh, and publishes `{ snapshot, recent_events, loading, error }` on a
//! `watch` channel. The handle only sends commands and cancels.

use futures::StreamExt;
use session_ledger_core::filter::compile;
use session_ledger_core::metrics::lookback_start;
use session_ledger_core::ports::{PortResult, Subscription};
use session_ledger_core::{
    Clock, CompiledFilter, CursorPaginator, EngineError, EngineResult, FilterSpecification,
    MetricsConfig, MetricsSnapshot, PaginatorOptions, RecordEvent, RecordStoreService,
    RefreshTicket, RollingMetricsAggregator, TimestampedRecord,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the live overview renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsView {
    pub snapshot: Option<MetricsSnapshot>,
    pub recent_events: Vec<RecordEvent>,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub metrics: MetricsConfig,
    pub paginator: PaginatorOptions,
    /// Delay before reopening a dropped subscription.
    pub resubscribe_backoff: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            metrics: MetricsConfig::default(),
            paginator: PaginatorOptions::default(),
            resubscribe_backoff: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug)]
enum FeedCommand {
    Refresh,
    SetScope(FilterSpecification, CompiledFilter),
    ClearError,
}

/// Drains every record in `scope` that can still fall inside a rolling window.
pub async fn fetch_scope_records(
    store: Arc<dyn RecordStoreService>,
    owner_id: Uuid,
    scope: &CompiledFilter,
    options: PaginatorOptions,
    clock: &dyn Clock,
) -> EngineResult<Vec<TimestampedRecord>> {
    let filter = scope.clone().with_lookback(lookback_start(clock.now().date()));
    let mut paginator = CursorPaginator::new(store, owner_id, filter, options);
    let drained = paginator.fetch_all().await.map(|records| records.len());
    let count = drained?;
    debug!(%owner_id, records = count, "Scope drained for metrics");
    Ok(paginator.into_records())
}

/// One-shot snapshot for `scope`, without a live subscription.
pub async fn compute_once(
    store: Arc<dyn RecordStoreService>,
    owner_id: Uuid,
    scope: &FilterSpecification,
    settings: &FeedSettings,
    clock: &dyn Clock,
) -> EngineResult<MetricsSnapshot> {
    let filter = compile(scope)?;
    let records = fetch_scope_records(store, owner_id, &filter, settings.paginator, clock).await?;
    let mut aggregator = RollingMetricsAggregator::new(settings.metrics.clone(), filter);
    Ok(aggregator.load(records, clock.now()).clone())
}

//=========================================================================================
// The Handle
//=========================================================================================

pub struct MetricsFeed {
    owner_id: Uuid,
    commands: mpsc::UnboundedSender<FeedCommand>,
    view: watch::Receiver<MetricsView>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MetricsFeed {
    /// Starts the worker: subscribe, then load the scope in full.
    pub fn spawn(
        store: Arc<dyn RecordStoreService>,
        owner_id: Uuid,
        scope: FilterSpecification,
        settings: FeedSettings,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        let filter = compile(&scope)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(MetricsView {
            loading: true,
            ..MetricsView::default()
        });
        let token = CancellationToken::new();

        let worker = FeedWorker {
            store,
            owner_id,
            aggregator: RollingMetricsAggregator::new(settings.metrics.clone(), filter),
            settings,
            clock,
            commands: command_rx,
            refresh_tx,
            refresh_rx,
            refresh_task: None,
            subscription: None,
            resubscribe_at: None,
            view: view_tx,
            token: token.clone(),
        };
        let task = tokio::spawn(worker.run());
        info!(%owner_id, "Metrics feed started");

        Ok(Self {
            owner_id,
            commands: command_tx,
            view: view_rx,
            token,
            task: Some(task),
        })
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    /// A receiver that observes every published view.
    pub fn subscribe(&self) -> watch::Receiver<MetricsView> {
        self.view.clone()
    }

    pub fn current(&self) -> MetricsView {
        self.view.borrow().clone()
    }

    /// Discards the aggregator's records and reloads the scope in full.
    pub fn refresh(&self) {
        self.send(FeedCommand::Refresh);
    }

    /// Switches to a new scope. Invalid specifications are rejected here and
    /// never reach the worker.
    pub fn set_scope(&self, scope: FilterSpecification) -> EngineResult<()> {
        let filter = compile(&scope)?;
        self.send(FeedCommand::SetScope(scope, filter));
        Ok(())
    }

    pub fn clear_error(&self) {
        self.send(FeedCommand::ClearError);
    }

    /// Stops the worker and waits until it has unsubscribed. Nothing is
    /// published afterwards.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(owner_id = %self.owner_id, "Metrics feed worker panicked: {}", e);
            }
        }
    }

    fn send(&self, command: FeedCommand) {
        if self.commands.send(command).is_err() {
            warn!(owner_id = %self.owner_id, "Metrics feed worker is gone");
        }
    }
}

impl Drop for MetricsFeed {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

//=========================================================================================
// The Worker
//=========================================================================================

struct FeedWorker {
    store: Arc<dyn RecordStoreService>,
    owner_id: Uuid,
    aggregator: RollingMetricsAggregator,
    settings: FeedSettings,
    clock: Arc<dyn Clock>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    refresh_tx: mpsc::UnboundedSender<(RefreshTicket, EngineResult<Vec<TimestampedRecord>>)>,
    refresh_rx: mpsc::UnboundedReceiver<(RefreshTicket, EngineResult<Vec<TimestampedRecord>>)>,
    refresh_task: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
    resubscribe_at: Option<Instant>,
    view: watch::Sender<MetricsView>,
    token: CancellationToken,
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<PortResult<RecordEvent>> {
    match subscription {
        Some(subscription) => subscription.events.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl FeedWorker {
    async fn run(mut self) {
        self.open_subscription().await;
        self.start_refresh();

        loop {
            let debounce = self.aggregator.debounce_deadline().map(Instant::from_std);
            tokio::select! {
                _ = self.token.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_event(&mut self.subscription) => self.handle_event(event).await,
                Some((ticket, result)) = self.refresh_rx.recv() => {
                    self.finish_refresh(ticket, result)
                }
                _ = sleep_until_opt(debounce) => self.poll_debounce(),
                _ = sleep_until_opt(self.resubscribe_at) => {
                    self.resubscribe_at = None;
                    if self.open_subscription().await {
                        self.start_refresh();
                    }
                }
            }
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Refresh => self.start_refresh(),
            FeedCommand::SetScope(scope, filter) => {
                info!(owner_id = %self.owner_id, ?scope, "Metrics scope changed");
                self.aggregator.reset(filter);
                self.view.send_replace(MetricsView {
                    loading: true,
                    ..MetricsView::default()
                });
                self.close_subscription().await;
                self.resubscribe_at = None;
                self.open_subscription().await;
                self.start_refresh();
            }
            FeedCommand::ClearError => {
                self.view.send_modify(|view| view.error = None);
            }
        }
    }

    async fn handle_event(&mut self, event: Option<PortResult<RecordEvent>>) {
        let reason = match event {
            Some(Ok(event)) => {
                debug!(owner_id = %self.owner_id, record = %event.record.id, "Live event");
                self.aggregator.nudge(event, Instant::now().into_std());
                return;
            }
            Some(Err(e)) => e.to_string(),
            None => "event stream ended".to_string(),
        };

        warn!(owner_id = %self.owner_id, "Subscription dropped: {}", reason);
        let dropped = EngineError::SubscriptionDropped(reason);
        self.view.send_modify(|view| view.error = Some(dropped.to_string()));
        self.close_subscription().await;
        self.resubscribe_at = Some(Instant::now() + self.settings.resubscribe_backoff);
    }

    fn poll_debounce(&mut self) {
        let now = self.clock.now();
        if self.aggregator.poll(Instant::now().into_std(), now).is_some() {
            self.publish_snapshot(false);
        }
    }

    /// Returns whether the subscription is open. On failure a retry is scheduled.
    async fn open_subscription(&mut self) -> bool {
        let predicate = self.aggregator.scope().pushdown.clone();
        match self.store.subscribe(self.owner_id, predicate).await {
            Ok(subscription) => {
                info!(
                    owner_id = %self.owner_id,
                    subscription = %subscription.handle,
                    "Subscribed to record changes"
                );
                self.subscription = Some(subscription);
                true
            }
            Err(e) => {
                error!(owner_id = %self.owner_id, "Failed to subscribe: {}", e);
                let failed = EngineError::from(e);
                self.view.send_modify(|view| view.error = Some(failed.to_string()));
                self.resubscribe_at = Some(Instant::now() + self.settings.resubscribe_backoff);
                false
            }
        }
    }

    async fn close_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = self.store.unsubscribe(subscription.handle).await {
                warn!(subscription = %subscription.handle, "Failed to unsubscribe: {}", e);
            }
        }
    }

    fn start_refresh(&mut self) {
        if let Some(previous) = self.refresh_task.take() {
            previous.abort();
        }
        let ticket = self.aggregator.begin_refresh();
        self.view.send_modify(|view| view.loading = true);

        let store = Arc::clone(&self.store);
        let owner_id = self.owner_id;
        let scope = self.aggregator.scope().clone();
        let options = self.settings.paginator;
        let clock = Arc::clone(&self.clock);
        let results = self.refresh_tx.clone();
        debug!(%owner_id, generation = ticket.generation(), "Metrics refresh started");
        self.refresh_task = Some(tokio::spawn(async move {
            let result =
                fetch_scope_records(store, owner_id, &scope, options, clock.as_ref()).await;
            let _ = results.send((ticket, result));
        }));
    }

    fn finish_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: EngineResult<Vec<TimestampedRecord>>,
    ) {
        let now = self.clock.now();
        match self.aggregator.finish_refresh(ticket, result, now) {
            Ok(Some(_)) => {
                self.refresh_task = None;
                self.publish_snapshot(true);
            }
            Ok(None) => {}
            Err(e) => {
                self.refresh_task = None;
                error!(owner_id = %self.owner_id, "Metrics refresh failed: {}", e);
                self.view.send_modify(|view| {
                    view.loading = false;
                    view.error = Some(e.to_string());
                });
            }
        }
    }

    /// Publishes the aggregator's snapshot and recent events. A completed refresh
    /// also clears any error left by an earlier failure or dropped subscription.
    fn publish_snapshot(&self, refreshed: bool) {
        let snapshot = self.aggregator.snapshot().cloned();
        let recent_events: Vec<RecordEvent> = self.aggregator.recent_events().cloned().collect();
        let loading = self.refresh_task.is_some();
        self.view.send_modify(|view| {
            view.snapshot = snapshot;
            view.recent_events = recent_events;
            view.loading = loading;
            if refreshed {
                view.error = None;
            }
        });
    }

    async fn teardown(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.close_subscription().await;
        info!(owner_id = %self.owner_id, "Metrics feed stopped");
    }
}
