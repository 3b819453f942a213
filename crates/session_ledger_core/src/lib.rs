pub mod aggregator;
pub mod clock;
pub mod domain;
pub mod error;
pub mod export;
pub mod filter;
pub mod metrics;
pub mod paginator;
pub mod ports;

pub use aggregator::{RefreshTicket, RollingMetricsAggregator};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    ChangeType, ClassificationTag, DateRange, FilterSpecification, FreeText, PushdownQuery,
    QueryCursor, RecordEvent, RecordStatus, SortKey, SortOrder, TimestampedRecord,
};
pub use error::{EngineError, EngineResult};
pub use export::ExportField;
pub use filter::{compile, CompiledFilter, ResidualPredicate};
pub use metrics::{HealthStatus, HealthThresholds, MetricsConfig, MetricsSnapshot, PeriodMetrics};
pub use paginator::{
    CursorPaginator, Page, PageOutcome, PageRequest, PaginatorOptions, VisibleScan,
};
pub use ports::{
    PortError, PortResult, RecordEventStream, RecordStoreService, StorePage, Subscription,
    SubscriptionHandle,
};
