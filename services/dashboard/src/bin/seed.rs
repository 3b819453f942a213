//! services/dashboard/src/bin/seed.rs
//!
//! Writes demo records for one owner into the configured Postgres database.
//! Usage: `seed [OWNER_ID] [DAYS]`. A random owner and 45 days are used by default.

use chrono::Utc;
use dashboard_lib::{
    adapters::PgRecordStore,
    config::{Config, StoreBackend},
    error::ApiError,
    seed::demo_records,
};
use session_ledger_core::ChangeType;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let StoreBackend::Postgres { database_url } = &config.store else {
        return Err(ApiError::Internal("seeding requires STORE_BACKEND=postgres".to_string()));
    };

    let mut args = std::env::args().skip(1);
    let owner_id = match args.next() {
        Some(raw) => raw
            .parse::<Uuid>()
            .map_err(|e| ApiError::Internal(format!("invalid owner id '{raw}': {e}")))?,
        None => Uuid::new_v4(),
    };
    let days = match args.next() {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|e| ApiError::Internal(format!("invalid day count '{raw}': {e}")))?,
        None => 45,
    };

    let db_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await?;
    let store = PgRecordStore::new(db_pool);
    store.run_migrations().await?;

    let (mut inserted, mut updated) = (0usize, 0usize);
    for record in demo_records(owner_id, Utc::now().date_naive(), days) {
        match store.save_record(&record).await? {
            ChangeType::Inserted => inserted += 1,
            ChangeType::Updated => updated += 1,
        }
    }
    info!(%owner_id, days, inserted, updated, "Demo records written");
    println!("Seeded owner {}", owner_id);
    Ok(())
}
