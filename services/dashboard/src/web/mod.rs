pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers to make them easily accessible
// to the binary that will build the web server router.
pub use rest::{
    close_history_handler, create_history_handler, export_history_handler, load_more_handler,
    metrics_handler, refresh_history_handler, update_filters_handler,
};
pub use ws_handler::metrics_ws_handler;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use state::AppState;
use std::sync::Arc;

/// The API routes, without middleware or documentation.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/owners/{owner_id}/history", post(create_history_handler))
        .route("/owners/{owner_id}/metrics", get(metrics_handler))
        .route("/owners/{owner_id}/metrics/ws", get(metrics_ws_handler))
        .route("/history/{view_id}", delete(close_history_handler))
        .route("/history/{view_id}/filters", put(update_filters_handler))
        .route("/history/{view_id}/more", post(load_more_handler))
        .route("/history/{view_id}/refresh", post(refresh_history_handler))
        .route("/history/{view_id}/export", post(export_history_handler))
        .with_state(app_state)
}
