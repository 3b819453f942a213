//! services/dashboard/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::views::metrics_feed::compute_once;
use crate::views::HistoryView;
use crate::web::protocol::{
    CreateHistoryRequest, ExportRequest, FilterPayload, HistoryResponse, LiveEventDto,
    MetricsDto, PeriodDto, RecordDto, ScopeQuery,
};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use session_ledger_core::export::{parse_fields, ExportField};
use session_ledger_core::{EngineError, PaginatorOptions, SortOrder};
use std::sync::Arc;
use tracing::warn;
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_history_handler,
        update_filters_handler,
        load_more_handler,
        refresh_history_handler,
        export_history_handler,
        close_history_handler,
        metrics_handler,
    ),
    components(
        schemas(
            FilterPayload,
            CreateHistoryRequest,
            ExportRequest,
            RecordDto,
            HistoryResponse,
            PeriodDto,
            MetricsDto,
            LiveEventDto,
        )
    ),
    tags(
        (name = "Session Ledger API", description = "Filtered session history and rolling activity metrics.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// History Handlers
//=========================================================================================

/// Open a history list view for an owner and load its first page.
///
/// A store failure during the first load still creates the view; the error is
/// reported in the returned state so the client can retry with `/more`.
#[utoipa::path(
    post,
    path = "/owners/{owner_id}/history",
    request_body = CreateHistoryRequest,
    responses(
        (status = 201, description = "View created", body = HistoryResponse),
        (status = 400, description = "Invalid filters, page size or sort order"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("owner_id" = Uuid, Path, description = "The owner whose records are listed.")
    )
)]
pub async fn create_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(owner_id): Path<Uuid>,
    Json(request): Json<CreateHistoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let defaults = app_state.config.paginator;
    let sort_order = match request.sort.as_deref() {
        Some(sort) => sort.parse::<SortOrder>().map_err(|e| {
            EngineError::InvalidFilterSpecification(e.to_string())
        })?,
        None => defaults.sort_order,
    };
    let page_size = request.page_size.unwrap_or(defaults.page_size);
    if page_size == 0 {
        let reason = "page size must be at least 1".to_string();
        return Err(EngineError::InvalidFilterSpecification(reason).into());
    }

    let view = HistoryView::new(
        Arc::clone(&app_state.store),
        owner_id,
        request.filters.into_spec()?,
        PaginatorOptions { page_size, sort_order },
        app_state.config.max_auto_pages,
    )?;
    let view = app_state.register_view(view).await;

    let state = match view.on_load_more().await {
        Ok(state) => state,
        Err(e) => {
            warn!(view = %view.id(), "First page failed: {}", e);
            view.state().await
        }
    };
    Ok((StatusCode::CREATED, Json(HistoryResponse::new(view.id(), state))))
}

/// Replace the filters of a view. Any change restarts it from the first page.
#[utoipa::path(
    put,
    path = "/history/{view_id}/filters",
    request_body = FilterPayload,
    responses(
        (status = 200, description = "Filters applied", body = HistoryResponse),
        (status = 400, description = "Invalid filters"),
        (status = 404, description = "Unknown view"),
        (status = 503, description = "Record store unavailable")
    ),
    params(("view_id" = Uuid, Path, description = "The history view."))
)]
pub async fn update_filters_handler(
    State(app_state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
    Json(filters): Json<FilterPayload>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let view = app_state.view(view_id).await?;
    let state = view.on_filters_change(filters.into_spec()?).await?;
    Ok(Json(HistoryResponse::new(view_id, state)))
}

/// Load the next page of a view.
#[utoipa::path(
    post,
    path = "/history/{view_id}/more",
    responses(
        (status = 200, description = "Next page appended", body = HistoryResponse),
        (status = 404, description = "Unknown view"),
        (status = 503, description = "Record store unavailable")
    ),
    params(("view_id" = Uuid, Path, description = "The history view."))
)]
pub async fn load_more_handler(
    State(app_state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let view = app_state.view(view_id).await?;
    let state = view.on_load_more().await?;
    Ok(Json(HistoryResponse::new(view_id, state)))
}

/// Reload a view from the first page with its current filters.
#[utoipa::path(
    post,
    path = "/history/{view_id}/refresh",
    responses(
        (status = 200, description = "View reloaded", body = HistoryResponse),
        (status = 404, description = "Unknown view"),
        (status = 503, description = "Record store unavailable")
    ),
    params(("view_id" = Uuid, Path, description = "The history view."))
)]
pub async fn refresh_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let view = app_state.view(view_id).await?;
    let state = view.on_refresh().await?;
    Ok(Json(HistoryResponse::new(view_id, state)))
}

/// Export the loaded records of a view as CSV.
#[utoipa::path(
    post,
    path = "/history/{view_id}/export",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "CSV document", content_type = "text/csv", body = String),
        (status = 400, description = "Unknown export field"),
        (status = 404, description = "Unknown view")
    ),
    params(("view_id" = Uuid, Path, description = "The history view."))
)]
pub async fn export_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
    Json(request): Json<ExportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = app_state.view(view_id).await?;
    let fields = match request.fields {
        Some(names) => parse_fields(&names)?,
        None => ExportField::ESSENTIAL.to_vec(),
    };
    let csv = view.on_export(&fields, &request.selected_ids).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"history.csv\""),
        ],
        csv,
    ))
}

/// Close a view and release its records.
#[utoipa::path(
    delete,
    path = "/history/{view_id}",
    responses(
        (status = 204, description = "View closed"),
        (status = 404, description = "Unknown view")
    ),
    params(("view_id" = Uuid, Path, description = "The history view."))
)]
pub async fn close_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    app_state.close_view(view_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Metrics Handlers
//=========================================================================================

/// Compute the rolling metrics for an owner once.
#[utoipa::path(
    get,
    path = "/owners/{owner_id}/metrics",
    responses(
        (status = 200, description = "Current metrics", body = MetricsDto),
        (status = 400, description = "Invalid scope"),
        (status = 503, description = "Record store unavailable")
    ),
    params(
        ("owner_id" = Uuid, Path, description = "The owner whose records are aggregated."),
        ScopeQuery
    )
)]
pub async fn metrics_handler(
    State(app_state): State<Arc<AppState>>,
    Path(owner_id): Path<Uuid>,
    Query(scope): Query<ScopeQuery>,
) -> Result<Json<MetricsDto>, ApiError> {
    let spec = FilterPayload::from(scope).into_spec()?;
    let snapshot = compute_once(
        Arc::clone(&app_state.store),
        owner_id,
        &spec,
        &app_state.feed_settings(),
        app_state.clock.as_ref(),
    )
    .await?;
    Ok(Json(MetricsDto::from(&snapshot)))
}
