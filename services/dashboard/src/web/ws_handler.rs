//! services/dashboard/src/web/ws_handler.rs
//!
//! The live metrics socket. Each connection owns one `MetricsFeed`; every view
//! the feed publishes is forwarded to the client, and client messages become
//! feed commands. Closing the socket shuts the feed down.

use crate::views::MetricsFeed;
use crate::web::protocol::{ClientMessage, FilterPayload, ScopeQuery, ServerMessage};
use crate::web::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use session_ledger_core::FilterSpecification;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn metrics_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Path(owner_id): Path<Uuid>,
    Query(scope): Query<ScopeQuery>,
) -> Response {
    // Reject an invalid initial scope before upgrading.
    let spec = match FilterPayload::from(scope).into_spec() {
        Ok(spec) => spec,
        Err(e) => return crate::error::ApiError::from(e).into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, owner_id, spec))
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            false
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    owner_id: Uuid,
    scope: FilterSpecification,
) {
    info!("New metrics connection established for owner: {}", owner_id);
    let (mut sender, mut receiver) = socket.split();

    let feed = match MetricsFeed::spawn(
        Arc::clone(&app_state.store),
        owner_id,
        scope,
        app_state.feed_settings(),
        Arc::clone(&app_state.clock),
    ) {
        Ok(feed) => feed,
        Err(e) => {
            error!("Failed to start metrics feed: {}", e);
            let message = ServerMessage::Error {
                message: e.to_string(),
            };
            let _ = send_message(&mut sender, &message).await;
            return;
        }
    };
    let mut updates = feed.subscribe();

    let initial = ServerMessage::from(&*updates.borrow_and_update());
    if !send_message(&mut sender, &initial).await {
        feed.shutdown().await;
        return;
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let message = ServerMessage::from(&*updates.borrow_and_update());
                if !send_message(&mut sender, &message).await {
                    warn!("Failed to push metrics to owner {}", owner_id);
                    break;
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Metrics socket error: {}", e);
                        break;
                    }
                };
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Refresh) => feed.refresh(),
                    Ok(ClientMessage::ClearError) => feed.clear_error(),
                    Ok(ClientMessage::Scope { filters }) => {
                        let applied = filters
                            .into_spec()
                            .and_then(|spec| feed.set_scope(spec));
                        if let Err(e) = applied {
                            let reply = ServerMessage::Error { message: e.to_string() };
                            if !send_message(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Unrecognized client message: {}", e);
                        let reply = ServerMessage::Error {
                            message: format!("Unrecognized message: {}", e),
                        };
                        if !send_message(&mut sender, &reply).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    feed.shutdown().await;
    info!("Metrics connection closed for owner: {}", owner_id);
}
