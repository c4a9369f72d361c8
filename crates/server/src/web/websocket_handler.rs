use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::web::middleware::auth::bearer_matches;
use crate::web::{AppError, AppState};

#[derive(Deserialize, Debug)]
pub struct WebSocketAuthQuery {
    token: Option<String>,
}

/// Streams change hints to the dashboard. Browsers cannot set headers on a
/// websocket upgrade, so the bearer token travels as `?token=`.
pub async fn events_websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<WebSocketAuthQuery>,
) -> impl IntoResponse {
    if !bearer_matches(&app_state, query.token.as_deref()) {
        return AppError::InvalidCredentials.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(mut socket: WebSocket, app_state: Arc<AppState>) {
    info!("Dashboard event stream connected.");
    let mut rx = app_state.events.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let json_data = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize change event.");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(Utf8Bytes::from(json_data))).await.is_err() {
                        debug!("Error sending change event. Closing stream.");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // The dashboard re-polls anyway; dropped hints only delay it.
                    warn!(skipped, "Event stream lagged behind.");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Event stream receive error.");
                    break;
                }
            },
        }
    }
    info!("Dashboard event stream disconnected.");
}
