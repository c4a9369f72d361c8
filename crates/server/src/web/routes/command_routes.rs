use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::models::Command;
use crate::server::command_queue::PollPolicy;
use crate::web::{AppError, AppState};

pub fn create_command_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}", get(get_command_handler))
        .route("/{id}/wait", post(wait_for_command_handler))
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    /// Lowers the poll cap for this request; never raises it.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct WaitResponse {
    pub command: Command,
    pub timed_out: bool,
}

async fn get_command_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Command>, AppError> {
    let command = app_state
        .command_queue
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Command {id} not found")))?;
    Ok(Json(command))
}

async fn wait_for_command_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<WaitResponse>, AppError> {
    let mut policy = PollPolicy::default();
    if let Some(cap) = query.max_attempts {
        policy.max_attempts = cap.clamp(1, policy.max_attempts);
    }

    // Subscribe before the first read so a result landing in between is not missed.
    let hints = app_state.events.subscribe();
    let current = app_state
        .command_queue
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Command {id} not found")))?;
    if current.status.is_terminal() {
        return Ok(Json(WaitResponse {
            command: current,
            timed_out: false,
        }));
    }

    let outcome = app_state
        .command_queue
        .wait_for_result(id, policy, Some(hints))
        .await?;
    let timed_out = outcome.timed_out();
    Ok(Json(WaitResponse {
        command: outcome.into_command(),
        timed_out,
    }))
}
