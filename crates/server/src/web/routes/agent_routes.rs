//! Endpoints polled by agents. Authenticated by `X-API-Key`, except
//! registration which presents the enrollment token instead.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use fleetwatch_common::wire::{
    Command, CommandResultRequest, IngestAck, MetricsPayload, RegisterRequest, RegisterResponse,
    ServiceReport, SystemInfo,
};
use fleetwatch_common::{CommandStatus, ENROLLMENT_TOKEN_HEADER};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::enums::{AlertMetric, Comparison, Severity};
use crate::db::models::{Alert, NewAlert};
use crate::web::middleware::auth::AgentServer;
use crate::web::{AppError, AppState};

pub fn create_agent_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ingest/register", post(register_handler))
        .route("/ingest/metrics", post(ingest_metrics_handler))
        .route("/ingest/services", post(ingest_services_handler))
        .route("/ingest/system-info", post(system_info_handler))
        .route("/commands", get(pending_commands_handler))
        .route("/command-result", post(command_result_handler))
        .route("/commands/{id}", patch(update_command_handler))
        .route("/alerts", post(agent_alert_handler))
}

#[derive(Debug, Deserialize)]
pub struct CommandUpdateRequest {
    pub status: CommandStatus,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentAlertRequest {
    pub metric: AlertMetric,
    #[serde(default)]
    pub operator: Option<Comparison>,
    pub threshold: f64,
    pub observed_value: f64,
    pub severity: Severity,
    pub message: String,
}

async fn register_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let token = headers
        .get(ENROLLMENT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    let response = app_state.gateway.register(token, payload).await?;
    Ok(Json(response))
}

async fn ingest_metrics_handler(
    State(app_state): State<Arc<AppState>>,
    AgentServer(server): AgentServer,
    Json(payload): Json<MetricsPayload>,
) -> Result<Json<IngestAck>, AppError> {
    let ack = app_state.gateway.ingest_metrics(server.id, payload).await?;
    Ok(Json(ack))
}

async fn ingest_services_handler(
    State(app_state): State<Arc<AppState>>,
    AgentServer(server): AgentServer,
    Json(services): Json<Vec<ServiceReport>>,
) -> Result<Json<IngestAck>, AppError> {
    let ack = app_state.gateway.ingest_services(server.id, services).await?;
    Ok(Json(ack))
}

async fn system_info_handler(
    State(app_state): State<Arc<AppState>>,
    AgentServer(server): AgentServer,
    Json(info): Json<SystemInfo>,
) -> Result<Json<IngestAck>, AppError> {
    let ack = app_state.gateway.update_system_info(server.id, info).await?;
    Ok(Json(ack))
}

async fn pending_commands_handler(
    State(app_state): State<Arc<AppState>>,
    AgentServer(server): AgentServer,
) -> Result<Json<Vec<Command>>, AppError> {
    let commands = app_state.gateway.list_pending_commands(server.id).await?;
    Ok(Json(commands))
}

async fn command_result_handler(
    State(app_state): State<Arc<AppState>>,
    AgentServer(server): AgentServer,
    Json(result): Json<CommandResultRequest>,
) -> Result<Json<Command>, AppError> {
    let command = app_state
        .gateway
        .report_command_result(server.id, result)
        .await?;
    Ok(Json(command))
}

/// Same transition as `/command-result`, with the id in the path.
async fn update_command_handler(
    State(app_state): State<Arc<AppState>>,
    AgentServer(server): AgentServer,
    Path(id): Path<Uuid>,
    Json(update): Json<CommandUpdateRequest>,
) -> Result<Json<Command>, AppError> {
    let command = app_state
        .gateway
        .report_command_result(
            server.id,
            CommandResultRequest {
                id,
                output: update.output,
                status: update.status,
            },
        )
        .await?;
    Ok(Json(command))
}

async fn agent_alert_handler(
    State(app_state): State<Arc<AppState>>,
    AgentServer(server): AgentServer,
    Json(payload): Json<AgentAlertRequest>,
) -> Result<(StatusCode, Json<Alert>), AppError> {
    let message = payload.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::InvalidInput("alert message is required".to_string()));
    }
    if !payload.threshold.is_finite() || !payload.observed_value.is_finite() {
        return Err(AppError::InvalidInput(
            "threshold and observed_value must be numbers".to_string(),
        ));
    }
    let alert = app_state
        .evaluation_service
        .record_agent_alert(
            server.id,
            NewAlert {
                server_id: Some(server.id),
                rule_id: None,
                metric: payload.metric,
                operator: payload.operator.unwrap_or(Comparison::Gt),
                threshold: payload.threshold,
                observed_value: payload.observed_value,
                severity: payload.severity,
                message,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(alert)))
}
