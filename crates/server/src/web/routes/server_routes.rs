use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use fleetwatch_common::wire::SystemInfo;
use fleetwatch_common::{CommandType, ServerStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::charts::{build_series, ChartMetric, ChartSeries, TimeWindow};
use crate::db::models::{Command, MetricSample, NewServer, Server, ServerPatch, ServiceStatus};
use crate::server::command_queue::ServiceAction;
use crate::server::gateway::generate_api_key;
use crate::server::status_sweeper::derive_status;
use crate::web::{AppError, AppState};

const DEFAULT_METRICS_LIMIT: u32 = 100;
const MAX_METRICS_LIMIT: u32 = 1000;
const DEFAULT_COMMANDS_LIMIT: u32 = 50;

pub fn create_server_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_servers_handler).post(create_server_handler))
        .route(
            "/{id}",
            get(get_server_handler)
                .patch(update_server_handler)
                .delete(delete_server_handler),
        )
        .route("/{id}/metrics", get(server_metrics_handler))
        .route("/{id}/chart", get(server_chart_handler))
        .route("/{id}/services", get(server_services_handler))
        .route(
            "/{id}/services/{name}/{action}",
            post(service_action_handler),
        )
        .route(
            "/{id}/commands",
            get(list_commands_handler).post(create_command_handler),
        )
        .route("/{id}/agent-update", post(agent_update_handler))
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub hostname: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Returned once on manual creation so the key can be put into the agent config.
#[derive(Debug, Serialize)]
pub struct CreatedServer {
    #[serde(flatten)]
    pub server: Server,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub window: Option<String>,
    pub metric: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommandRequest {
    pub command_type: CommandType,
    #[serde(default)]
    pub command: Option<String>,
}

async fn require_server(app_state: &AppState, id: Uuid) -> Result<Server, AppError> {
    app_state
        .store
        .get_server(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {id} not found")))
}

/// Applies staleness at read time so a server past the threshold shows
/// `offline` before the next sweep persists it.
fn with_current_status(app_state: &AppState, mut server: Server, now: DateTime<Utc>) -> Server {
    server.status = derive_status(
        server.status,
        server.last_seen,
        now,
        app_state.config.staleness_threshold(),
    );
    server
}

async fn list_servers_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<Server>>, AppError> {
    let now = Utc::now();
    let servers = app_state
        .store
        .list_servers()
        .await?
        .into_iter()
        .map(|server| with_current_status(&app_state, server, now))
        .collect();
    Ok(Json(servers))
}

async fn create_server_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<CreatedServer>), AppError> {
    let name = payload.name.trim().to_string();
    let hostname = payload.hostname.trim().to_string();
    if name.is_empty() || hostname.is_empty() {
        return Err(AppError::InvalidInput(
            "name and hostname are required".to_string(),
        ));
    }
    let server = app_state
        .store
        .create_server(NewServer {
            name,
            hostname,
            provider: payload.provider,
            api_key: generate_api_key(),
            status: ServerStatus::Offline,
            system_info: SystemInfo::default(),
            tags: payload.tags,
            notes: payload.notes,
        })
        .await?;
    info!(server_id = %server.id, "Server added from dashboard.");
    let api_key = server.api_key.clone();
    Ok((StatusCode::CREATED, Json(CreatedServer { server, api_key })))
}

async fn get_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Server>, AppError> {
    let server = require_server(&app_state, id).await?;
    Ok(Json(with_current_status(&app_state, server, Utc::now())))
}

async fn update_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ServerPatch>,
) -> Result<Json<Server>, AppError> {
    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::InvalidInput("name must not be empty".to_string()));
    }
    let server = app_state
        .store
        .update_server(id, patch)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {id} not found")))?;
    Ok(Json(server))
}

async fn delete_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !app_state.store.delete_server(id).await? {
        return Err(AppError::NotFound(format!("Server {id} not found")));
    }
    info!(server_id = %id, "Server deleted.");
    Ok(StatusCode::NO_CONTENT)
}

/// Newest first.
async fn server_metrics_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<MetricSample>>, AppError> {
    require_server(&app_state, id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_METRICS_LIMIT)
        .clamp(1, MAX_METRICS_LIMIT);
    Ok(Json(app_state.store.recent_metrics(id, limit).await?))
}

async fn server_chart_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<ChartSeries>, AppError> {
    let window: TimeWindow = match query.window.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("{e}")))?,
        None => TimeWindow::default(),
    };
    let metric: ChartMetric = match query.metric.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("{e}")))?,
        None => ChartMetric::default(),
    };
    require_server(&app_state, id).await?;

    let now = Utc::now();
    let history = app_state
        .store
        .metrics_since(id, now - window.duration())
        .await?;
    Ok(Json(build_series(&history, window, metric, now)))
}

async fn server_services_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ServiceStatus>>, AppError> {
    require_server(&app_state, id).await?;
    Ok(Json(app_state.store.list_services(id).await?))
}

async fn service_action_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, name, action)): Path<(Uuid, String, String)>,
) -> Result<(StatusCode, Json<Command>), AppError> {
    let action: ServiceAction = action.parse()?;
    let command = app_state
        .command_queue
        .queue_service_action(id, &name, action)
        .await?;
    Ok((StatusCode::CREATED, Json(command)))
}

async fn list_commands_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Command>>, AppError> {
    require_server(&app_state, id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_COMMANDS_LIMIT).max(1);
    Ok(Json(app_state.command_queue.list(id, limit).await?))
}

async fn create_command_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateCommandRequest>,
) -> Result<(StatusCode, Json<Command>), AppError> {
    let command = app_state
        .command_queue
        .enqueue(id, payload.command_type, payload.command)
        .await?;
    Ok((StatusCode::CREATED, Json(command)))
}

async fn agent_update_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Command>), AppError> {
    let download_url = app_state.config.agent_download_url();
    let command = app_state
        .command_queue
        .queue_agent_update(id, &download_url)
        .await?;
    info!(server_id = %id, command_id = %command.id, "Agent update queued.");
    Ok((StatusCode::CREATED, Json(command)))
}
