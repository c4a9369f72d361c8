use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::models::{Alert, AlertFilter, AlertRule, NewAlertRule};
use crate::web::{AppError, AppState};

pub fn create_alert_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_alerts_handler))
        .route("/{id}/acknowledge", post(acknowledge_alert_handler))
        .route("/{id}/resolve", post(resolve_alert_handler))
}

pub fn create_alert_rule_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            post(create_alert_rule_handler).get(get_all_alert_rules_handler),
        )
        .route(
            "/{id}",
            get(get_alert_rule_handler).delete(delete_alert_rule_handler),
        )
        .route("/{id}/status", put(update_alert_rule_status_handler))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlertRuleStatusRequest {
    pub enabled: bool,
}

async fn list_alerts_handler(
    State(app_state): State<Arc<AppState>>,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<Vec<Alert>>, AppError> {
    Ok(Json(app_state.store.list_alerts(filter).await?))
}

async fn acknowledge_alert_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alert>, AppError> {
    let alert = app_state
        .store
        .acknowledge_alert(id, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Alert {id} not found")))?;
    Ok(Json(alert))
}

async fn resolve_alert_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alert>, AppError> {
    let alert = app_state
        .evaluation_service
        .resolve(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Alert {id} not found")))?;
    Ok(Json(alert))
}

async fn create_alert_rule_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<NewAlertRule>,
) -> Result<(StatusCode, Json<AlertRule>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidInput("rule name is required".to_string()));
    }
    if !payload.threshold.is_finite() {
        return Err(AppError::InvalidInput("threshold must be a number".to_string()));
    }
    if let Some(server_id) = payload.server_id {
        if app_state.store.get_server(server_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Server {server_id} not found")));
        }
    }
    let rule = app_state.store.create_alert_rule(payload).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn get_all_alert_rules_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<AlertRule>>, AppError> {
    Ok(Json(app_state.store.list_alert_rules().await?))
}

async fn get_alert_rule_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AlertRule>, AppError> {
    let rule = app_state
        .store
        .get_alert_rule(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Alert rule {id} not found")))?;
    Ok(Json(rule))
}

async fn delete_alert_rule_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !app_state.evaluation_service.delete_rule(id).await? {
        return Err(AppError::NotFound(format!("Alert rule {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn update_alert_rule_status_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAlertRuleStatusRequest>,
) -> Result<Json<AlertRule>, AppError> {
    let rule = app_state
        .evaluation_service
        .set_rule_enabled(id, payload.enabled)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Alert rule {id} not found")))?;
    Ok(Json(rule))
}
