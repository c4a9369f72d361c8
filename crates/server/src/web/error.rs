use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::db::StoreError;
use crate::server::command_queue::QueueError;
use crate::server::gateway::GatewayError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }
            AppError::DatabaseError(msg) => {
                error!(error = %msg, "Database error while handling request.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Database error: {msg}"),
                )
            }
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::DatabaseError(other.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::ServerNotFound(id) => AppError::NotFound(format!("Server {id} not found")),
            QueueError::CommandNotFound(id) => {
                AppError::NotFound(format!("Command {id} not found"))
            }
            QueueError::UnknownService(_) => AppError::NotFound(err.to_string()),
            QueueError::EmptyCommand
            | QueueError::InvalidResultStatus(_)
            | QueueError::InvalidServiceAction(_)
            | QueueError::InvalidServiceName(_) => AppError::InvalidInput(err.to_string()),
            QueueError::IllegalTransition { .. } => AppError::Conflict(err.to_string()),
            QueueError::Store(e) => e.into(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized => AppError::InvalidCredentials,
            GatewayError::RegistrationDisabled => AppError::Forbidden(err.to_string()),
            GatewayError::InvalidInput(msg) => AppError::InvalidInput(msg),
            GatewayError::NotFound(msg) => AppError::NotFound(msg),
            GatewayError::Queue(e) => e.into(),
            GatewayError::Store(e) => e.into(),
        }
    }
}

impl From<tera::Error> for AppError {
    fn from(err: tera::Error) -> Self {
        AppError::InternalServerError(format!("Template rendering error: {err}"))
    }
}
