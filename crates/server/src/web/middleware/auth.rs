use axum::{
    body::Body as AxumBody,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::Response,
};
use fleetwatch_common::API_KEY_HEADER;
use std::sync::Arc;
use tracing::warn;

use crate::db::models::Server;
use crate::web::{error::AppError, AppState};

/// Checks a dashboard bearer token against the configured one. With no
/// token configured any non-empty bearer is accepted.
pub fn bearer_matches(state: &AppState, presented: Option<&str>) -> bool {
    match (presented.filter(|t| !t.is_empty()), state.config.dashboard_token.as_deref()) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(token), Some(expected)) => token == expected,
    }
}

pub async fn auth(
    State(state): State<Arc<AppState>>,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim);

    if !bearer_matches(&state, token) {
        warn!(path = %req.uri().path(), "Rejected dashboard request without a valid bearer token.");
        return Err(AppError::InvalidCredentials);
    }
    Ok(next.run(req).await)
}

/// The server owning the `X-API-Key` presented by an agent.
pub struct AgentServer(pub Server);

impl FromRequestParts<Arc<AppState>> for AgentServer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        let server = state.gateway.authenticate(api_key).await.map_err(|e| {
            warn!(path = %parts.uri.path(), "Rejected agent request: {e}");
            AppError::from(e)
        })?;
        Ok(AgentServer(server))
    }
}
