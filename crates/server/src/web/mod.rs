use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::alerting::evaluation_service::EvaluationService;
use crate::db::Store;
use crate::server::command_queue::CommandQueue;
use crate::server::config::ServerConfig;
use crate::server::events::EventBroadcaster;
use crate::server::gateway::IngestionGateway;
use crate::web::{middleware::auth, routes::*};

pub mod error;
pub mod middleware;
pub mod routes;
pub mod websocket_handler;

pub use error::AppError;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub command_queue: Arc<CommandQueue>,
    pub gateway: Arc<IngestionGateway>,
    pub evaluation_service: Arc<EvaluationService>,
    pub events: EventBroadcaster,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wires every service around one store handle and one event channel.
    pub fn new(store: Arc<dyn Store>, config: Arc<ServerConfig>) -> Self {
        let events = EventBroadcaster::default();
        let command_queue = Arc::new(CommandQueue::new(store.clone(), events.clone()));
        let gateway = Arc::new(IngestionGateway::new(
            store.clone(),
            command_queue.clone(),
            events.clone(),
            config.enrollment_token.clone(),
        ));
        let evaluation_service = Arc::new(EvaluationService::new(store.clone(), events.clone()));
        Self {
            store,
            command_queue,
            gateway,
            evaluation_service,
            events,
            config,
        }
    }
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check_handler))
        .route("/install-agent.sh", get(install_routes::install_script_handler))
        .route("/ws/events", get(websocket_handler::events_websocket_handler))
        .merge(agent_routes::create_agent_router())
        .nest(
            "/api/servers",
            server_routes::create_server_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .nest(
            "/api/commands",
            command_routes::create_command_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .nest(
            "/api/alerts",
            alert_routes::create_alert_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .nest(
            "/api/alert-rules",
            alert_routes::create_alert_rule_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .layer(cors)
        .with_state(app_state)
}
