use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use fleetwatch_common::{API_KEY_HEADER, ENROLLMENT_TOKEN_HEADER};
use fleetwatch_server::db::{MemoryStore, Store};
use fleetwatch_server::server::config::ServerConfig;
use fleetwatch_server::web::{create_axum_router, AppState};

const DASHBOARD_TOKEN: &str = "dash-secret";
const ENROLLMENT_TOKEN: &str = "enroll-secret";

fn test_app() -> Router {
    test_app_with_store().0
}

fn test_app_with_store() -> (Router, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let config = ServerConfig {
        dashboard_token: Some(DASHBOARD_TOKEN.to_string()),
        enrollment_token: Some(ENROLLMENT_TOKEN.to_string()),
        ..ServerConfig::default()
    };
    let router = create_axum_router(Arc::new(AppState::new(store.clone(), Arc::new(config))));
    (router, store)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn agent_request(method: Method, uri: &str, api_key: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(API_KEY_HEADER, api_key)
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn dashboard_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {DASHBOARD_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Returns `(server_id, api_key)`.
async fn register(app: &Router, hostname: &str) -> (String, String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/ingest/register")
        .header(ENROLLMENT_TOKEN_HEADER, ENROLLMENT_TOKEN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "hostname": hostname }).to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (
        body["server_id"].as_str().unwrap().to_string(),
        body["api_key"].as_str().unwrap().to_string(),
    )
}

fn metrics_body(cpu: f64) -> Value {
    json!({
        "cpu_usage": cpu,
        "memory": { "total": 1000, "used": 550, "percent": 55.0 },
        "disk": { "total": 1000, "used": 300, "percent": 30.0 },
        "network": { "sent": 0, "recv": 0 },
        "load_average": [0.1, 0.1, 0.1]
    })
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn first_sample_shows_up_in_ten_minute_chart() {
    let app = test_app();
    let (server_id, api_key) = register(&app, "web-01").await;

    let (status, ack) = send(
        &app,
        agent_request(Method::POST, "/ingest/metrics", &api_key, Some(metrics_body(42.0))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], true);

    let (status, server) = send(
        &app,
        dashboard_request(Method::GET, &format!("/api/servers/{server_id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server["status"], "online");

    let (status, chart) = send(
        &app,
        dashboard_request(
            Method::GET,
            &format!("/api/servers/{server_id}/chart?window=10min&metric=cpu"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chart["points"].as_array().unwrap().len(), 1);
    assert_eq!(chart["current"], 42.0);
    assert_eq!(chart["trend"], 0.0);
    assert_eq!(chart["y_max"], 100.0);
    assert_eq!(chart["y_min"], 0.0);
}

#[tokio::test]
async fn restart_command_round_trip() {
    let app = test_app();
    let (server_id, api_key) = register(&app, "web-01").await;

    let (status, created) = send(
        &app,
        dashboard_request(
            Method::POST,
            &format!("/api/servers/{server_id}/commands"),
            Some(json!({ "command_type": "restart", "command": "reboot" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    let command_id = created["id"].as_str().unwrap().to_string();

    let (status, claimed) = send(
        &app,
        agent_request(Method::GET, "/commands", &api_key, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let claimed = claimed.as_array().unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0]["id"], command_id.as_str());
    assert_eq!(claimed[0]["status"], "executing");

    // A second poll must not hand the same command out again.
    let (_, again) = send(&app, agent_request(Method::GET, "/commands", &api_key, None)).await;
    assert!(again.as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        agent_request(
            Method::POST,
            "/command-result",
            &api_key,
            Some(json!({ "id": command_id, "output": "Restarting...", "status": "completed" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, waited) = send(
        &app,
        dashboard_request(Method::POST, &format!("/api/commands/{command_id}/wait"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(waited["timed_out"], false);
    assert_eq!(waited["command"]["status"], "completed");
    assert_eq!(waited["command"]["output"], "Restarting...");
}

#[tokio::test]
async fn batches_in_quick_succession_are_both_charted_in_order() {
    let app = test_app();
    let (server_id, api_key) = register(&app, "web-01").await;

    send(
        &app,
        agent_request(Method::POST, "/ingest/metrics", &api_key, Some(metrics_body(10.0))),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(
        &app,
        agent_request(Method::POST, "/ingest/metrics", &api_key, Some(metrics_body(20.0))),
    )
    .await;

    let (status, chart) = send(
        &app,
        dashboard_request(
            Method::GET,
            &format!("/api/servers/{server_id}/chart?window=1hour"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let points = chart["points"].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["value"], 10.0);
    assert_eq!(points[1]["value"], 20.0);
    assert_eq!(chart["trend"], 10.0);
}

#[tokio::test]
async fn agent_endpoints_reject_unknown_keys() {
    let app = test_app();
    register(&app, "web-01").await;

    let (status, body) = send(
        &app,
        agent_request(Method::POST, "/ingest/metrics", "not-a-key", Some(metrics_body(1.0))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .uri("/commands")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dashboard_requires_bearer_token() {
    let app = test_app();
    let request = Request::builder()
        .uri("/api/servers")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn commands_for_unknown_servers_are_not_found() {
    let app = test_app();
    let missing = uuid::Uuid::new_v4();
    let (status, _) = send(
        &app,
        dashboard_request(
            Method::POST,
            &format!("/api/servers/{missing}/commands"),
            Some(json!({ "command_type": "execute", "command": "uptime" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        dashboard_request(Method::GET, &format!("/api/commands/{missing}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_chart_window_is_bad_request() {
    let app = test_app();
    let (server_id, _) = register(&app, "web-01").await;
    let (status, _) = send(
        &app,
        dashboard_request(
            Method::GET,
            &format!("/api/servers/{server_id}/chart?window=2days"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stale_server_reads_offline_before_the_sweep() {
    let (app, store) = test_app_with_store();
    let (server_id, api_key) = register(&app, "web-01").await;
    send(
        &app,
        agent_request(Method::POST, "/ingest/metrics", &api_key, Some(metrics_body(5.0))),
    )
    .await;

    let id: uuid::Uuid = server_id.parse().unwrap();
    store
        .record_contact(id, chrono::Utc::now() - chrono::Duration::seconds(100))
        .await
        .unwrap();

    let (status, server) = send(
        &app,
        dashboard_request(Method::GET, &format!("/api/servers/{server_id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server["status"], "offline");

    let (_, servers) = send(&app, dashboard_request(Method::GET, "/api/servers", None)).await;
    let listed = servers
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == server_id.as_str())
        .unwrap();
    assert_eq!(listed["status"], "offline");
}

#[tokio::test]
async fn service_actions_queue_systemctl_for_reported_units() {
    let app = test_app();
    let (server_id, api_key) = register(&app, "web-01").await;
    let (status, _) = send(
        &app,
        agent_request(
            Method::POST,
            "/ingest/services",
            &api_key,
            Some(json!([{ "name": "nginx", "status": "stopped", "enabled": true, "port": 80 }])),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, created) = send(
        &app,
        dashboard_request(
            Method::POST,
            &format!("/api/servers/{server_id}/services/nginx/start"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["command_type"], "execute");
    assert_eq!(created["command"], "systemctl start nginx");
    assert_eq!(created["status"], "pending");

    let (_, claimed) = send(&app, agent_request(Method::GET, "/commands", &api_key, None)).await;
    assert_eq!(claimed[0]["command"], "systemctl start nginx");

    for (path, expected) in [
        ("nginx/reload", StatusCode::BAD_REQUEST),
        ("nginx%3Brm%20-rf/stop", StatusCode::BAD_REQUEST),
        ("redis-server/restart", StatusCode::NOT_FOUND),
    ] {
        let (status, body) = send(
            &app,
            dashboard_request(
                Method::POST,
                &format!("/api/servers/{server_id}/services/{path}"),
                None,
            ),
        )
        .await;
        assert_eq!(status, expected, "{path}: {body}");
    }
}

#[tokio::test]
async fn agent_can_finish_commands_by_id() {
    let app = test_app();
    let (server_id, api_key) = register(&app, "web-01").await;
    let (_, created) = send(
        &app,
        dashboard_request(
            Method::POST,
            &format!("/api/servers/{server_id}/commands"),
            Some(json!({ "command_type": "execute", "command": "uptime" })),
        ),
    )
    .await;
    let command_id = created["id"].as_str().unwrap().to_string();

    // Still pending: finishing it would skip `executing`.
    let (status, _) = send(
        &app,
        agent_request(
            Method::PATCH,
            &format!("/commands/{command_id}"),
            &api_key,
            Some(json!({ "status": "completed", "output": "up 3 days" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(&app, agent_request(Method::GET, "/commands", &api_key, None)).await;
    let (status, finished) = send(
        &app,
        agent_request(
            Method::PATCH,
            &format!("/commands/{command_id}"),
            &api_key,
            Some(json!({ "status": "completed", "output": "up 3 days" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finished["status"], "completed");
    assert_eq!(finished["output"], "up 3 days");

    // Another server's key cannot touch it.
    let (_, other_key) = register(&app, "db-01").await;
    let (status, _) = send(
        &app,
        agent_request(
            Method::PATCH,
            &format!("/commands/{command_id}"),
            &other_key,
            Some(json!({ "status": "failed", "output": "" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn agent_reported_alert_puts_server_in_warning() {
    let app = test_app();
    let (server_id, api_key) = register(&app, "web-01").await;
    send(
        &app,
        agent_request(Method::POST, "/ingest/metrics", &api_key, Some(metrics_body(5.0))),
    )
    .await;

    let (status, alert) = send(
        &app,
        agent_request(
            Method::POST,
            "/alerts",
            &api_key,
            Some(json!({
                "metric": "disk",
                "threshold": 90.0,
                "observed_value": 97.5,
                "severity": "critical",
                "message": "Disk almost full"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{alert}");
    assert_eq!(alert["server_id"], server_id.as_str());
    assert_eq!(alert["resolved"], false);

    let (_, server) = send(
        &app,
        dashboard_request(Method::GET, &format!("/api/servers/{server_id}"), None),
    )
    .await;
    assert_eq!(server["status"], "warning");

    let alert_id = alert["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        dashboard_request(Method::POST, &format!("/api/alerts/{alert_id}/resolve"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, server) = send(
        &app,
        dashboard_request(Method::GET, &format!("/api/servers/{server_id}"), None),
    )
    .await;
    assert_eq!(server["status"], "online");

    let (status, _) = send(
        &app,
        agent_request(
            Method::POST,
            "/alerts",
            &api_key,
            Some(json!({
                "metric": "cpu",
                "threshold": 90.0,
                "observed_value": 95.0,
                "severity": "warning",
                "message": "  "
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
