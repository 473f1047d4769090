//! Vehicle bridge REST and WebSocket API
//!
//! Thin axum layer over [`EngineHandle`]: every route validates its input,
//! forwards to the engine and maps [`EngineError`] onto a status code.

mod websocket;

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vb_core::{ClientConfig, Command, StateUpdate};
use vb_engine::{EngineError, EngineHandle};
use vb_event_bus::SubscriberHub;

pub use websocket::{ErrorInfo, IncomingMessage, OutgoingMessage, ResultMessage};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub handle: EngineHandle,
    pub hub: SubscriberHub,
    /// Enables `/execute.cmd` when set
    pub api_key: Option<Arc<str>>,
}

#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub action: String,
    pub state: String,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChargeLimitRequest {
    pub charge_limit_pct: u8,
}

/// Query of the key-protected command endpoint
#[derive(Debug, Deserialize)]
pub struct ExecuteQuery {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
}

impl From<EngineError> for ErrorResponse {
    fn from(error: EngineError) -> Self {
        Self {
            message: error.to_string(),
        }
    }
}

fn engine_error(error: EngineError) -> ApiError {
    let status = match error {
        EngineError::Policy(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(error.into()))
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/websocket", get(websocket::ws_handler))
        .route("/api/", get(api_status))
        .route("/api/health", get(health_check))
        .route("/api/state", get(get_state))
        .route("/api/command", post(post_command))
        .route("/api/refresh", post(post_refresh))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/charge_limit", post(post_charge_limit))
        .route("/execute.cmd", get(execute_cmd))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(state: AppState, addr: &str) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router).await
}

// ==================== Handlers ====================

/// GET /api/
async fn api_status() -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
    })
}

/// GET /api/health
async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/state - 404 until the first successful poll
async fn get_state(State(state): State<AppState>) -> Result<Json<StateUpdate>, ApiError> {
    match state.handle.snapshot().await.map_err(engine_error)? {
        Some(update) => Ok(Json(update)),
        None => Err(api_error(StatusCode::NOT_FOUND, "No vehicle state yet")),
    }
}

/// POST /api/command
async fn post_command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let mut command = Command::new(request.action, request.state);
    command.body = request.body;

    let success = state
        .handle
        .request_command(command)
        .await
        .map_err(engine_error)?;
    Ok(Json(CommandResponse { success }))
}

/// POST /api/refresh
async fn post_refresh(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .handle
        .request_manual_refresh()
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/config
async fn get_config(State(state): State<AppState>) -> Result<Json<ClientConfig>, ApiError> {
    let config = state.handle.client_config().await.map_err(engine_error)?;
    Ok(Json(config))
}

/// PUT /api/config - replaces the whole client config
async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<ClientConfig>,
) -> Result<Json<ClientConfig>, ApiError> {
    state
        .handle
        .request_config_update(config.clone())
        .await
        .map_err(engine_error)?;
    Ok(Json(config))
}

/// POST /api/charge_limit
async fn post_charge_limit(
    State(state): State<AppState>,
    Json(request): Json<ChargeLimitRequest>,
) -> Result<Json<ChargeLimitRequest>, ApiError> {
    state
        .handle
        .set_charge_limit(request.charge_limit_pct)
        .await
        .map_err(engine_error)?;
    Ok(Json(request))
}

/// GET /execute.cmd?key=&action=&state= - plain `+OK` / `-ERROR`
async fn execute_cmd(
    State(state): State<AppState>,
    Query(query): Query<ExecuteQuery>,
) -> impl IntoResponse {
    let authorized = match (&state.api_key, &query.key) {
        (Some(expected), Some(given)) => expected.as_ref() == given.as_str(),
        _ => false,
    };
    if !authorized {
        warn!("Rejected /execute.cmd call with missing or wrong key");
        return "-ERROR";
    }

    let (Some(action), Some(wanted)) = (query.action, query.state) else {
        return "-ERROR";
    };
    match state.handle.request_command(Command::new(action, wanted)).await {
        Ok(true) => "+OK",
        Ok(false) | Err(_) => "-ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use vb_core::{
        ConfigStore, NotificationSink, RemoteError, SinkError, StoreError, VehicleCloudClient,
    };
    use vb_engine::{Collaborators, EngineSettings, SyncOrchestrator};

    #[derive(Default)]
    struct StubClient {
        commands: AtomicUsize,
    }

    #[async_trait]
    impl VehicleCloudClient for StubClient {
        async fn fetch_status(&self) -> Result<Value, RemoteError> {
            Ok(json!({
                "vin": "WVWZZZTESTVIN0001",
                "charging": {"status": {"battery": {
                    "carCapturedTimestamp": Utc::now().to_rfc3339(),
                    "currentSOC_pct": 64
                }}}
            }))
        }

        async fn send_command(&self, _command: &Command) -> Result<(), RemoteError> {
            self.commands.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        config: Mutex<Option<ClientConfig>>,
    }

    #[async_trait]
    impl ConfigStore for MemoryStore {
        async fn load_client_config(&self) -> Result<ClientConfig, StoreError> {
            Ok(self.config.lock().unwrap().clone().unwrap_or_default())
        }

        async fn save_client_config(&self, config: &ClientConfig) -> Result<(), StoreError> {
            *self.config.lock().unwrap() = Some(config.clone());
            Ok(())
        }
    }

    struct QuietNotifier;

    #[async_trait]
    impl NotificationSink for QuietNotifier {
        async fn notify(&self, _text: &str) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct TestApp {
        state: AppState,
        client: Arc<StubClient>,
    }

    async fn create_test_app(api_key: Option<&str>) -> TestApp {
        let client = Arc::new(StubClient::default());
        let hub = SubscriberHub::new();
        let collaborators = Collaborators {
            client: client.clone(),
            transport: Arc::new(hub.clone()),
            store: Arc::new(MemoryStore::default()),
            notifier: Arc::new(QuietNotifier),
            telemetry: None,
            log: None,
            charge_limit_webhook: None,
        };
        let (orchestrator, handle) =
            SyncOrchestrator::start(EngineSettings::default(), collaborators).await;
        tokio::spawn(orchestrator.run());

        TestApp {
            state: AppState {
                handle,
                hub,
                api_key: api_key.map(Arc::from),
            },
            client,
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_api_status() {
        let app = create_test_app(None).await;
        let router = create_router(app.state);

        let response = router.oneshot(get("/api/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "API running.");
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app(None).await;
        let response = create_router(app.state)
            .oneshot(get("/api/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_state_eventually_available() {
        let app = create_test_app(None).await;
        let router = create_router(app.state);

        let mut last = StatusCode::NOT_FOUND;
        for _ in 0..50 {
            let response = router.clone().oneshot(get("/api/state")).await.unwrap();
            last = response.status();
            if last == StatusCode::OK {
                let body = body_json(response).await;
                assert_eq!(body["vehicle"]["charging"]["status"]["battery"]["currentSOC_pct"], 64);
                assert_eq!(body["online"], true);
                break;
            }
            assert_eq!(last, StatusCode::NOT_FOUND);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(last, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_command_dispatch_and_policy_rejection() {
        let app = create_test_app(None).await;
        let router = create_router(app.state);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/command",
                json!({"action": "charging", "state": "start"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));
        assert_eq!(app.client.commands.load(Ordering::SeqCst), 1);

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/command",
                json!({"action": "climatisation", "state": "settings", "body": {"targetTemperature_C": 45}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(app.client.commands.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_accepted() {
        let app = create_test_app(None).await;
        let response = create_router(app.state)
            .oneshot(Request::builder().method("POST").uri("/api/refresh").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_config_roundtrip_and_charge_limit() {
        let app = create_test_app(None).await;
        let router = create_router(app.state);

        let response = router
            .clone()
            .oneshot(json_request("PUT", "/api/config", json!({"climatisationExtend": true})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(json_request("POST", "/api/charge_limit", json!({"charge_limit_pct": 80})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.clone().oneshot(get("/api/config")).await.unwrap();
        let config = body_json(response).await;
        assert_eq!(config["chargeLimitPct"], 80);
        assert_eq!(config["climatisationExtend"], true);

        let response = router
            .oneshot(json_request("POST", "/api/charge_limit", json!({"charge_limit_pct": 0})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_execute_cmd_requires_key() {
        let app = create_test_app(Some("s3cret")).await;
        let router = create_router(app.state);

        let response = router
            .clone()
            .oneshot(get("/execute.cmd?key=wrong&action=charging&state=start"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "-ERROR");

        let response = router
            .clone()
            .oneshot(get("/execute.cmd?action=charging&state=start"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "-ERROR");
        assert_eq!(app.client.commands.load(Ordering::SeqCst), 0);

        let response = router
            .oneshot(get("/execute.cmd?key=s3cret&action=charging&state=start"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "+OK");
        assert_eq!(app.client.commands.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_cmd_disabled_without_key() {
        let app = create_test_app(None).await;
        let response = create_router(app.state)
            .oneshot(get("/execute.cmd?key=&action=charging&state=start"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "-ERROR");
        assert_eq!(app.client.commands.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_websocket_message_handling() {
        let app = create_test_app(None).await;

        let reply = websocket::handle_message(
            &app.state,
            r#"{"type": "command", "id": 7, "action": "charging", "state": "stop"}"#,
        )
        .await
        .unwrap();
        let reply = serde_json::to_value(&reply).unwrap();
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["success"], true);

        assert!(websocket::handle_message(&app.state, r#"{"type": "update"}"#)
            .await
            .is_none());

        let reply = websocket::handle_message(&app.state, "not json").await.unwrap();
        let reply = serde_json::to_value(&reply).unwrap();
        assert_eq!(reply["error"]["code"], "invalid_format");
    }
}
