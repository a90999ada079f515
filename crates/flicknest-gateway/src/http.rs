//! REST surface of the hub.
//!
//! | Method | Path | Effect |
//! |---|---|---|
//! | `GET` | `/health` | `{status, mqtt_connected, timestamp}` |
//! | `GET` | `/symbols` | every symbol, keyed by id |
//! | `GET` | `/symbols/:id` | one symbol (`{}` when unknown) |
//! | `PATCH` | `/symbols/:id` | shallow-merge the body, attributed to `mobile` |
//! | `POST` | `/esp_upload` | device fallback: toggle the first active gesture |
//!
//! Every response carries permissive CORS headers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use flicknest_kernel::NameResolver;
use flicknest_memory::SymbolStore;
use flicknest_middleware::ControlChannel;
use flicknest_runtime::DispatcherHandle;
use flicknest_types::{DeviceReport, HubError, Source, Symbol, SymbolPatch, SymbolRef};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SymbolStore>,
    pub dispatcher: DispatcherHandle,
    pub resolver: Arc<NameResolver>,
    pub control: Arc<dyn ControlChannel>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/symbols", get(list_symbols))
        .route("/symbols/:id", get(get_symbol).patch(patch_symbol))
        .route("/esp_upload", post(esp_upload))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP gateway listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "mqtt_connected": state.control.is_connected(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn list_symbols(State(state): State<AppState>) -> Json<BTreeMap<String, Symbol>> {
    Json(state.store.snapshot())
}

async fn get_symbol(State(state): State<AppState>, Path(id): Path<String>) -> Json<Symbol> {
    Json(state.store.get(&id))
}

async fn patch_symbol(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<BTreeMap<String, Symbol>>, ApiError> {
    let patch = SymbolPatch::from_value(parse_body(&body)?)?;
    let merged = state
        .dispatcher
        .merge(SymbolRef::by_id(id.clone()), patch, Source::Mobile)
        .await?;
    Ok(Json(BTreeMap::from([(id, merged)])))
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: String,
    symbol: String,
    symbol_name: String,
    new_state: bool,
}

async fn esp_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let report = DeviceReport::from_value(parse_body(&body)?)?;
    let Some(gesture) = report.active_gesture() else {
        return Err(HubError::InvalidInput("No active symbol in upload".to_string()).into());
    };
    let Some(target) = state.resolver.resolve(gesture) else {
        return Err(HubError::NotFound(format!("Unknown symbol name: {gesture}")).into());
    };

    let outcome = state
        .dispatcher
        .toggle(target.clone(), Source::Broker)
        .await?;
    info!(target = %target, new_state = outcome.new_state, "device upload applied");

    Ok(Json(UploadResponse {
        message: format!("{gesture} state toggled to {}", outcome.new_state),
        symbol: outcome.id,
        symbol_name: gesture.to_string(),
        new_state: outcome.new_state,
    }))
}

/// Decode a request body; empty bodies count as "no data".
fn parse_body(body: &[u8]) -> Result<Value, HubError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(HubError::InvalidInput("No data provided".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| HubError::InvalidInput(format!("request body is not valid JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// [`HubError`] rendered as an HTTP response with body `{"error": message}`.
#[derive(Debug)]
pub struct ApiError(pub HubError);

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            HubError::NotFound(msg)
            | HubError::InvalidInput(msg)
            | HubError::MalformedMessage(msg) => (StatusCode::BAD_REQUEST, msg),
            HubError::Persistence(msg)
            | HubError::TransportUnavailable(msg)
            | HubError::Channel(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            error!(status = %status, message = %message, "request failed");
        } else {
            warn!(status = %status, message = %message, "request rejected");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header};
    use flicknest_middleware::{ConnectionState, UpdateBus};
    use flicknest_runtime::{Dispatcher, dispatcher};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct OfflineControl;

    #[async_trait]
    impl ControlChannel for OfflineControl {
        async fn publish_control(&self, _name: &str, _state: bool) -> Result<(), HubError> {
            Err(HubError::TransportUnavailable("offline".to_string()))
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Disconnected
        }
    }

    fn app_state() -> AppState {
        app_state_with(SymbolStore::open_in_memory().unwrap())
    }

    fn app_state_with(store: SymbolStore) -> AppState {
        let store = Arc::new(store);
        let control: Arc<dyn ControlChannel> = Arc::new(OfflineControl);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            UpdateBus::default(),
            Arc::clone(&control),
        ));
        let (handle, rx) = dispatcher::channel(16);
        tokio::spawn(dispatcher.run(rx, CancellationToken::new()));
        AppState {
            store,
            dispatcher: handle,
            resolver: Arc::new(NameResolver::builtin()),
            control,
        }
    }

    async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        body: &str,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_mqtt_link() {
        let state = app_state();
        let (status, body) = send(&state, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["mqtt_connected"], false);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn patch_then_get_returns_merged_fields() {
        let state = app_state();

        let (status, body) = send(
            &state,
            "PATCH",
            "/symbols/sym_003",
            r#"{"name": "updown", "room": "kitchen"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"sym_003": {"name": "updown", "source": "mobile", "room": "kitchen"}})
        );

        let (status, _) = send(&state, "PATCH", "/symbols/sym_003", r#"{"state": true}"#).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&state, "GET", "/symbols/sym_003", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"name": "updown", "state": true, "source": "mobile", "room": "kitchen"})
        );
    }

    #[tokio::test]
    async fn patch_survives_disconnected_broker() {
        let state = app_state();
        let (status, body) = send(&state, "PATCH", "/symbols/sym_001", r#"{"state": true}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sym_001"]["state"], true);
    }

    #[tokio::test]
    async fn patch_rejects_bad_bodies() {
        let state = app_state();
        for body in ["", "   ", "{}", "[1, 2]", "null", "not json", r#"{"state": "on"}"#] {
            let (status, reply) = send(&state, "PATCH", "/symbols/sym_001", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
            assert!(reply["error"].is_string(), "body {body:?}");
        }
        assert!(state.store.is_empty());

        let (_, reply) = send(&state, "PATCH", "/symbols/sym_001", "").await;
        assert_eq!(reply["error"], "No data provided");
    }

    #[tokio::test]
    async fn unknown_id_reads_as_empty_object() {
        let state = app_state();
        let (status, body) = send(&state, "GET", "/symbols/sym_999", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn list_returns_every_symbol() {
        let state = app_state();
        send(&state, "PATCH", "/symbols/sym_001", r#"{"state": true}"#).await;
        send(&state, "PATCH", "/symbols/custom", r#"{"state": false}"#).await;

        let (status, body) = send(&state, "GET", "/symbols", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "custom": {"state": false, "source": "mobile"},
                "sym_001": {"state": true, "source": "mobile"}
            })
        );
    }

    #[tokio::test]
    async fn esp_upload_toggles_and_toggles_back() {
        let state = app_state();

        let (status, body) = send(&state, "POST", "/esp_upload", r#"{"circle": true}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "sym_001");
        assert_eq!(body["symbol_name"], "circle");
        assert_eq!(body["new_state"], true);
        assert_eq!(body["message"], "circle state toggled to true");
        assert_eq!(state.store.get("sym_001").source, Some(Source::Broker));

        let (status, body) = send(&state, "POST", "/esp_upload", r#"{"circle": true}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["new_state"], false);
        assert_eq!(state.store.get("sym_001").state, Some(false));
    }

    #[tokio::test]
    async fn esp_upload_uses_first_true_key_and_name_as_sent() {
        let state = app_state();
        let (status, body) = send(
            &state,
            "POST",
            "/esp_upload",
            r#"{"wave": false, "Tap": true, "circle": true}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "sym_015");
        assert_eq!(body["symbol_name"], "Tap");
        assert!(!state.store.snapshot().contains_key("sym_001"));
    }

    #[tokio::test]
    async fn esp_upload_unknown_gesture_changes_nothing() {
        let state = app_state();
        let (status, body) =
            send(&state, "POST", "/esp_upload", r#"{"not_a_gesture": true}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not_a_gesture"));
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn esp_upload_without_active_gesture_is_rejected() {
        let state = app_state();
        for body in ["", "{}", r#"{"circle": false}"#] {
            let (status, _) = send(&state, "POST", "/esp_upload", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
        }
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn stopped_dispatcher_is_a_server_error() {
        let mut state = app_state();
        let (handle, rx) = dispatcher::channel(1);
        drop(rx);
        state.dispatcher = handle;

        let (status, body) = send(&state, "PATCH", "/symbols/sym_001", r#"{"state": true}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn failed_write_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flicknest.db");
        let state = app_state_with(SymbolStore::open(&path).unwrap());
        send(&state, "PATCH", "/symbols/sym_001", r#"{"state": false}"#).await;

        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE symbols;")
            .unwrap();

        let (status, body) = send(&state, "PATCH", "/symbols/sym_001", r#"{"state": true}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
        assert_eq!(state.store.get("sym_001").state, Some(false));

        let (status, body) = send(&state, "POST", "/esp_upload", r#"{"wave": true}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn responses_carry_cors_headers() {
        let state = app_state();
        let request = Request::builder()
            .uri("/symbols")
            .header(header::ORIGIN, "http://phone.local")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
