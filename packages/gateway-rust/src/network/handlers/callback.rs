//! Callback delivery endpoint: `POST /callbacks/{event}`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use super::AppState;
use crate::gateway::{decode_payload, CallbackOptions};

/// Header naming who delivered the event.
pub const CALLBACK_SOURCE_HEADER: &str = "x-callback-source";

/// Records the delivered body as a callback for `event`.
///
/// The body is decoded by content type like an upstream response. Returns
/// `202` with `recorded: false` when callback mode is off, `503` once the
/// server is draining, and `500` when the store rejects the write.
pub async fn callback_handler(
    State(state): State<AppState>,
    Path(event): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(_guard) = state.lifecycle.admit() else {
        warn!(event = %event, "server is draining; delivery refused");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "event": event, "error": "server is draining" })),
        );
    };

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let payload = decode_payload(content_type, &body);

    let mut options = CallbackOptions::default();
    if let Some(source) = headers
        .get(CALLBACK_SOURCE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        options = options.source(source);
    }

    match state.gateway.callback(&event, payload, options).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "event": event,
                "recorded": state.gateway.callback_enabled(),
            })),
        ),
        Err(err) => {
            error!(event = %event, error = %err, "failed to record callback");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "event": event, "error": err.to_string() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use axum::body::Body as HttpBody;
    use axum::http::Request;
    use receptionist_core::{Body, CallbackEntry, RequestEntry};
    use tower::ServiceExt;

    use super::*;
    use crate::error::StorageError;
    use crate::gateway::{Receptionist, ReceptionistConfig};
    use crate::network::{router, IngestConfig, Lifecycle};
    use crate::storage::{BackendKind, CacheStore, SqliteCacheStore};
    use crate::testing::{api, gateway, ScriptedTransport};

    fn state_for(gateway: Receptionist) -> AppState {
        AppState {
            gateway: Arc::new(gateway),
            lifecycle: Arc::new(Lifecycle::new()),
            start_time: Instant::now(),
        }
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn enabled() -> (AppState, Arc<SqliteCacheStore>) {
        let (gateway, store) = gateway(Arc::new(ScriptedTransport::json(200, "{}")), true).await;
        (state_for(gateway), store)
    }

    #[tokio::test]
    async fn json_delivery_is_recorded() {
        let (state, store) = enabled().await;
        let app = router(state.clone(), &IngestConfig::default());

        let response = app
            .oneshot(
                Request::post("/callbacks/signup")
                    .header("content-type", "application/json")
                    .header(CALLBACK_SOURCE_HEADER, "billing")
                    .body(HttpBody::from(r#"{"id":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().contains_key("x-request-id"));
        let json = read_json(response).await;
        assert_eq!(json["event"], "signup");
        assert_eq!(json["recorded"], true);

        let stored = store
            .read_callback("signup", "callback/internal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.source.as_deref(), Some("billing"));
        assert_eq!(stored.entry.response, Body::Json(serde_json::json!({"id": 1})));
        assert_eq!(state.gateway.callback_log().len(), 1);
        assert_eq!(state.lifecycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn text_delivery_stays_text() {
        let (state, store) = enabled().await;
        let app = router(state, &IngestConfig::default());

        let response = app
            .oneshot(
                Request::post("/callbacks/ping")
                    .header("content-type", "text/plain")
                    .body(HttpBody::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let stored = store
            .read_callback("ping", "callback/internal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.entry.body, Some(Body::Text("hello".into())));
        assert_eq!(stored.source, None);
    }

    #[tokio::test]
    async fn disabled_mode_accepts_without_recording() {
        let (gateway, store) = gateway(Arc::new(ScriptedTransport::json(200, "{}")), false).await;
        let app = router(state_for(gateway), &IngestConfig::default());

        let response = app
            .oneshot(
                Request::post("/callbacks/signup")
                    .body(HttpBody::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(read_json(response).await["recorded"], false);
        assert!(store
            .read_callback("signup", "callback/internal")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn draining_server_refuses_deliveries() {
        let (state, store) = enabled().await;
        state.lifecycle.set_ready();
        state.lifecycle.begin_drain();
        let app = router(state.clone(), &IngestConfig::default());

        let response = app
            .oneshot(
                Request::post("/callbacks/signup")
                    .header("content-type", "application/json")
                    .body(HttpBody::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(response).await["error"], "server is draining");
        assert!(store
            .read_callback("signup", "callback/internal")
            .await
            .unwrap()
            .is_none());
        assert!(state.gateway.callback_log().is_empty());
        assert_eq!(state.lifecycle.in_flight(), 0);
    }

    struct RejectingStore;

    #[async_trait]
    impl CacheStore for RejectingStore {
        fn kind(&self) -> BackendKind {
            BackendKind::Relational
        }

        async fn initialize(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn write(&self, _entry: &RequestEntry) -> Result<(), StorageError> {
            Ok(())
        }

        async fn read(&self, _url: &str) -> Result<Option<RequestEntry>, StorageError> {
            Ok(None)
        }

        async fn write_callback(&self, _entry: &CallbackEntry) -> Result<(), StorageError> {
            Err(StorageError::CorruptRow {
                id: 0,
                reason: "rejected".to_string(),
            })
        }

        async fn read_callback(
            &self,
            _event: &str,
            _url: &str,
        ) -> Result<Option<CallbackEntry>, StorageError> {
            Ok(None)
        }

        async fn close(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn storage_failure_is_500() {
        let gateway = Receptionist::new(
            ReceptionistConfig {
                name: "failing".to_string(),
                callback_enabled: true,
                ..ReceptionistConfig::default()
            },
            api(),
            Arc::new(RejectingStore),
            Arc::new(ScriptedTransport::json(200, "{}")),
        );
        let app = router(state_for(gateway), &IngestConfig::default());

        let response = app
            .oneshot(
                Request::post("/callbacks/signup")
                    .header("content-type", "application/json")
                    .body(HttpBody::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = read_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn health_route_is_served() {
        let (state, _store) = enabled().await;
        let app = router(state, &IngestConfig::default());

        let response = app
            .oneshot(Request::get("/health").body(HttpBody::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["gateway"], "test");
    }
}
