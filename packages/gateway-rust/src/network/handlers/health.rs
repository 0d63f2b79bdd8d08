//! Health endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Returns server and gateway status as JSON.
///
/// Always `200`; the `state` field tells whether the server is draining.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let gateway = &state.gateway;
    Json(json!({
        "state": state.lifecycle.health().as_str(),
        "gateway": gateway.name(),
        "backend": gateway.backend().as_str(),
        "callbacks_enabled": gateway.callback_enabled(),
        "requests_logged": gateway.request_log().len(),
        "callbacks_logged": gateway.callback_log().len(),
        "in_flight": state.lifecycle.in_flight(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
