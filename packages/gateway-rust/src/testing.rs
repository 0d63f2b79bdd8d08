//! Test doubles shared by the gateway and router tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use receptionist_core::{ApiDefinition, FixedClock, HeaderSet, RouteTable};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TransportError;
use crate::gateway::{Receptionist, ReceptionistConfig};
use crate::storage::{CacheStore, SqliteCacheStore};
use crate::transport::{HttpTransport, OutboundRequest, TransportResponse};

/// Transport that records every request and answers with a canned response.
pub(crate) struct ScriptedTransport {
    response: Option<TransportResponse>,
    delay: Option<Duration>,
    calls: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn respond(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            response: Some(TransportResponse {
                status,
                headers: BTreeMap::from([("content-type".to_string(), content_type.to_string())]),
                body: Bytes::from(body.to_owned()),
            }),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn json(status: u16, body: &str) -> Self {
        Self::respond(status, "application/json", body)
    }

    /// Every send fails with [`TransportError::Unavailable`].
    pub(crate) fn failing() -> Self {
        Self {
            response: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<OutboundRequest> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.calls.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response
            .clone()
            .ok_or_else(|| TransportError::Unavailable("scripted failure".to_string()))
    }
}

pub(crate) fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Routes `status -> /v1/status` and `user -> /v1/users/{id}` on `https://api.test`.
pub(crate) fn api() -> ApiDefinition {
    let routes = RouteTable::new(
        "https://api.test",
        BTreeMap::from([
            ("status".to_string(), "/v1/status".to_string()),
            ("user".to_string(), "/v1/users/{id}".to_string()),
        ]),
    );
    let headers = HeaderSet::new(BTreeMap::from([(
        "Authorization".to_string(),
        "Bearer token".to_string(),
    )]));
    ApiDefinition::new(headers, routes)
}

/// Gateway over an in-memory SQLite store, a fixed clock and `transport`.
pub(crate) async fn gateway(
    transport: Arc<ScriptedTransport>,
    callback_enabled: bool,
) -> (Receptionist, Arc<SqliteCacheStore>) {
    let store = Arc::new(SqliteCacheStore::in_memory().await.unwrap());
    let config = ReceptionistConfig {
        name: "test".to_string(),
        callback_enabled,
        ..ReceptionistConfig::default()
    };
    let gateway = Receptionist::new(
        config,
        api(),
        Arc::clone(&store) as Arc<dyn CacheStore>,
        transport,
    )
    .with_clock(Arc::new(FixedClock(fixed_time())));
    (gateway, store)
}

/// Messages of `warn` events emitted on the current thread while the guard
/// returned by [`capture_warnings`] is alive.
#[derive(Clone, Default)]
pub(crate) struct CapturedWarnings(Arc<Mutex<Vec<String>>>);

impl CapturedWarnings {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.0.lock().iter().any(|message| message.contains(needle))
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedWarnings {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().push(visitor.0);
        }
    }
}

pub(crate) fn capture_warnings() -> (CapturedWarnings, DefaultGuard) {
    let warnings = CapturedWarnings::default();
    let guard = tracing_subscriber::registry()
        .with(warnings.clone())
        .set_default();
    (warnings, guard)
}
