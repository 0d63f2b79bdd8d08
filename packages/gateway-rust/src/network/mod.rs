//! Callback ingestion over HTTP.
//!
//! Follows a deferred startup: [`IngestServer::new`] wires state,
//! [`IngestServer::start`] binds the listener and [`IngestServer::serve`]
//! accepts deliveries until the shutdown future resolves, then drains.

pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use config::IngestConfig;
pub use handlers::{callback_handler, health_handler, AppState, CALLBACK_SOURCE_HEADER};
pub use lifecycle::{DeliveryGuard, HealthState, Lifecycle};

use crate::gateway::Receptionist;
use middleware::build_http_layers;

/// Assembles the router.
///
/// Routes:
/// - `GET /health`: status JSON
/// - `POST /callbacks/{event}`: record a callback
pub fn router(state: AppState, config: &IngestConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/callbacks/{event}", post(callback_handler))
        .layer(build_http_layers(config))
        .with_state(state)
}

/// HTTP server recording inbound callbacks through one gateway.
pub struct IngestServer {
    config: IngestConfig,
    gateway: Arc<Receptionist>,
    lifecycle: Arc<Lifecycle>,
    listener: Option<TcpListener>,
}

impl IngestServer {
    #[must_use]
    pub fn new(config: IngestConfig, gateway: Arc<Receptionist>) -> Self {
        Self {
            config,
            gateway,
            lifecycle: Arc::new(Lifecycle::new()),
            listener: None,
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Binds the listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let address = self.config.address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "ingestion listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves. Deliveries arriving after that are
    /// refused with `503`; admitted ones get up to the drain timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if [`start`](Self::start) was not called or the
    /// server hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .context("start() must be called before serve()")?;
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            lifecycle: Arc::clone(&self.lifecycle),
            start_time: Instant::now(),
        };
        let app = router(state, &self.config);

        self.lifecycle.set_ready();
        info!(gateway = %self.gateway.name(), "accepting callback deliveries");

        let lifecycle = Arc::clone(&self.lifecycle);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                lifecycle.begin_drain();
            })
            .await?;

        if self.lifecycle.wait_for_drain(self.config.drain_timeout).await {
            info!("all deliveries drained");
        } else {
            warn!(
                in_flight = self.lifecycle.in_flight(),
                "drain timeout expired with deliveries still in flight"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{gateway, ScriptedTransport};

    #[tokio::test]
    async fn serve_requires_start() {
        let (gateway, _store) = gateway(Arc::new(ScriptedTransport::json(200, "{}")), true).await;
        let server = IngestServer::new(IngestConfig::default(), Arc::new(gateway));
        assert!(server.serve(async {}).await.is_err());
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let (gateway, _store) = gateway(Arc::new(ScriptedTransport::json(200, "{}")), true).await;
        let mut server = IngestServer::new(
            IngestConfig {
                port: 0,
                ..IngestConfig::default()
            },
            Arc::new(gateway),
        );
        let port = server.start().await.unwrap();
        assert_ne!(port, 0);
        let lifecycle = server.lifecycle();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lifecycle.health(), HealthState::Ready);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(lifecycle.health(), HealthState::Stopped);
    }
}
