//! HTTP handlers for callback ingestion and health.

pub mod callback;
pub mod health;

pub use callback::{callback_handler, CALLBACK_SOURCE_HEADER};
pub use health::health_handler;

use std::sync::Arc;
use std::time::Instant;

use super::Lifecycle;
use crate::gateway::Receptionist;

/// Shared state passed to handlers via `State` extraction. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Receptionist>,
    pub lifecycle: Arc<Lifecycle>,
    /// Server start time, for uptime.
    pub start_time: Instant,
}
