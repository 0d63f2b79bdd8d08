//! Gateway event observers and composite fan-out.
//!
//! [`GatewayObserver`] receives notifications for completed fetches, cache
//! hits and recorded callbacks. [`CompositeObserver`] forwards each event to
//! every registered observer in registration order.

use std::sync::Arc;

use receptionist_core::{CallbackEntry, RequestEntry};

/// Observer for gateway events. All methods default to no-ops.
///
/// Callbacks run inline on the request path, so implementations should be
/// quick and must not block.
///
/// Used as `Arc<dyn GatewayObserver>`.
pub trait GatewayObserver: Send + Sync {
    /// Called after an upstream response was decoded, before it is persisted.
    fn on_fetch(&self, _entry: &RequestEntry) {}

    /// Called when a request is answered from the cache store.
    fn on_cache_hit(&self, _entry: &RequestEntry) {}

    /// Called after a callback entry was persisted.
    fn on_callback(&self, _entry: &CallbackEntry) {}
}

/// Fans each notification out to every registered observer.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn GatewayObserver>>,
}

impl CompositeObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn GatewayObserver>>) -> Self {
        Self { observers }
    }

    /// Adds an observer after construction.
    pub fn add(&mut self, observer: Arc<dyn GatewayObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl GatewayObserver for CompositeObserver {
    fn on_fetch(&self, entry: &RequestEntry) {
        for observer in &self.observers {
            observer.on_fetch(entry);
        }
    }

    fn on_cache_hit(&self, entry: &RequestEntry) {
        for observer in &self.observers {
            observer.on_cache_hit(entry);
        }
    }

    fn on_callback(&self, entry: &CallbackEntry) {
        for observer in &self.observers {
            observer.on_callback(entry);
        }
    }
}
