//! Ingestion server lifecycle.
//!
//! Deliveries are admitted only while the server is accepting. Each admitted
//! delivery holds a [`DeliveryGuard`]; once draining starts, new deliveries
//! are refused and [`Lifecycle::wait_for_drain`] resolves when the last
//! guard drops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

/// Server health state.
///
/// Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Whether new deliveries may be recorded in this state.
    #[must_use]
    pub fn accepts_deliveries(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

#[derive(Debug, Default)]
struct Deliveries {
    active: AtomicU64,
    idle: Notify,
}

/// Shared lifecycle state of the ingestion server.
#[derive(Debug)]
pub struct Lifecycle {
    deliveries: Arc<Deliveries>,
    health: ArcSwap<HealthState>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            deliveries: Arc::new(Deliveries::default()),
            health: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health.store(Arc::new(HealthState::Ready));
    }

    /// Stops admitting deliveries. Those already admitted run to completion.
    pub fn begin_drain(&self) {
        self.health.store(Arc::new(HealthState::Draining));
    }

    #[must_use]
    pub fn health(&self) -> HealthState {
        **self.health.load()
    }

    /// Admits one delivery, or returns `None` once draining has begun.
    #[must_use]
    pub fn admit(&self) -> Option<DeliveryGuard> {
        // Count first so a concurrent drain either sees this delivery or
        // this check sees the drain.
        self.deliveries.active.fetch_add(1, Ordering::AcqRel);
        let guard = DeliveryGuard {
            deliveries: Arc::clone(&self.deliveries),
        };
        if self.health().accepts_deliveries() {
            Some(guard)
        } else {
            None
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.deliveries.active.load(Ordering::Acquire)
    }

    /// Waits until no delivery is in flight or `timeout` expires.
    ///
    /// Returns `true` and moves to `Stopped` once drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let idle = self.deliveries.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        };
        if tokio::time::timeout(timeout, drained).await.is_err() {
            return false;
        }
        self.health.store(Arc::new(HealthState::Stopped));
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// One admitted delivery. Dropping the last guard wakes drain waiters.
#[derive(Debug)]
pub struct DeliveryGuard {
    deliveries: Arc<Deliveries>,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.deliveries.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.deliveries.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_from_starting_to_draining() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.health(), HealthState::Starting);
        lifecycle.set_ready();
        assert_eq!(lifecycle.health(), HealthState::Ready);
        lifecycle.begin_drain();
        assert_eq!(lifecycle.health().as_str(), "draining");
    }

    #[test]
    fn admitted_deliveries_are_counted() {
        let lifecycle = Lifecycle::new();
        lifecycle.set_ready();
        let first = lifecycle.admit().unwrap();
        let second = lifecycle.admit().unwrap();
        assert_eq!(lifecycle.in_flight(), 2);
        drop(first);
        assert_eq!(lifecycle.in_flight(), 1);
        drop(second);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn draining_refuses_new_deliveries() {
        let lifecycle = Lifecycle::new();
        lifecycle.set_ready();
        let admitted = lifecycle.admit().unwrap();
        lifecycle.begin_drain();

        assert!(lifecycle.admit().is_none());
        assert_eq!(lifecycle.in_flight(), 1);
        drop(admitted);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_resolves_when_last_delivery_ends() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.admit().unwrap();
        lifecycle.begin_drain();

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.wait_for_drain(Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        drop(guard);

        assert!(waiter.await.unwrap());
        assert_eq!(lifecycle.health(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_is_immediate() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_drain();
        assert!(lifecycle.wait_for_drain(Duration::from_millis(1)).await);
        assert_eq!(lifecycle.health(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn drain_times_out() {
        let lifecycle = Lifecycle::new();
        let _guard = lifecycle.admit().unwrap();
        lifecycle.begin_drain();
        assert!(!lifecycle.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(lifecycle.health(), HealthState::Draining);
    }
}
