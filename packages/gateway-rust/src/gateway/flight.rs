//! Single-flight coalescing of identical concurrent fetches.
//!
//! Callers with the same key share one [`OnceCell`]. The first caller to
//! reach it runs its fetch; the rest wait for that result. If the running
//! fetch fails or its future is dropped, the next waiter runs its own fetch,
//! so errors only reach the caller whose fetch produced them.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Map of in-flight fetches keyed by request identity.
pub struct InFlight<T> {
    calls: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }
}

impl<T: Clone> InFlight<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fetch` unless an identical call is already running, in which
    /// case that call's result is shared.
    ///
    /// Returns the value and whether this caller's own `fetch` produced it.
    ///
    /// # Errors
    ///
    /// Returns the error of this caller's `fetch`. Errors of other callers
    /// are never shared.
    pub async fn run<E, F, Fut>(&self, key: &str, fetch: F) -> Result<(T, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = Arc::clone(&self.calls.entry(key.to_owned()).or_default());

        let mut led = false;
        let result = cell
            .get_or_try_init(|| {
                led = true;
                fetch()
            })
            .await
            .cloned();

        // Settled either way: later callers start a fresh fetch.
        self.calls
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        result.map(|value| (value, led))
    }

    /// Number of keys with a fetch currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
