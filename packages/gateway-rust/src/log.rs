//! In-memory, ordered logs of fetched requests and recorded callbacks.
//!
//! Both logs are [`GatewayObserver`]s registered by the gateway at
//! construction. They keep the most recent `capacity` entries, dropping the
//! oldest, and are never persisted.

use std::collections::VecDeque;

use parking_lot::RwLock;
use receptionist_core::{CallbackEntry, RequestEntry};
use tracing::{info, warn};

use crate::observer::GatewayObserver;

/// Entries kept per log unless configured otherwise.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

fn push_bounded<T>(entries: &mut VecDeque<T>, capacity: usize, entry: T) {
    entries.push_back(entry);
    while entries.len() > capacity {
        entries.pop_front();
    }
}

/// Every request that went to the network, in completion order.
///
/// Cache hits are not recorded.
#[derive(Debug)]
pub struct RequestLog {
    capacity: usize,
    entries: RwLock<VecDeque<RequestEntry>>,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl RequestLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log keeping at most `capacity` entries. Zero keeps none.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an entry, logging it at `info` for 2xx and `warn` otherwise.
    pub fn append(&self, entry: RequestEntry) {
        if (200..300).contains(&entry.status) {
            info!(status = entry.status, url = %entry.url, "{entry}");
        } else {
            warn!(status = entry.status, url = %entry.url, "{entry}");
        }
        push_bounded(&mut self.entries.write(), self.capacity, entry);
    }

    /// Snapshot of the retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<RequestEntry> {
        self.entries.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn last(&self) -> Option<RequestEntry> {
        self.entries.read().back().cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl GatewayObserver for RequestLog {
    fn on_fetch(&self, entry: &RequestEntry) {
        self.append(entry.clone());
    }
}

/// Callbacks that were persisted, in arrival order.
#[derive(Debug)]
pub struct CallbackLog {
    capacity: usize,
    entries: RwLock<VecDeque<CallbackEntry>>,
}

impl Default for CallbackLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl CallbackLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn append(&self, entry: CallbackEntry) {
        if (200..300).contains(&entry.entry.status) {
            info!(event = %entry.event, "{entry}");
        } else {
            warn!(event = %entry.event, "{entry}");
        }
        push_bounded(&mut self.entries.write(), self.capacity, entry);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<CallbackEntry> {
        self.entries.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn last(&self) -> Option<CallbackEntry> {
        self.entries.read().back().cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl GatewayObserver for CallbackLog {
    fn on_callback(&self, entry: &CallbackEntry) {
        self.append(entry.clone());
    }
}
