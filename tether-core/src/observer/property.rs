//! Property identities and per-property subscriber records.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::reactive::Handler;

/// Identity of an observable cell or computed value.
///
/// Identities are allocated from a process-wide counter, so two distinct
/// cells never compare equal, whatever their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(u64);

impl PropertyId {
    /// Allocate a fresh identity.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for PropertyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key of one subscription inside a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionKey(pub(crate) u64);

/// A counter handing out subscription keys.
#[derive(Debug, Default)]
pub(crate) struct KeySource(AtomicU64);

impl KeySource {
    pub(crate) fn next(&self) -> SubscriptionKey {
        SubscriptionKey(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handlers subscribed to one property, in subscription order.
#[derive(Default)]
pub(crate) struct SubscriberList {
    entries: SmallVec<[(SubscriptionKey, Handler); 2]>,
}

impl SubscriberList {
    pub(crate) fn push(&mut self, key: SubscriptionKey, handler: Handler) {
        self.entries.push((key, handler));
    }

    /// Remove one subscription. Returns `true` if it was present.
    pub(crate) fn remove(&mut self, key: SubscriptionKey) -> bool {
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn handlers(&self) -> impl Iterator<Item = &Handler> {
        self.entries.iter().map(|(_, handler)| handler)
    }

    /// Clone the handlers so they can run without the registry lock held.
    pub(crate) fn snapshot(&self) -> SmallVec<[Handler; 4]> {
        self.handlers().cloned().collect()
    }
}
