//! Handler types for the reactive system.
//!
//! A [`Handler`] is the callback a subscriber hands to a set emitter. It
//! carries a [`HandlerId`] so that one handler subscribed to several
//! properties can be recognised as the same subscriber when a transaction
//! flushes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a handler.
///
/// Cloning a [`Handler`] keeps its ID; every [`Handler::new`] gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Generate a new unique handler ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A change handler with a stable identity.
#[derive(Clone)]
pub struct Handler {
    id: HandlerId,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Handler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: HandlerId::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Invoke the handler.
    pub fn call(&self) {
        (self.callback)();
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id).finish()
    }
}

/// Listener notified with the identity of every property read.
pub type GetHandler = Arc<dyn Fn(crate::observer::PropertyId) + Send + Sync>;
