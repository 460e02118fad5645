//! Write interception.
//!
//! Handlers subscribe to writes of one specific property, scoped by a
//! lifetime. Emission is synchronous and in subscription order. The handler
//! list is snapshotted before it runs, so handlers may subscribe or
//! unsubscribe (themselves or others) mid-emission.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::property::{KeySource, PropertyId, SubscriberList, SubscriptionKey};
use crate::error::{PanicSink, Phase};
use crate::lifetime::Lifetime;
use crate::reactive::Handler;

/// Subscribe side of write interception.
pub trait PropertySetEmitter: Send + Sync {
    /// Subscribe `handler` to writes of `property` until `lifetime`
    /// terminates.
    ///
    /// Returns `false`, keeping nothing, when `lifetime` is already
    /// terminated.
    fn on_set_value(&self, lifetime: &Lifetime, property: PropertyId, handler: Handler) -> bool;
}

/// Emit side of write interception.
pub trait PropertySetObserver: PropertySetEmitter {
    fn emit_set_value(&self, property: PropertyId);
}

struct SetShared {
    keys: KeySource,
    properties: Mutex<HashMap<PropertyId, SubscriberList>>,
}

impl SetShared {
    fn remove(&self, property: PropertyId, key: SubscriptionKey) {
        let mut properties = self.properties.lock();
        if let Some(subscribers) = properties.get_mut(&property) {
            subscribers.remove(key);
            if subscribers.is_empty() {
                properties.remove(&property);
                tracing::debug!(%property, "pruned empty subscriber list");
            }
        }
    }
}

/// The set registry.
///
/// Cloning a `SetObserver` creates another handle to the **same** registry.
#[derive(Clone)]
pub struct SetObserver {
    shared: Arc<SetShared>,
}

impl SetObserver {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SetShared {
                keys: KeySource::default(),
                properties: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of live subscriptions to `property`.
    pub fn subscriber_count(&self, property: PropertyId) -> usize {
        self.shared
            .properties
            .lock()
            .get(&property)
            .map_or(0, SubscriberList::len)
    }

    /// Number of properties with at least one subscription.
    pub fn property_count(&self) -> usize {
        self.shared.properties.lock().len()
    }
}

impl Default for SetObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertySetEmitter for SetObserver {
    fn on_set_value(&self, lifetime: &Lifetime, property: PropertyId, handler: Handler) -> bool {
        if lifetime.is_terminated() {
            tracing::debug!(%property, "set subscription rejected: lifetime terminated");
            return false;
        }

        let key = self.shared.keys.next();
        self.shared
            .properties
            .lock()
            .entry(property)
            .or_default()
            .push(key, handler);

        let shared: Weak<SetShared> = Arc::downgrade(&self.shared);
        lifetime.on_terminate(move || {
            if let Some(shared) = shared.upgrade() {
                shared.remove(property, key);
            }
        });
        true
    }
}

impl PropertySetObserver for SetObserver {
    fn emit_set_value(&self, property: PropertyId) {
        let handlers = match self.shared.properties.lock().get(&property) {
            Some(subscribers) => subscribers.snapshot(),
            None => return,
        };
        tracing::trace!(%property, handlers = handlers.len(), "set");

        let mut sink = PanicSink::new(Phase::SetEmission);
        for handler in &handlers {
            sink.run(|| handler.call());
        }
        sink.finish();
    }
}

impl fmt::Debug for SetObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetObserver")
            .field("property_count", &self.property_count())
            .finish()
    }
}
