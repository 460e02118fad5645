//! Transactional Set Emitter
//!
//! Wraps a set emitter so that writes are batched: handlers subscribed here
//! fire once per transaction, however many of their properties were written
//! and however often.
//!
//! # How It Works
//!
//! 1. The first subscription to a property arms one *collector* on the
//!    underlying emitter. The collector marks the property dirty whenever it
//!    is written.
//!
//! 2. [`transaction`](TransactionalSetEmitter::transaction) runs its action.
//!    Writes take effect immediately; only notification is deferred.
//!
//! 3. When the outermost transaction ends, the handlers of every dirty
//!    property are collected into one set (deduplicated by [`HandlerId`]),
//!    the dirty set is cleared, and each handler runs exactly once.
//!
//! A write outside any transaction behaves as a transaction of its own, so
//! it notifies exactly once per write. Cells open that transaction around
//! their raw emission with [`batch`](TransactionalSetEmitter::batch), so
//! every computed value invalidated by the write is marked before any
//! handler runs.
//!
//! # Nesting
//!
//! A transaction started inside another one merges its dirty marks into the
//! outer transaction. Only the outermost transaction flushes. Writes made by
//! handlers during a flush start a fresh implicit transaction of their own.
//!
//! [`HandlerId`]: crate::reactive::HandlerId

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use super::property::{KeySource, PropertyId, SubscriberList, SubscriptionKey};
use super::set::PropertySetEmitter;
use crate::config::RuntimeConfig;
use crate::error::{PanicSink, Phase, ReactiveError, Result};
use crate::lifetime::Lifetime;
use crate::reactive::{Handler, HandlerId};

struct TxEntry {
    subscribers: SubscriberList,
    /// Scope of the collector armed on the underlying emitter.
    collector: Lifetime,
}

#[derive(Default)]
struct TxState {
    depth: usize,
    dirty: IndexSet<PropertyId>,
    properties: HashMap<PropertyId, TxEntry>,
}

struct TxShared {
    observer: Arc<dyn PropertySetEmitter>,
    max_depth: usize,
    keys: KeySource,
    state: Mutex<TxState>,
}

impl TxShared {
    fn remove(&self, property: PropertyId, key: SubscriptionKey) {
        let collector = {
            let mut state = self.state.lock();
            match state.properties.get_mut(&property) {
                Some(entry) => {
                    entry.subscribers.remove(key);
                    if entry.subscribers.is_empty() {
                        state.properties.remove(&property).map(|entry| entry.collector)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(collector) = collector {
            tracing::debug!(%property, "disarming transaction collector");
            collector.terminate();
        }
    }
}

/// Batches write notifications into transactions.
///
/// Cloning creates another handle to the **same** emitter.
#[derive(Clone)]
pub struct TransactionalSetEmitter {
    shared: Arc<TxShared>,
}

impl TransactionalSetEmitter {
    /// Wrap `observer` with the default nesting limit.
    pub fn new<O>(observer: O) -> Self
    where
        O: PropertySetEmitter + 'static,
    {
        Self::with_max_depth(observer, RuntimeConfig::DEFAULT_MAX_TRANSACTION_DEPTH)
    }

    pub fn with_max_depth<O>(observer: O, max_depth: usize) -> Self
    where
        O: PropertySetEmitter + 'static,
    {
        Self {
            shared: Arc::new(TxShared {
                observer: Arc::new(observer),
                max_depth,
                keys: KeySource::default(),
                state: Mutex::new(TxState::default()),
            }),
        }
    }

    /// Run `action` as a transaction, panicking if the nesting limit is
    /// exceeded.
    pub fn transaction<R, F>(&self, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        match self.try_transaction(action) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Run `action` as a transaction.
    ///
    /// If `action` panics, the transaction still flushes (its writes already
    /// took effect) and the panic is then resumed. A panic from a flushed
    /// handler is resumed after every other handler ran.
    pub fn try_transaction<R, F>(&self, action: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        self.execute(Some(self.shared.max_depth), action)
    }

    /// Run `action` as a transaction that ignores the nesting limit.
    ///
    /// This is the implicit transaction around a single write: it joins an
    /// open transaction, or flushes once on its own.
    pub fn batch<R, F>(&self, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        match self.execute(None, action) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Current nesting depth; zero outside any transaction.
    pub fn depth(&self) -> usize {
        self.shared.state.lock().depth
    }

    pub fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    /// Number of properties marked dirty in the open transaction.
    pub fn dirty_count(&self) -> usize {
        self.shared.state.lock().dirty.len()
    }

    /// Number of live subscriptions to `property`.
    pub fn subscriber_count(&self, property: PropertyId) -> usize {
        self.shared
            .state
            .lock()
            .properties
            .get(&property)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Number of properties with at least one subscription.
    pub fn property_count(&self) -> usize {
        self.shared.state.lock().properties.len()
    }

    fn mark_dirty(&self, property: PropertyId) {
        self.batch(|| {
            self.shared.state.lock().dirty.insert(property);
        });
    }

    fn execute<R, F>(&self, limit: Option<usize>, action: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        self.begin(limit)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(action));
        let pending = self.end();

        if !pending.is_empty() {
            tracing::debug!(handlers = pending.len(), "flushing transaction");
        }
        let mut sink = PanicSink::new(Phase::TransactionFlush);
        for handler in pending.values() {
            sink.run(|| handler.call());
        }

        match outcome {
            Ok(value) => {
                sink.finish();
                Ok(value)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn begin(&self, limit: Option<usize>) -> Result<()> {
        let mut state = self.shared.state.lock();
        if let Some(limit) = limit {
            if state.depth >= limit {
                return Err(ReactiveError::TransactionDepthExceeded { limit });
            }
        }
        state.depth += 1;
        Ok(())
    }

    /// Leave one level; the outermost level drains the dirty set into the
    /// handlers to flush.
    fn end(&self) -> IndexMap<HandlerId, Handler> {
        let mut state = self.shared.state.lock();
        state.depth -= 1;

        let mut pending = IndexMap::new();
        if state.depth > 0 {
            return pending;
        }

        let dirty = std::mem::take(&mut state.dirty);
        for property in &dirty {
            if let Some(entry) = state.properties.get(property) {
                for handler in entry.subscribers.handlers() {
                    pending.entry(handler.id()).or_insert_with(|| handler.clone());
                }
            }
        }
        pending
    }
}

impl PropertySetEmitter for TransactionalSetEmitter {
    fn on_set_value(&self, lifetime: &Lifetime, property: PropertyId, handler: Handler) -> bool {
        if lifetime.is_terminated() {
            tracing::debug!(%property, "transactional subscription rejected: lifetime terminated");
            return false;
        }

        let key = self.shared.keys.next();
        let arm = {
            let mut state = self.shared.state.lock();
            match state.properties.entry(property) {
                Entry::Occupied(mut occupied) => {
                    occupied.get_mut().subscribers.push(key, handler);
                    None
                }
                Entry::Vacant(vacant) => {
                    let collector = Lifetime::new();
                    let mut subscribers = SubscriberList::default();
                    subscribers.push(key, handler);
                    vacant.insert(TxEntry {
                        subscribers,
                        collector: collector.clone(),
                    });
                    Some(collector)
                }
            }
        };

        if let Some(collector) = arm {
            let shared: Weak<TxShared> = Arc::downgrade(&self.shared);
            // A snapshot taken before disarming may still call a dead collector.
            let armed = collector.downgrade();
            self.shared.observer.on_set_value(
                &collector,
                property,
                Handler::new(move || {
                    if armed.is_terminated() {
                        return;
                    }
                    if let Some(shared) = shared.upgrade() {
                        TransactionalSetEmitter { shared }.mark_dirty(property);
                    }
                }),
            );
        }

        let shared: Weak<TxShared> = Arc::downgrade(&self.shared);
        lifetime.on_terminate(move || {
            if let Some(shared) = shared.upgrade() {
                shared.remove(property, key);
            }
        });
        true
    }
}

impl fmt::Debug for TransactionalSetEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TransactionalSetEmitter")
            .field("depth", &state.depth)
            .field("dirty", &state.dirty.len())
            .field("property_count", &state.properties.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{PropertySetObserver, SetObserver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handler = Handler::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    fn setup() -> (SetObserver, TransactionalSetEmitter) {
        let observer = SetObserver::new();
        let emitter = TransactionalSetEmitter::new(observer.clone());
        (observer, emitter)
    }

    #[test]
    fn write_outside_transaction_notifies_immediately() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let property = PropertyId::new();
        let (count, handler) = counting_handler();

        emitter.on_set_value(&lifetime, property, handler);
        observer.emit_set_value(property);
        observer.emit_set_value(property);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeated_writes_flush_once() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let property = PropertyId::new();
        let (count, handler) = counting_handler();
        emitter.on_set_value(&lifetime, property, handler);

        emitter.transaction(|| {
            observer.emit_set_value(property);
            observer.emit_set_value(property);
            observer.emit_set_value(property);
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.dirty_count(), 0);
    }

    #[test]
    fn shared_handler_across_properties_flushes_once() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let (a, b) = (PropertyId::new(), PropertyId::new());
        let (count, handler) = counting_handler();

        emitter.on_set_value(&lifetime, a, handler.clone());
        emitter.on_set_value(&lifetime, b, handler);

        emitter.transaction(|| {
            observer.emit_set_value(a);
            observer.emit_set_value(b);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_transactions_flush_with_the_outer_one() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let property = PropertyId::new();
        let (count, handler) = counting_handler();
        emitter.on_set_value(&lifetime, property, handler);

        emitter.transaction(|| {
            emitter.transaction(|| observer.emit_set_value(property));
            assert_eq!(emitter.depth(), 1);
            assert_eq!(count.load(Ordering::SeqCst), 0);
            observer.emit_set_value(property);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.depth(), 0);
    }

    #[test]
    fn batch_joins_an_open_transaction() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let property = PropertyId::new();
        let (count, handler) = counting_handler();
        emitter.on_set_value(&lifetime, property, handler);

        emitter.transaction(|| {
            emitter.batch(|| observer.emit_set_value(property));
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        emitter.batch(|| {
            observer.emit_set_value(property);
            observer.emit_set_value(property);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_ignores_the_depth_limit() {
        let emitter = TransactionalSetEmitter::with_max_depth(SetObserver::new(), 1);
        let nested = emitter.transaction(|| emitter.batch(|| emitter.depth()));
        assert_eq!(nested, 2);
    }

    #[test]
    fn one_write_reaching_a_handler_twice_notifies_once() {
        // A second raw subscriber re-emits a derived property, the way a
        // computed value forwards invalidation.
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let (source, derived) = (PropertyId::new(), PropertyId::new());
        let (count, handler) = counting_handler();

        emitter.on_set_value(&lifetime, source, handler.clone());
        emitter.on_set_value(&lifetime, derived, handler);
        let forward = observer.clone();
        observer.on_set_value(
            &lifetime,
            source,
            Handler::new(move || forward.emit_set_value(derived)),
        );

        emitter.batch(|| observer.emit_set_value(source));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminated_lifetime_is_rejected() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        lifetime.terminate();

        let (count, handler) = counting_handler();
        let property = PropertyId::new();
        assert!(!emitter.on_set_value(&lifetime, property, handler));
        assert_eq!(emitter.property_count(), 0);
        assert_eq!(observer.subscriber_count(property), 0);

        observer.emit_set_value(property);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transaction_returns_action_result() {
        let (_, emitter) = setup();
        assert_eq!(emitter.transaction(|| 42), 42);
    }

    #[test]
    fn untouched_handlers_do_not_fire() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let (a, b) = (PropertyId::new(), PropertyId::new());
        let (count, handler) = counting_handler();
        emitter.on_set_value(&lifetime, a, handler);

        emitter.transaction(|| observer.emit_set_value(b));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn last_unsubscribe_disarms_collector() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let property = PropertyId::new();
        let (_, first) = counting_handler();
        let (_, second) = counting_handler();

        emitter.on_set_value(&lifetime, property, first);
        emitter.on_set_value(&lifetime, property, second);
        assert_eq!(emitter.subscriber_count(property), 2);
        // One collector per property, however many subscribers.
        assert_eq!(observer.subscriber_count(property), 1);

        lifetime.terminate();
        assert_eq!(emitter.property_count(), 0);
        assert_eq!(observer.subscriber_count(property), 0);
    }

    #[test]
    fn depth_limit_rejects_runaway_nesting() {
        let observer = SetObserver::new();
        let emitter = TransactionalSetEmitter::with_max_depth(observer, 2);

        let result = emitter.try_transaction(|| {
            emitter.try_transaction(|| emitter.try_transaction(|| ()))
        });

        let inner = result.unwrap().unwrap();
        assert!(matches!(
            inner,
            Err(ReactiveError::TransactionDepthExceeded { limit: 2 })
        ));
        assert_eq!(emitter.depth(), 0);
    }

    #[test]
    fn panicking_action_still_flushes_and_resets_depth() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let property = PropertyId::new();
        let (count, handler) = counting_handler();
        emitter.on_set_value(&lifetime, property, handler);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            emitter.transaction(|| {
                observer.emit_set_value(property);
                panic!("action failed");
            })
        }));

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.depth(), 0);
        assert_eq!(emitter.dirty_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_block_the_flush() {
        let (observer, emitter) = setup();
        let lifetime = Lifetime::new();
        let (a, b) = (PropertyId::new(), PropertyId::new());
        let (count, handler) = counting_handler();

        emitter.on_set_value(&lifetime, a, Handler::new(|| panic!("handler failed")));
        emitter.on_set_value(&lifetime, b, handler);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            emitter.transaction(|| {
                observer.emit_set_value(a);
                observer.emit_set_value(b);
            })
        }));

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.dirty_count(), 0);
    }
}
