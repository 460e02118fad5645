//! Read interception.
//!
//! Every read of an observable cell or computed value is emitted on a get
//! observer. The observer records the read in the innermost open capture
//! window (see [`CaptureWindow`]) and notifies its read listeners.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::property::{KeySource, PropertyId, SubscriptionKey};
use crate::error::{PanicSink, Phase};
use crate::lifetime::Lifetime;
use crate::reactive::{CaptureWindow, DependencySet, GetHandler, ObserverId};

/// Subscribe side of read interception.
pub trait PropertyGetEmitter: Send + Sync {
    /// Subscribe `handler` to every read until `lifetime` terminates.
    ///
    /// Returns `false`, keeping nothing, when `lifetime` is already
    /// terminated.
    fn on_get_value(&self, lifetime: &Lifetime, handler: GetHandler) -> bool;

    /// Open a capture window recording the reads emitted on this emitter.
    fn capture(&self) -> CaptureWindow;
}

/// Emit side of read interception.
pub trait PropertyGetObserver: PropertyGetEmitter {
    fn emit_get_value(&self, property: PropertyId);
}

/// Run `expression` once and return the distinct properties it read,
/// together with its result.
///
/// Reads made by nested captures (a computed evaluating inside the
/// expression) are attributed to those captures, not to this one.
pub fn get_expression_dependencies<E, T, F>(emitter: &E, expression: F) -> (DependencySet, T)
where
    E: PropertyGetEmitter + ?Sized,
    F: FnOnce() -> T,
{
    let window = emitter.capture();
    let result = expression();
    (window.finish(), result)
}

struct GetShared {
    id: ObserverId,
    keys: KeySource,
    listeners: Mutex<Vec<(SubscriptionKey, GetHandler)>>,
}

impl GetShared {
    fn remove(&self, key: SubscriptionKey) {
        self.listeners.lock().retain(|(k, _)| *k != key);
    }
}

/// The get registry.
///
/// Cloning a `GetObserver` creates another handle to the **same** registry.
#[derive(Clone)]
pub struct GetObserver {
    shared: Arc<GetShared>,
}

impl GetObserver {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(GetShared {
                id: ObserverId::new(),
                keys: KeySource::default(),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.shared.id
    }

    /// Run `f` without recording its reads in any enclosing capture window
    /// of this observer.
    pub fn untracked<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _discarded = self.capture();
        f()
    }

    /// Number of live read listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }
}

impl Default for GetObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyGetEmitter for GetObserver {
    fn on_get_value(&self, lifetime: &Lifetime, handler: GetHandler) -> bool {
        if lifetime.is_terminated() {
            tracing::debug!("get subscription rejected: lifetime terminated");
            return false;
        }

        let key = self.shared.keys.next();
        self.shared.listeners.lock().push((key, handler));

        let shared: Weak<GetShared> = Arc::downgrade(&self.shared);
        lifetime.on_terminate(move || {
            if let Some(shared) = shared.upgrade() {
                shared.remove(key);
            }
        });
        true
    }

    fn capture(&self) -> CaptureWindow {
        CaptureWindow::enter(self.shared.id)
    }
}

impl PropertyGetObserver for GetObserver {
    fn emit_get_value(&self, property: PropertyId) {
        let captured = CaptureWindow::record(self.shared.id, property);
        tracing::trace!(%property, captured, "get");

        let listeners: Vec<GetHandler> = self
            .shared
            .listeners
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }

        let mut sink = PanicSink::new(Phase::GetEmission);
        for listener in listeners {
            sink.run(|| listener(property));
        }
        sink.finish();
    }
}

impl fmt::Debug for GetObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetObserver")
            .field("id", &self.shared.id)
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<PropertyId>>>, GetHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Arc::new(move |property: PropertyId| sink.lock().push(property)))
    }

    #[test]
    fn listeners_see_reads_until_lifetime_ends() {
        let observer = GetObserver::new();
        let lifetime = Lifetime::new();
        let (seen, handler) = recorder();
        observer.on_get_value(&lifetime, handler);

        let property = PropertyId::new();
        observer.emit_get_value(property);
        lifetime.terminate();
        observer.emit_get_value(property);

        assert_eq!(*seen.lock(), vec![property]);
        assert_eq!(observer.listener_count(), 0);
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let observer = GetObserver::new();
        let lifetime = Lifetime::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            observer.on_get_value(&lifetime, Arc::new(move |_: PropertyId| order.lock().push(i)));
        }
        observer.emit_get_value(PropertyId::new());

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn listener_may_unsubscribe_itself_mid_emission() {
        let observer = GetObserver::new();
        let first = Lifetime::new();
        let second = Lifetime::new();
        let (seen, recorder) = recorder();

        let own = first.clone();
        observer.on_get_value(&first, Arc::new(move |_: PropertyId| own.terminate()));
        observer.on_get_value(&second, recorder);

        let property = PropertyId::new();
        observer.emit_get_value(property);
        observer.emit_get_value(property);

        assert_eq!(*seen.lock(), vec![property, property]);
        assert_eq!(observer.listener_count(), 1);
    }

    #[test]
    fn terminated_lifetime_is_rejected() {
        let observer = GetObserver::new();
        let lifetime = Lifetime::new();
        lifetime.terminate();

        let (seen, handler) = recorder();
        assert!(!observer.on_get_value(&lifetime, handler));
        assert_eq!(observer.listener_count(), 0);

        observer.emit_get_value(PropertyId::new());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn expression_dependencies_are_distinct() {
        let observer = GetObserver::new();
        let (a, b) = (PropertyId::new(), PropertyId::new());

        let (deps, result) = get_expression_dependencies(&observer, || {
            observer.emit_get_value(a);
            observer.emit_get_value(b);
            observer.emit_get_value(a);
            7
        });

        assert_eq!(result, 7);
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn untracked_reads_are_hidden_from_capture() {
        let observer = GetObserver::new();
        let (tracked, hidden) = (PropertyId::new(), PropertyId::new());

        let (deps, ()) = get_expression_dependencies(&observer, || {
            observer.emit_get_value(tracked);
            observer.untracked(|| observer.emit_get_value(hidden));
        });

        assert!(deps.contains(&tracked));
        assert!(!deps.contains(&hidden));
    }

    #[test]
    fn separate_observers_do_not_share_captures() {
        let mine = GetObserver::new();
        let other = GetObserver::new();
        let property = PropertyId::new();

        let (deps, ()) = get_expression_dependencies(&mine, || other.emit_get_value(property));
        assert!(deps.is_empty());
    }
}
