//! Observable Cells
//!
//! An observable is the base reactive primitive: a mutable value with a
//! property identity.
//!
//! # How Observables Work
//!
//! 1. Reading emits a get event, so an open capture window records the cell
//!    as a dependency.
//!
//! 2. Writing a value different from the current one stores it and emits a
//!    set event on the raw set observer, inside one implicit transaction.
//!    Computed values over the cell invalidate during that emission, and
//!    subscribers of the transactional emitter run once afterwards.
//!
//! 3. Writing an equal value does nothing: no event, no reaction.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock`. The lock is released
//! before any event is emitted and before any user closure runs, so
//! handlers and closures may read or write the cell.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::runtime::Runtime;
use crate::observer::{PropertyGetObserver, PropertyId, PropertySetObserver};

/// A reactive cell holding a value of type `T`.
///
/// Cloning an `Observable` creates another handle to the **same** cell.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.observable(0);
///
/// assert_eq!(count.get(), 0);
/// assert!(count.set(5));
/// assert!(!count.set(5));
/// ```
pub struct Observable<T> {
    id: PropertyId,
    value: Arc<RwLock<T>>,
    runtime: Runtime,
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cell on the global runtime.
    pub fn new(value: T) -> Self {
        Self::with_runtime(Runtime::global(), value)
    }

    pub fn with_runtime(runtime: &Runtime, value: T) -> Self {
        Self {
            id: PropertyId::new(),
            value: Arc::new(RwLock::new(value)),
            runtime: runtime.clone(),
        }
    }

    pub fn id(&self) -> PropertyId {
        self.id
    }

    /// Get the current value, recording the read.
    pub fn get(&self) -> T {
        self.runtime.get_observer().emit_get_value(self.id);
        self.value.read().clone()
    }

    /// Call `f` with the current value, recording the read. `f` sees a
    /// snapshot and may write the cell.
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let value = self.get();
        f(&value)
    }

    /// Get the current value without recording the read.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Store `value` and notify subscribers. Returns `false` (and notifies
    /// nobody) when `value` equals the current value.
    pub fn set(&self, value: T) -> bool {
        {
            let mut guard = self.value.write();
            if *guard == value {
                return false;
            }
            *guard = value;
        }
        let runtime = &self.runtime;
        runtime
            .set_emitter()
            .batch(|| runtime.set_observer().emit_set_value(self.id));
        true
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked();
        let next = f(&current);
        self.set(next)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

/// Create a cell on the global runtime.
pub fn observable<T>(value: T) -> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Observable::new(value)
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .finish()
    }
}
