//! Computed Values
//!
//! A computed value is a lazily evaluated, cached derivation over other
//! reactive values.
//!
//! # How Computed Values Work
//!
//! 1. Nothing runs at construction. The first read evaluates the
//!    expression inside a capture window and caches the result.
//!
//! 2. Each evaluation subscribes to the raw set events of every property it
//!    read. Subscriptions from the previous evaluation are released first,
//!    so a computed only listens to what its latest evaluation read.
//!
//! 3. A write to any dependency clears the cache and emits a set event for
//!    the computed's own property, so downstream computed values and
//!    reactions see the change too.
//!
//! 4. The next read re-evaluates. Values never read again never recompute.
//!
//! # Lifetime
//!
//! Subscriptions are scoped by the lifetime given at construction. Once it
//! terminates, the computed stops listening: a cached value stays cached
//! forever, and an uncached one evaluates on each read without caching.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::runtime::Runtime;
use super::subscriber::Handler;
use crate::error::{ReactiveError, Result};
use crate::lifetime::{Lifetime, Lifetimed, SequentialLifetimes};
use crate::observer::{
    get_expression_dependencies, PropertyGetObserver, PropertyId, PropertySetEmitter,
    PropertySetObserver,
};

/// A cached evaluation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResult<T> {
    value: T,
}

impl<T> CachedResult<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

struct ComputedInner<T> {
    id: PropertyId,
    runtime: Runtime,
    lifetime: Lifetime,
    expression: Box<dyn Fn() -> T + Send + Sync>,
    /// Subscriptions of the latest evaluation.
    evaluations: SequentialLifetimes,
    cache: Mutex<Option<CachedResult<T>>>,
    evaluating: AtomicBool,
    evaluation_count: AtomicUsize,
}

impl<T> ComputedInner<T> {
    fn invalidate(&self) {
        let cleared = self.cache.lock().take().is_some();
        if cleared {
            tracing::trace!(property = %self.id, "computed invalidated");
            let runtime = &self.runtime;
            runtime
                .set_emitter()
                .batch(|| runtime.set_observer().emit_set_value(self.id));
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.evaluations.terminate_current();
    }
}

/// Resets the re-entrancy flag even if the expression panics.
struct EvaluationGuard<'a>(&'a AtomicBool);

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A lazily evaluated, cached derived value.
///
/// Cloning a `Computed` creates another handle to the **same** cache.
///
/// # Example
///
/// ```rust
/// use tether_core::lifetime::Lifetime;
/// use tether_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let lifetime = Lifetime::new();
/// let count = runtime.observable(2);
///
/// let source = count.clone();
/// let doubled = runtime.computed(&lifetime, move || source.get() * 2);
/// assert_eq!(doubled.get(), 4);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed value on the global runtime.
    pub fn new<F>(lifetime: &Lifetime, expression: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_runtime(Runtime::global(), lifetime, expression)
    }

    /// Create a computed value. The expression does not run until the first
    /// read.
    pub fn with_runtime<F>(runtime: &Runtime, lifetime: &Lifetime, expression: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ComputedInner {
                id: PropertyId::new(),
                runtime: runtime.clone(),
                lifetime: lifetime.clone(),
                expression: Box::new(expression),
                evaluations: SequentialLifetimes::new(lifetime),
                cache: Mutex::new(None),
                evaluating: AtomicBool::new(false),
                evaluation_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> PropertyId {
        self.inner.id
    }

    /// Get the value, evaluating if the cache is empty. Panics if the
    /// expression reads this computed value.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the value, evaluating if the cache is empty.
    ///
    /// The read itself is emitted first, so an enclosing capture records
    /// this computed value as a dependency whether or not it was cached.
    pub fn try_get(&self) -> Result<T> {
        let inner = &self.inner;
        inner.runtime.get_observer().emit_get_value(inner.id);

        if let Some(cached) = inner.cache.lock().as_ref() {
            return Ok(cached.value().clone());
        }

        if inner.evaluating.swap(true, Ordering::SeqCst) {
            return Err(ReactiveError::CyclicComputed { property: inner.id });
        }
        let _guard = EvaluationGuard(&inner.evaluating);

        let (dependencies, value) =
            get_expression_dependencies(inner.runtime.get_observer(), || (inner.expression)());
        let run = inner.evaluation_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(
            property = %inner.id,
            run,
            dependencies = dependencies.len(),
            "computed evaluated"
        );

        let evaluation = inner.evaluations.next();
        if evaluation.is_terminated() {
            return Ok(value);
        }

        let handler = Self::invalidation_handler(Arc::downgrade(&self.inner));
        for property in dependencies {
            inner
                .runtime
                .set_observer()
                .on_set_value(&evaluation, property, handler.clone());
        }
        *inner.cache.lock() = Some(CachedResult::new(value.clone()));
        Ok(value)
    }

    fn invalidation_handler(weak: Weak<ComputedInner<T>>) -> Handler {
        Handler::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.invalidate();
            }
        })
    }

    /// Drop the cached value, notifying dependents if there was one.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    pub fn is_cached(&self) -> bool {
        self.inner.cache.lock().is_some()
    }

    /// The cached result, without evaluating or recording the read.
    pub fn cached(&self) -> Option<CachedResult<T>> {
        self.inner.cache.lock().clone()
    }

    /// How many times the expression has run.
    pub fn evaluation_count(&self) -> usize {
        self.inner.evaluation_count.load(Ordering::Relaxed)
    }
}

/// Create a computed value on the global runtime.
pub fn computed<T, F>(lifetime: &Lifetime, expression: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(lifetime, expression)
}

impl<T> Lifetimed for Computed<T> {
    fn lifetime(&self) -> &Lifetime {
        &self.inner.lifetime
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("cache", &*self.inner.cache.lock())
            .field("evaluation_count", &self.inner.evaluation_count.load(Ordering::Relaxed))
            .finish()
    }
}
