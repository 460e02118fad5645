//! Reactive Runtime
//!
//! The runtime bundles the registries that cells, computed values and
//! reactions share: one get observer, one set observer, and the
//! transactional emitter wrapping that set observer.
//!
//! # How It Works
//!
//! 1. Reading a cell emits a get event on the runtime's get observer, which
//!    records the read in the innermost capture window.
//!
//! 2. Writing a cell emits a set event on the raw set observer. Computed
//!    values subscribe there, so their caches are invalidated at once.
//!
//! 3. Reactions and autoruns subscribe through the transactional emitter,
//!    so they run once per transaction (or once per write outside one).
//!
//! # Global Runtime
//!
//! [`Runtime::global`] is the process-wide default, created on first use and
//! never torn down. Tests and embedders that need isolation build their own
//! with [`Runtime::new`]; cells and computed values remember the runtime
//! they were created with.

use std::fmt;
use std::sync::{Arc, OnceLock};

use super::autorun::{autorun, Autorun};
use super::computed::Computed;
use super::observable::Observable;
use super::reaction::{once, reaction_to, ReactionOptions};
use super::scope::TrackedScope;
use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::lifetime::{Lifetime, Lifetimed};
use crate::observer::{GetObserver, SetObserver, TransactionalSetEmitter};

struct RuntimeInner {
    config: RuntimeConfig,
    get_observer: GetObserver,
    set_observer: SetObserver,
    set_emitter: TransactionalSetEmitter,
}

/// A set of reactive registries.
///
/// Cloning a `Runtime` creates another handle to the **same** registries.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    /// Create an isolated runtime with the default configuration.
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create an isolated runtime with a validated configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let get_observer = GetObserver::new();
        let set_observer = SetObserver::new();
        let set_emitter =
            TransactionalSetEmitter::with_max_depth(set_observer.clone(), config.max_transaction_depth);

        tracing::debug!(?config, "runtime created");
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                get_observer,
                set_observer,
                set_emitter,
            }),
        }
    }

    /// The process-wide runtime, created with defaults on first use.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(Runtime::new)
    }

    /// Configure the process-wide runtime. Must run before anything uses it.
    pub fn init_global(config: RuntimeConfig) -> Result<&'static Runtime> {
        let runtime = Self::with_config(config)?;
        GLOBAL
            .set(runtime)
            .map_err(|_| ReactiveError::GlobalAlreadyInitialized)?;
        Ok(Self::global())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn get_observer(&self) -> &GetObserver {
        &self.inner.get_observer
    }

    /// The raw set observer, notified on every write.
    pub fn set_observer(&self) -> &SetObserver {
        &self.inner.set_observer
    }

    /// The transactional emitter reactions subscribe through.
    pub fn set_emitter(&self) -> &TransactionalSetEmitter {
        &self.inner.set_emitter
    }

    /// Whether two handles refer to the same registries.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn observable<T>(&self, value: T) -> Observable<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Observable::with_runtime(self, value)
    }

    pub fn computed<T, F>(&self, lifetime: &Lifetime, expression: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::with_runtime(self, lifetime, expression)
    }

    /// Batch the writes made by `handler` into one transaction.
    pub fn action<R, F>(&self, handler: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner.set_emitter.transaction(handler)
    }

    /// Run `f` without recording its reads.
    pub fn untracked<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.inner.get_observer.untracked(f)
    }

    /// [`reaction_to`] bound to this runtime's registries.
    pub fn reaction<O, T, E, F>(&self, owner: &O, expression: E, options: ReactionOptions, handler: F) -> T
    where
        O: Lifetimed + ?Sized,
        E: FnOnce() -> T,
        F: Fn() + Send + Sync + 'static,
    {
        reaction_to(
            owner,
            expression,
            &self.inner.set_emitter,
            &self.inner.get_observer,
            options,
            handler,
        )
    }

    /// [`once`] bound to this runtime's registries.
    pub fn once<O, T, E, F>(&self, owner: &O, expression: E, handler: F) -> T
    where
        O: Lifetimed + ?Sized,
        E: FnOnce() -> T,
        F: Fn() + Send + Sync + 'static,
    {
        once(
            owner,
            expression,
            &self.inner.set_emitter,
            &self.inner.get_observer,
            handler,
        )
    }

    /// [`autorun`] bound to this runtime's registries.
    pub fn autorun<O, F>(&self, owner: &O, handler: F) -> Autorun
    where
        O: Lifetimed + ?Sized,
        F: Fn() + Send + Sync + 'static,
    {
        autorun(
            owner,
            self.inner.set_emitter.clone(),
            self.inner.get_observer.clone(),
            handler,
        )
    }

    pub fn tracked_scope(&self, parent: &Lifetime) -> TrackedScope {
        TrackedScope::new(self, parent)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("get_observer", &self.inner.get_observer)
            .field("set_observer", &self.inner.set_observer)
            .field("set_emitter", &self.inner.set_emitter)
            .finish()
    }
}
