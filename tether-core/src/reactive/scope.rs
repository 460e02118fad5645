//! Tracked scopes for render-style consumers.
//!
//! A consumer that periodically rebuilds its output (a view, a report)
//! runs each rebuild through [`TrackedScope::run`]. The reads made by the
//! body are watched once: the first change calls `on_invalidate`, and the
//! consumer is expected to run again. Starting a new run releases the
//! previous run's subscriptions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::reaction::once;
use super::runtime::Runtime;
use crate::lifetime::{Lifetime, Lifetimed, SequentialLifetimes};
use crate::observer::{GetObserver, TransactionalSetEmitter};

pub struct TrackedScope {
    lifetime: Lifetime,
    runs: SequentialLifetimes,
    set_emitter: TransactionalSetEmitter,
    get_observer: GetObserver,
    generation: AtomicU64,
}

impl TrackedScope {
    /// Create a scope living under `parent`.
    pub fn new(runtime: &Runtime, parent: &Lifetime) -> Self {
        let lifetime = parent.nested();
        Self {
            runs: SequentialLifetimes::new(&lifetime),
            lifetime,
            set_emitter: runtime.set_emitter().clone(),
            get_observer: runtime.get_observer().clone(),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `body` as the next generation and return its result.
    ///
    /// `on_invalidate` runs at most once, on the first change to anything
    /// `body` read, unless another run or a teardown happens first.
    pub fn run<T, B, F>(&self, body: B, on_invalidate: F) -> T
    where
        B: FnOnce() -> T,
        F: Fn() + Send + Sync + 'static,
    {
        let run = self.runs.next();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(generation, "tracked scope run");

        once(&run, body, &self.set_emitter, &self.get_observer, on_invalidate)
    }

    /// Number of runs so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Release every subscription and stop accepting runs.
    pub fn teardown(&self) {
        self.lifetime.terminate();
    }

    pub fn is_torn_down(&self) -> bool {
        self.lifetime.is_terminated()
    }
}

impl Lifetimed for TrackedScope {
    fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }
}

impl fmt::Debug for TrackedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedScope")
            .field("generation", &self.generation())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
