//! Autorun Implementation
//!
//! An autorun is a side-effecting handler that re-runs whenever anything it
//! read on its previous run changes.
//!
//! # How Autoruns Work
//!
//! 1. When created, the handler runs immediately inside a capture window.
//!
//! 2. The captured reads are subscribed with a one-shot reaction, scoped by
//!    a fresh child lifetime for this run.
//!
//! 3. The first change fires the reaction, which terminates the run's
//!    lifetime and starts the next run. Dependencies are rediscovered every
//!    time, so branches the handler stops taking stop triggering it.
//!
//! # States
//!
//! `Idle` waits for a change, `Scheduled` has a run pending, `Running` is
//! inside the handler and `Disposed` is final. Terminating the owner
//! disposes the autorun.
//!
//! # Ownership
//!
//! The owner keeps the autorun alive, so dropping every [`Autorun`] handle
//! does not stop it. The autorun only holds the owner weakly: an owner
//! dropped without being terminated frees the autorun and its handler.
//!
//! # Panics
//!
//! If the handler panics, the reads it made before panicking are still
//! subscribed, the autorun returns to `Idle`, and the panic is resumed.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::reaction::{reaction, DependencySubscription, ReactionOptions};
use crate::lifetime::{CleanupKey, Lifetimed, SequentialLifetimes, WeakLifetime};
use crate::observer::{PropertyGetEmitter, PropertySetEmitter};

/// Where an autorun is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutorunState {
    Idle,
    Scheduled,
    Running,
    Disposed,
}

struct AutorunShared {
    handler: Box<dyn Fn() + Send + Sync>,
    set_emitter: Box<dyn PropertySetEmitter>,
    get_emitter: Box<dyn PropertyGetEmitter>,
    /// Runs, nested in a child scope of the owner.
    runs: SequentialLifetimes,
    owner: WeakLifetime,
    /// Registration on the owner that disposes this autorun.
    owner_cleanup: Mutex<Option<CleanupKey>>,
    state: Mutex<AutorunState>,
    run_count: AtomicUsize,
    dependency_count: AtomicUsize,
}

impl AutorunShared {
    fn schedule(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != AutorunState::Idle {
                return;
            }
            *state = AutorunState::Scheduled;
        }
        self.step();
    }

    fn step(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != AutorunState::Scheduled {
                return;
            }
            *state = AutorunState::Running;
        }

        let run = self.runs.next();
        let count = self.run_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(run = count, "autorun");

        let window = self.get_emitter.capture();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)()));
        let dependencies = window.finish();
        self.dependency_count.store(dependencies.len(), Ordering::Relaxed);

        let weak = Arc::downgrade(self);
        let subscription = DependencySubscription::new(self.set_emitter.as_ref(), dependencies);
        reaction(&run, &subscription, ReactionOptions::ONCE, move || {
            if let Some(shared) = weak.upgrade() {
                shared.schedule();
            }
        });

        {
            let mut state = self.state.lock();
            if *state == AutorunState::Running {
                *state = AutorunState::Idle;
            }
        }

        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }
    }

    fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), AutorunState::Disposed);
        if previous != AutorunState::Disposed {
            tracing::debug!(runs = self.run_count.load(Ordering::Relaxed), "autorun disposed");
        }
        // Terminating the scope also withdraws it from the owner.
        self.runs.lifetime().terminate();

        let key = self.owner_cleanup.lock().take();
        if let (Some(key), Some(owner)) = (key, self.owner.upgrade()) {
            owner.cancel(key);
        }
    }
}

/// Handle to a running autorun.
///
/// Cloning an `Autorun` creates another handle to the **same** autorun.
#[derive(Clone)]
pub struct Autorun {
    shared: Arc<AutorunShared>,
}

impl Autorun {
    pub fn state(&self) -> AutorunState {
        *self.shared.state.lock()
    }

    /// Stop re-running and release the current subscriptions.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == AutorunState::Disposed
    }

    /// How many times the handler has run.
    pub fn run_count(&self) -> usize {
        self.shared.run_count.load(Ordering::Relaxed)
    }

    /// Distinct properties read by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.shared.dependency_count.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Autorun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Autorun")
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Run `handler` now and again whenever anything it read changes, until
/// `owner` terminates or the autorun is disposed.
///
/// If `owner` is already terminated, the handler never runs.
pub fn autorun<O, S, G, F>(owner: &O, set_emitter: S, get_emitter: G, handler: F) -> Autorun
where
    O: Lifetimed + ?Sized,
    S: PropertySetEmitter + 'static,
    G: PropertyGetEmitter + 'static,
    F: Fn() + Send + Sync + 'static,
{
    let shared = Arc::new(AutorunShared {
        handler: Box::new(handler),
        set_emitter: Box::new(set_emitter),
        get_emitter: Box::new(get_emitter),
        runs: SequentialLifetimes::new(&owner.lifetime().nested()),
        owner: owner.lifetime().downgrade(),
        owner_cleanup: Mutex::new(None),
        state: Mutex::new(AutorunState::Idle),
        run_count: AtomicUsize::new(0),
        dependency_count: AtomicUsize::new(0),
    });

    let disposer = Arc::clone(&shared);
    let key = owner.lifetime().when_terminated(move || disposer.dispose());
    *shared.owner_cleanup.lock() = key;

    shared.schedule();
    Autorun { shared }
}
