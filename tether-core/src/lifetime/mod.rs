//! Lifetimes
//!
//! A [`Lifetime`] is a cancellation scope. Anything that must be undone when a
//! unit of work ends (a subscription, a nested scope, a cached dependency set)
//! registers a cleanup callback on the lifetime that owns it. Terminating the
//! lifetime runs those callbacks exactly once, in registration order.
//!
//! Lifetimes form a tree: [`Lifetime::nested`] creates a child that is
//! terminated together with its parent, depth-first in spawn order.
//! Terminating a child on its own leaves the parent untouched.
//!
//! # Termination contract
//!
//! - Termination is monotonic and idempotent. Calling [`Lifetime::terminate`]
//!   a second time is a no-op.
//! - The lifetime is marked terminated *before* its callbacks run, so a
//!   callback observing [`Lifetime::is_terminated`] sees `true`, and a
//!   callback re-entering `terminate` does nothing.
//! - Registering a callback on an already-terminated lifetime invokes it
//!   immediately on the caller's stack. Nothing registered late is ever
//!   silently dropped.
//! - A panicking callback does not stop the remaining callbacks. The first
//!   panic is resumed after all of them ran (or returned as an error by
//!   [`Lifetime::try_terminate`]).

mod sequential;

pub use sequential::SequentialLifetimes;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{PanicSink, Phase, Result};

/// Unique identifier for a lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LifetimeId(u64);

impl LifetimeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Key of a registered cleanup callback, used to withdraw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupKey(u64);

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

struct LifetimeState {
    terminated: bool,
    next_key: u64,
    cleanups: Vec<(CleanupKey, Cleanup)>,
}

struct LifetimeInner {
    id: LifetimeId,
    state: Mutex<LifetimeState>,
}

/// A node in the cancellation tree.
///
/// Cloning a `Lifetime` creates another handle to the **same** scope.
#[derive(Clone)]
pub struct Lifetime {
    inner: Arc<LifetimeInner>,
}

impl Lifetime {
    /// Create a new, live root lifetime.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LifetimeInner {
                id: LifetimeId::next(),
                state: Mutex::new(LifetimeState {
                    terminated: false,
                    next_key: 0,
                    cleanups: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> LifetimeId {
        self.inner.id
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    /// Register a cleanup callback.
    ///
    /// Returns the key to [`cancel`](Self::cancel) it with, or `None` if the
    /// lifetime was already terminated and the callback ran immediately.
    pub fn when_terminated<F>(&self, handler: F) -> Option<CleanupKey>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if !state.terminated {
                let key = CleanupKey(state.next_key);
                state.next_key += 1;
                state.cleanups.push((key, Box::new(handler)));
                return Some(key);
            }
        }

        tracing::trace!(lifetime = self.id().raw(), "cleanup registered after termination, running now");
        handler();
        None
    }

    /// Register a cleanup callback that is never withdrawn.
    pub fn on_terminate<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.when_terminated(handler);
    }

    /// Withdraw a cleanup callback that has not run yet.
    ///
    /// Returns `false` if the key is unknown or its callback already ran.
    pub fn cancel(&self, key: CleanupKey) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.cleanups.len();
        state.cleanups.retain(|(k, _)| *k != key);
        state.cleanups.len() != before
    }

    /// Terminate the lifetime, resuming the first cleanup panic if any.
    pub fn terminate(&self) {
        self.run_cleanups().finish();
    }

    /// Terminate the lifetime, reporting cleanup panics as an error instead
    /// of unwinding.
    pub fn try_terminate(&self) -> Result<()> {
        self.run_cleanups().into_result()
    }

    fn run_cleanups(&self) -> PanicSink {
        let mut sink = PanicSink::new(Phase::Termination);

        let cleanups = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return sink;
            }
            state.terminated = true;
            std::mem::take(&mut state.cleanups)
        };

        tracing::debug!(
            lifetime = self.id().raw(),
            cleanups = cleanups.len(),
            "terminating lifetime"
        );

        for (_, cleanup) in cleanups {
            sink.run(cleanup);
        }
        sink
    }

    /// Create a child lifetime terminated together with this one.
    ///
    /// If this lifetime is already terminated the child is returned
    /// terminated. A child terminated first withdraws itself from the parent.
    pub fn nested(&self) -> Lifetime {
        let child = Lifetime::new();
        let strong = child.clone();

        if let Some(key) = self.when_terminated(move || strong.terminate()) {
            let parent = self.downgrade();
            child.on_terminate(move || {
                if let Some(parent) = parent.upgrade() {
                    parent.cancel(key);
                }
            });
        }

        child
    }

    /// Create a handle that does not keep the lifetime alive.
    pub fn downgrade(&self) -> WeakLifetime {
        WeakLifetime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of cleanup callbacks still pending.
    pub fn pending_cleanups(&self) -> usize {
        self.inner.state.lock().cleanups.len()
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Lifetime {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Lifetime {}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &self.id())
            .field("terminated", &self.is_terminated())
            .field("pending_cleanups", &self.pending_cleanups())
            .finish()
    }
}

/// Non-owning handle to a [`Lifetime`].
#[derive(Clone)]
pub struct WeakLifetime {
    inner: Weak<LifetimeInner>,
}

impl WeakLifetime {
    pub fn upgrade(&self) -> Option<Lifetime> {
        self.inner.upgrade().map(|inner| Lifetime { inner })
    }

    /// `true` if the lifetime is terminated or no longer exists.
    pub fn is_terminated(&self) -> bool {
        self.upgrade().map_or(true, |lifetime| lifetime.is_terminated())
    }
}

impl fmt::Debug for WeakLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakLifetime")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Something that owns a lifetime.
///
/// Reactions and autoruns take their owner as `&impl Lifetimed` and live in
/// a child of the owner's lifetime.
pub trait Lifetimed {
    fn lifetime(&self) -> &Lifetime;
}

impl Lifetimed for Lifetime {
    fn lifetime(&self) -> &Lifetime {
        self
    }
}

/// Run `block` with a fresh lifetime and terminate it when the block
/// returns, including when it panics.
///
/// A panic from `block` takes precedence over panics raised by cleanups.
pub fn lifetimed<T, F>(block: F) -> T
where
    F: FnOnce(&Lifetime) -> T,
{
    let lifetime = Lifetime::new();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| block(&lifetime)));
    let cleanup = lifetime.run_cleanups();

    match outcome {
        Ok(value) => {
            cleanup.finish();
            value
        }
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
