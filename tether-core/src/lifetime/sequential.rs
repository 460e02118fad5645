//! A lifetime slot for work that re-executes.

use std::fmt;

use parking_lot::Mutex;

use super::{Lifetime, Lifetimed};

/// Owns at most one live child of a long-lived lifetime.
///
/// Each call to [`next`](Self::next) terminates the previous child, releasing
/// everything registered during the previous run, and returns a fresh one.
/// Terminating the owning lifetime terminates the current child as well.
pub struct SequentialLifetimes {
    lifetime: Lifetime,
    current: Mutex<Option<Lifetime>>,
}

impl SequentialLifetimes {
    pub fn new(lifetime: &Lifetime) -> Self {
        Self {
            lifetime: lifetime.clone(),
            current: Mutex::new(None),
        }
    }

    /// Terminate the current child (if any) and start the next one.
    pub fn next(&self) -> Lifetime {
        self.terminate_current();

        let next = self.lifetime.nested();
        *self.current.lock() = Some(next.clone());
        next
    }

    /// The live child, if there is one.
    pub fn current(&self) -> Option<Lifetime> {
        self.current
            .lock()
            .as_ref()
            .filter(|lifetime| !lifetime.is_terminated())
            .cloned()
    }

    /// Terminate the current child without starting a new one.
    pub fn terminate_current(&self) {
        // Taken out of the slot first, so cleanups may call `next`.
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.terminate();
        }
    }
}

impl Lifetimed for SequentialLifetimes {
    fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }
}

impl fmt::Debug for SequentialLifetimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialLifetimes")
            .field("lifetime", &self.lifetime)
            .field("current", &self.current())
            .finish()
    }
}
