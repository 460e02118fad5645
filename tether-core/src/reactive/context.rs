//! Capture Context
//!
//! A capture window records every property read while an expression runs.
//! This is how computed values and reactions discover their dependencies:
//! by executing the expression once and recording what it touches.
//!
//! # Implementation
//!
//! We use a thread-local stack of capture frames. Opening a
//! [`CaptureWindow`] pushes a frame; dropping or finishing it pops the frame.
//! A read emitted on a get observer is recorded only in the innermost frame
//! opened for that same observer, so nested windows (a computed evaluated
//! while another computed is evaluating) each see only their own reads.
//!
//! Frames are tagged with the observer that opened them, which keeps
//! isolated runtimes from recording into each other's windows.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

use crate::observer::PropertyId;

/// Distinct properties read during a capture window, in first-read order.
pub type DependencySet = IndexSet<PropertyId>;

/// Identifies the get observer a capture frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowId(u64);

impl WindowId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    static CAPTURE_STACK: RefCell<Vec<CaptureFrame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
struct CaptureFrame {
    window: WindowId,
    observer: ObserverId,
    dependencies: DependencySet,
}

/// Guard for an open capture window.
///
/// The window closes when the guard is finished or dropped, which keeps the
/// stack balanced even if the expression panics. The guard is tied to the
/// thread that opened it.
#[must_use = "a capture window records nothing useful unless it is finished"]
pub struct CaptureWindow {
    window: WindowId,
    observer: ObserverId,
    open: bool,
    _not_send: PhantomData<*const ()>,
}

impl CaptureWindow {
    /// Open a window recording reads emitted on `observer`.
    pub fn enter(observer: ObserverId) -> Self {
        let window = WindowId::new();
        CAPTURE_STACK.with(|stack| {
            stack.borrow_mut().push(CaptureFrame {
                window,
                observer,
                dependencies: DependencySet::new(),
            });
        });
        tracing::trace!(window = window.0, "capture window opened");

        Self {
            window,
            observer,
            open: true,
            _not_send: PhantomData,
        }
    }

    /// Close the window and return what it recorded.
    pub fn finish(mut self) -> DependencySet {
        self.close()
    }

    /// The observer this window records for.
    pub fn observer(&self) -> ObserverId {
        self.observer
    }

    fn close(&mut self) -> DependencySet {
        if !self.open {
            return DependencySet::new();
        }
        self.open = false;

        let popped = CAPTURE_STACK.with(|stack| stack.borrow_mut().pop());
        match popped {
            Some(frame) => {
                // Windows close in LIFO order; a mismatch is a bug in the core.
                debug_assert_eq!(
                    frame.window, self.window,
                    "CaptureWindow mismatch: expected {:?}, got {:?}",
                    self.window, frame.window
                );
                tracing::trace!(
                    window = self.window.0,
                    dependencies = frame.dependencies.len(),
                    "capture window closed"
                );
                frame.dependencies
            }
            None => DependencySet::new(),
        }
    }

    /// Record a read in the innermost window opened for `observer`.
    ///
    /// Returns `false` if no such window is open.
    pub fn record(observer: ObserverId, property: PropertyId) -> bool {
        CAPTURE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.iter_mut().rev().find(|frame| frame.observer == observer) {
                Some(frame) => {
                    frame.dependencies.insert(property);
                    true
                }
                None => false,
            }
        })
    }

    /// Whether a window is open for `observer` on this thread.
    pub fn is_active(observer: ObserverId) -> bool {
        CAPTURE_STACK.with(|stack| stack.borrow().iter().any(|frame| frame.observer == observer))
    }

    /// Number of open windows on this thread.
    pub fn depth() -> usize {
        CAPTURE_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for CaptureWindow {
    fn drop(&mut self) {
        self.close();
    }
}
