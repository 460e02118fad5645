//! Errors and handler panic isolation.
//!
//! Handlers run by the core (lifetime cleanups, get/set listeners,
//! transaction flushes) are user code. A panicking handler must never stop
//! the remaining handlers of the same batch from running, and it must never
//! leave a registry half-updated. Every batch therefore runs through a
//! [`PanicSink`]: each handler is isolated with `catch_unwind`, failures are
//! logged, and the first payload is resumed on the caller once the whole
//! batch is done.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::observer::PropertyId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors surfaced by the reactive core.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// One or more handlers panicked while a batch was running.
    #[error("{failed} handler(s) panicked during {phase}: {message}")]
    HandlerPanicked {
        phase: Phase,
        failed: usize,
        /// Message of the first panic.
        message: String,
    },

    /// A computed value was read while its own expression was evaluating.
    #[error("computed {property} was read while evaluating itself")]
    CyclicComputed { property: PropertyId },

    /// Transactions were nested deeper than the configured limit.
    #[error("transaction nesting exceeded the limit of {limit}")]
    TransactionDepthExceeded { limit: usize },

    #[error("invalid runtime config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse runtime config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// `Runtime::init_global` was called after the global runtime existed.
    #[error("the global runtime is already initialized")]
    GlobalAlreadyInitialized,
}

/// The kind of batch a handler was running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Termination,
    GetEmission,
    SetEmission,
    TransactionFlush,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Termination => "lifetime termination",
            Phase::GetEmission => "get emission",
            Phase::SetEmission => "set emission",
            Phase::TransactionFlush => "transaction flush",
        };
        f.write_str(name)
    }
}

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Collects panics from a batch of handlers.
pub(crate) struct PanicSink {
    phase: Phase,
    failed: usize,
    first: Option<PanicPayload>,
}

impl PanicSink {
    pub(crate) fn new(phase: Phase) -> Self {
        Self {
            phase,
            failed: 0,
            first: None,
        }
    }

    /// Run one handler, catching a panic if it raises one.
    pub(crate) fn run<F: FnOnce()>(&mut self, handler: F) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(handler)) {
            self.failed += 1;
            tracing::warn!(
                phase = %self.phase,
                message = panic_message(payload.as_ref()),
                "handler panicked"
            );
            if self.first.is_none() {
                self.first = Some(payload);
            }
        }
    }

    /// Resume the first caught panic, if any.
    pub(crate) fn finish(self) {
        if let Some(payload) = self.first {
            panic::resume_unwind(payload);
        }
    }

    /// Convert the caught panics into an error instead of unwinding.
    pub(crate) fn into_result(self) -> Result<()> {
        match self.first {
            None => Ok(()),
            Some(payload) => Err(ReactiveError::HandlerPanicked {
                phase: self.phase,
                failed: self.failed,
                message: panic_message(payload.as_ref()).to_owned(),
            }),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
