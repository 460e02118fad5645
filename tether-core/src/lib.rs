//! Tether Core
//!
//! This crate provides a fine-grained reactive state runtime. It implements:
//!
//! - Lifetimes that scope subscriptions and cleanups
//! - Get and set observers that intercept reads and writes of properties
//! - Transactions that batch notifications
//! - Observable cells, computed values, reactions and autoruns
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `lifetime`: Termination scopes and sequential child lifetimes
//! - `observer`: Dependency observers and the transactional set emitter
//! - `reactive`: Reactive primitives built on the observers
//! - `config`: Runtime configuration
//! - `error`: The crate error type
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! use tether_core::lifetime::Lifetime;
//! use tether_core::reactive::Runtime;
//!
//! let runtime = Runtime::new();
//! let owner = Lifetime::new();
//!
//! let count = runtime.observable(0);
//! let source = count.clone();
//! let doubled = runtime.computed(&owner, move || source.get() * 2);
//!
//! let seen = Arc::new(AtomicI32::new(0));
//! let (log, value) = (seen.clone(), doubled.clone());
//! runtime.autorun(&owner, move || log.store(value.get(), Ordering::SeqCst));
//!
//! count.set(5);
//! assert_eq!(seen.load(Ordering::SeqCst), 10);
//!
//! owner.terminate();
//! count.set(6);
//! assert_eq!(seen.load(Ordering::SeqCst), 10);
//! ```

pub mod config;
pub mod error;
pub mod lifetime;
pub mod observer;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use lifetime::{lifetimed, Lifetime, Lifetimed, SequentialLifetimes};
pub use reactive::{
    action, autorun, computed, observable, once, reaction, reaction_to, Autorun, Computed,
    Observable, ReactionOptions, Runtime,
};
