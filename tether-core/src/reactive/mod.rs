//! Reactive Primitives
//!
//! This module implements the user-facing reactive layer on top of the
//! observers: observable cells, computed values, reactions and autoruns.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An [`Observable`] is a container for mutable state. Reading it inside a
//! capture window records it as a dependency. Writing a new value notifies
//! everything subscribed to it.
//!
//! ## Computed Values
//!
//! A [`Computed`] is a derived value that caches its result. It evaluates
//! lazily on read and is invalidated as soon as a dependency is written.
//!
//! ## Reactions and Autoruns
//!
//! A reaction runs a handler when the dependencies of an expression change.
//! An [`Autorun`] is a reaction whose handler is also its expression, so its
//! dependencies are rediscovered on every run.
//!
//! ## Actions
//!
//! Writes made inside an action are batched: each reaction fires once when
//! the outermost action ends, however many of its dependencies changed.
//!
//! # Implementation Notes
//!
//! Dependency discovery uses a thread-local stack of capture frames (see
//! [`CaptureWindow`]). Every subscription is scoped by a
//! [`Lifetime`](crate::lifetime::Lifetime) nested under its owner.

mod autorun;
mod computed;
mod context;
mod observable;
mod reaction;
mod runtime;
mod scope;
mod subscriber;

pub use autorun::{autorun, Autorun, AutorunState};
pub use computed::{computed, CachedResult, Computed};
pub use context::{CaptureWindow, DependencySet, ObserverId};
pub use observable::{observable, Observable};
pub use reaction::{
    action, once, reaction, reaction_to, DependencySubscription, ReactionDependency,
    ReactionOptions,
};
pub use runtime::Runtime;
pub use scope::TrackedScope;
pub use subscriber::{GetHandler, Handler, HandlerId};
