//! Dependency Observers
//!
//! This module implements the registries that connect reads and writes of
//! observable state to the code that depends on it.
//!
//! # Overview
//!
//! - The **get observer** receives an event for every read. Capture windows
//!   use it to discover which properties an expression depends on.
//! - The **set observer** maps each property identity to the handlers
//!   subscribed to its writes and notifies them when it is written.
//! - The **transactional set emitter** sits on top of a set observer and
//!   batches notifications so each handler fires once per transaction.
//!
//! Every subscription is scoped by a [`Lifetime`](crate::lifetime::Lifetime):
//! it is removed when the lifetime terminates, and a property whose last
//! subscriber leaves is pruned from its registry.
//!
//! # Design Decisions
//!
//! 1. Registries are explicit, constructible objects. A process-wide default
//!    set lives in [`Runtime::global`](crate::reactive::Runtime::global), and
//!    tests build isolated ones.
//!
//! 2. Properties are identified by an integer [`PropertyId`], never by value
//!    or structural equality.
//!
//! 3. No registry lock is held while a handler runs. Handler lists are
//!    snapshotted first, so handlers may subscribe and unsubscribe freely
//!    during emission.

mod get;
mod property;
mod set;
mod transaction;

pub use get::{get_expression_dependencies, GetObserver, PropertyGetEmitter, PropertyGetObserver};
pub use property::PropertyId;
pub use set::{PropertySetEmitter, PropertySetObserver, SetObserver};
pub use transaction::TransactionalSetEmitter;
