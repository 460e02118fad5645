//! Reactions
//!
//! A reaction runs a side-effecting handler when its dependencies change.
//! Dependencies come either from a [`ReactionDependency`] source or from the
//! reads of an expression captured once up front.
//!
//! Every reaction lives in a lifetime nested under its owner's. The nested
//! lifetime is returned, so a reaction can be stopped on its own or together
//! with everything else the owner holds.

use std::fmt;

use super::context::DependencySet;
use super::subscriber::Handler;
use crate::lifetime::{Lifetime, Lifetimed};
use crate::observer::{
    get_expression_dependencies, PropertyGetEmitter, PropertySetEmitter, TransactionalSetEmitter,
};

/// Something that can notify a handler when it changes.
pub trait ReactionDependency {
    /// Arrange for `handler` to run on every change until `lifetime`
    /// terminates.
    fn on_change(&self, lifetime: &Lifetime, handler: Handler);
}

/// A fixed set of properties watched through a set emitter.
pub struct DependencySubscription<'a> {
    emitter: &'a dyn PropertySetEmitter,
    dependencies: DependencySet,
}

impl<'a> DependencySubscription<'a> {
    pub fn new(emitter: &'a dyn PropertySetEmitter, dependencies: DependencySet) -> Self {
        Self {
            emitter,
            dependencies,
        }
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }
}

impl ReactionDependency for DependencySubscription<'_> {
    fn on_change(&self, lifetime: &Lifetime, handler: Handler) {
        for property in &self.dependencies {
            self.emitter.on_set_value(lifetime, *property, handler.clone());
        }
    }
}

impl fmt::Debug for DependencySubscription<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencySubscription")
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// How a reaction behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReactionOptions {
    /// Run the handler once right away, before any change.
    pub initial_reaction: bool,
    /// Stop after the first change.
    pub once: bool,
}

impl ReactionOptions {
    pub const DEFAULT: Self = Self {
        initial_reaction: false,
        once: false,
    };

    pub const ONCE: Self = Self {
        initial_reaction: false,
        once: true,
    };

    pub fn with_initial_reaction(mut self) -> Self {
        self.initial_reaction = true;
        self
    }
}

/// Run `handler` whenever `dependency` changes, for as long as both the
/// owner and the returned lifetime are live.
///
/// With [`ReactionOptions::once`], the returned lifetime is terminated
/// *before* the handler runs, so a handler that re-triggers its own
/// dependency does not fire a second time.
pub fn reaction<O, D, F>(owner: &O, dependency: &D, options: ReactionOptions, handler: F) -> Lifetime
where
    O: Lifetimed + ?Sized,
    D: ReactionDependency + ?Sized,
    F: Fn() + Send + Sync + 'static,
{
    if options.initial_reaction {
        handler();
    }

    let nested = owner.lifetime().nested();
    let scope = nested.downgrade();
    let on_change = Handler::new(move || {
        let Some(scope) = scope.upgrade() else {
            return;
        };
        if scope.is_terminated() {
            return;
        }
        if options.once {
            scope.terminate();
        }
        handler();
    });

    dependency.on_change(&nested, on_change);
    nested
}

/// Run `expression` once, then run `handler` whenever anything it read
/// changes. Returns the expression's result.
///
/// Dependencies are captured only on this first run; the handler's own
/// reads are not tracked.
pub fn reaction_to<O, T, E, F>(
    owner: &O,
    expression: E,
    set_emitter: &dyn PropertySetEmitter,
    get_emitter: &dyn PropertyGetEmitter,
    options: ReactionOptions,
    handler: F,
) -> T
where
    O: Lifetimed + ?Sized,
    E: FnOnce() -> T,
    F: Fn() + Send + Sync + 'static,
{
    let (dependencies, result) = get_expression_dependencies(get_emitter, expression);
    tracing::trace!(dependencies = dependencies.len(), "reaction subscribed");

    let subscription = DependencySubscription::new(set_emitter, dependencies);
    reaction(owner, &subscription, options, handler);
    result
}

/// [`reaction_to`] that fires at most once.
pub fn once<O, T, E, F>(
    owner: &O,
    expression: E,
    set_emitter: &dyn PropertySetEmitter,
    get_emitter: &dyn PropertyGetEmitter,
    handler: F,
) -> T
where
    O: Lifetimed + ?Sized,
    E: FnOnce() -> T,
    F: Fn() + Send + Sync + 'static,
{
    reaction_to(
        owner,
        expression,
        set_emitter,
        get_emitter,
        ReactionOptions::ONCE,
        handler,
    )
}

/// Run `handler` as a transaction on `emitter`.
pub fn action<R, F>(emitter: &TransactionalSetEmitter, handler: F) -> R
where
    F: FnOnce() -> R,
{
    emitter.transaction(handler)
}
