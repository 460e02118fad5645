//! Property-Based Tests for the Reactive Runtime
//!
//! ## Properties Verified
//!
//! - Termination runs every cleanup exactly once, however often it is called
//! - A reaction fires once per value-changing write outside a transaction
//! - A reaction fires at most once per transaction
//! - A computed value always agrees with its expression over current state
//! - An autorun runs once initially plus once per change

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use tether_core::lifetime::Lifetime;
use tether_core::reactive::{ReactionOptions, Runtime};

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (count, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

// ============================================================================
// Lifetime Properties
// ============================================================================

proptest! {
    /// Property: every cleanup in a lifetime tree runs exactly once
    #[test]
    fn prop_cleanups_run_once(
        shape in prop::collection::vec(0usize..8, 1..24),
        terminations in 1usize..4
    ) {
        let root = Lifetime::new();
        let mut nodes = vec![root.clone()];
        let count = Arc::new(AtomicUsize::new(0));

        // Each entry picks the parent of the next node among those so far.
        for pick in &shape {
            let parent = nodes[pick % nodes.len()].clone();
            let child = parent.nested();
            let c = count.clone();
            child.on_terminate(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            nodes.push(child);
        }

        for _ in 0..terminations {
            root.terminate();
        }

        prop_assert_eq!(count.load(Ordering::SeqCst), shape.len());
        prop_assert!(nodes.iter().all(Lifetime::is_terminated));
    }
}

// ============================================================================
// Notification Properties
// ============================================================================

proptest! {
    /// Property: outside transactions, one notification per changing write
    #[test]
    fn prop_one_notification_per_changing_write(
        writes in prop::collection::vec(0i32..4, 0..32)
    ) {
        let runtime = Runtime::new();
        let owner = Lifetime::new();
        let cell = runtime.observable(0);
        let (count, handler) = counter();

        let source = cell.clone();
        runtime.reaction(&owner, move || source.get(), ReactionOptions::DEFAULT, handler);

        let mut current = 0;
        let mut expected = 0;
        for value in writes {
            if value != current {
                expected += 1;
                current = value;
            }
            cell.set(value);
        }

        prop_assert_eq!(count.load(Ordering::SeqCst), expected);
    }

    /// Property: a transaction notifies a shared reaction at most once
    #[test]
    fn prop_transaction_notifies_at_most_once(
        writes in prop::collection::vec((0usize..4, 0i32..3), 0..24)
    ) {
        let runtime = Runtime::new();
        let owner = Lifetime::new();
        let cells: Vec<_> = (0..4).map(|_| runtime.observable(0)).collect();
        let (count, handler) = counter();

        let sources = cells.clone();
        runtime.reaction(
            &owner,
            move || sources.iter().map(|cell| cell.get()).sum::<i32>(),
            ReactionOptions::DEFAULT,
            handler,
        );

        let changed = runtime.action(|| {
            let mut changed = false;
            for (index, value) in &writes {
                changed |= cells[*index].set(*value);
            }
            changed
        });

        prop_assert_eq!(count.load(Ordering::SeqCst), usize::from(changed));
    }
}

// ============================================================================
// Derivation Properties
// ============================================================================

proptest! {
    /// Property: a computed value agrees with its expression, and evaluates
    /// at most once per invalidation
    #[test]
    fn prop_computed_agrees_with_expression(
        steps in prop::collection::vec(prop::option::of(-50i64..50), 1..32)
    ) {
        let runtime = Runtime::new();
        let lifetime = Lifetime::new();
        let a = runtime.observable(1i64);
        let b = runtime.observable(2i64);

        let (x, y) = (a.clone(), b.clone());
        let product = runtime.computed(&lifetime, move || x.get() * y.get());

        let mut reads = 0;
        for (i, step) in steps.iter().enumerate() {
            match step {
                Some(value) if i % 2 == 0 => { a.set(*value); }
                Some(value) => { b.set(*value); }
                None => {
                    reads += 1;
                    prop_assert_eq!(product.get(), a.get_untracked() * b.get_untracked());
                }
            }
        }

        prop_assert!(product.evaluation_count() <= reads);
    }

    /// Property: an autorun runs N + 1 times for N changing writes
    #[test]
    fn prop_autorun_runs_per_change(
        writes in prop::collection::vec(0u8..3, 0..24)
    ) {
        let runtime = Runtime::new();
        let owner = Lifetime::new();
        let cell = runtime.observable(0u8);

        let source = cell.clone();
        let run = runtime.autorun(&owner, move || {
            source.get();
        });

        let changes = writes.iter().filter(|value| cell.set(**value)).count();
        prop_assert_eq!(run.run_count(), changes + 1);

        owner.terminate();
        cell.set(cell.get_untracked().wrapping_add(1));
        prop_assert_eq!(run.run_count(), changes + 1);
    }
}
