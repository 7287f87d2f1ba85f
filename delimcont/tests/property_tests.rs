//! Property-based tests for the delimited-continuation runloops.
//!
//! Uses proptest to generate random inputs and verify invariants hold.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use delimcont::{
    reset, reset_multi_shot, reset_nested, Continuation, DelimContScope, DelimitedScope,
    LocalBoxFuture, MultiShotDelimContScope, NestedDelimContScope,
};
use proptest::prelude::*;

/// Handler that tries both answers of a boolean choice and concatenates
/// the results.
fn both(k: Continuation<bool, Vec<Vec<bool>>>) -> LocalBoxFuture<Vec<Vec<bool>>> {
    Box::pin(async move {
        let mut paths = k.invoke(true).await;
        paths.extend(k.invoke(false).await);
        paths
    })
}

proptest! {
    /// Invoking the continuation with `v` makes the shift evaluate to `v`
    #[test]
    fn round_trip_single(v in any::<i64>()) {
        let result = reset(move |scope: DelimContScope<i64>| async move {
            let x: i64 = scope.shift(move |k| async move { k.invoke(v).await }).await;
            x
        });
        prop_assert_eq!(result, v);
    }

    /// Round trip holds for every variant
    #[test]
    fn round_trip_all_variants(v in any::<i32>()) {
        let multi = reset_multi_shot(move |scope: MultiShotDelimContScope<i32>| async move {
            let x: i32 = scope.shift(move |k| async move { k.invoke(v).await }).await;
            x
        });
        let nested = reset_nested(move |scope: NestedDelimContScope<i32>| async move {
            let x: i32 = scope.shift(move |k| async move { k.invoke(v).await }).await;
            x
        });
        prop_assert_eq!(multi, v);
        prop_assert_eq!(nested, v);
    }

    /// A handler that never invokes its continuation decides the result
    #[test]
    fn short_circuit(c in any::<i32>(), offset in any::<i32>()) {
        let after_shift = Rc::new(Cell::new(false));
        let seen = after_shift.clone();
        let result = reset(move |scope: DelimContScope<i32>| async move {
            let x: i32 = scope.shift(move |_k| async move { c }).await;
            seen.set(true);
            x.wrapping_add(offset)
        });
        prop_assert_eq!(result, c);
        prop_assert!(!after_shift.get());
    }

    /// Handlers finish in reverse order of their shifts
    #[test]
    fn reverse_order_resumption(n in 1usize..40) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let body_log = log.clone();
        let count = reset(move |scope: DelimContScope<usize>| async move {
            let mut count = 0;
            for i in 0..n {
                let log = body_log.clone();
                let x: usize = scope
                    .shift(move |k| async move {
                        let r = k.invoke(i).await;
                        log.borrow_mut().push(i);
                        r
                    })
                    .await;
                count += usize::from(x == i);
            }
            count
        });
        prop_assert_eq!(count, n);
        let expected: Vec<usize> = (0..n).rev().collect();
        prop_assert_eq!(log.borrow().clone(), expected);
    }

    /// Reusing a multi-shot continuation replays the body once per extra call
    #[test]
    fn multi_shot_replay_counts(args in prop::collection::vec(any::<i16>(), 1..6)) {
        let runs = Rc::new(Cell::new(0usize));
        let counter = runs.clone();
        let inputs = args.clone();
        let results = reset_multi_shot(move |scope: MultiShotDelimContScope<Vec<i16>>| {
            let counter = counter.clone();
            let inputs = inputs.clone();
            async move {
                counter.set(counter.get() + 1);
                let x: i16 = scope
                    .shift(move |k| async move {
                        let mut results = Vec::new();
                        for a in inputs {
                            results.extend(k.invoke(a).await);
                        }
                        results
                    })
                    .await;
                vec![x]
            }
        });
        prop_assert_eq!(runs.get(), args.len());
        prop_assert_eq!(results, args);
    }

    /// Every combination of choices is explored exactly once, in order
    #[test]
    fn multi_shot_enumerates_choices(n in 0usize..5) {
        let paths = reset_multi_shot(move |scope: MultiShotDelimContScope<Vec<Vec<bool>>>| async move {
            let mut path = Vec::new();
            for _ in 0..n {
                let choice: bool = scope.shift(both).await;
                path.push(choice);
            }
            vec![path]
        });
        prop_assert_eq!(paths.len(), 1 << n);
        prop_assert!(paths.iter().all(|path| path.len() == n));
        for (i, path) in paths.iter().enumerate() {
            let index = path.iter().fold(0usize, |acc, &choice| (acc << 1) | usize::from(!choice));
            prop_assert_eq!(index, i);
        }
    }

    /// Outer shifts inside inner resets resume through the inner block
    #[test]
    fn nested_outer_shift(a in -1000i32..1000, b in -1000i32..1000) {
        let result = reset_nested(move |outer: NestedDelimContScope<i32>| async move {
            let shifted = outer.clone();
            let y: i32 = outer
                .reset(move |_inner: NestedDelimContScope<i32>| {
                    let shifted = shifted.clone();
                    async move {
                        let x: i32 = shifted.shift(move |k| async move { k.invoke(a).await * 2 }).await;
                        x + b
                    }
                })
                .await;
            y + 10
        });
        prop_assert_eq!(result, (a + b + 10) * 2);
    }

    /// Outer short-circuit abandons the inner block
    #[test]
    fn nested_outer_short_circuit(c in any::<i32>()) {
        let result = reset_nested(move |outer: NestedDelimContScope<i32>| async move {
            let shifted = outer.clone();
            let y: i32 = outer
                .reset(move |_inner: NestedDelimContScope<i32>| {
                    let shifted = shifted.clone();
                    async move {
                        let x: i32 = shifted.shift(move |_k| async move { c }).await;
                        x.wrapping_mul(3)
                    }
                })
                .await;
            y.wrapping_add(1)
        });
        prop_assert_eq!(result, c);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Long chains of shifts run in constant stack depth
    #[test]
    fn many_shifts_are_stack_safe(n in 1000u64..5000) {
        let total = reset(move |scope: DelimContScope<u64>| async move {
            let mut total = 0u64;
            for i in 0..n {
                let x: u64 = scope.shift(move |k| async move { k.invoke(i).await }).await;
                total += x;
            }
            total
        });
        prop_assert_eq!(total, n * (n - 1) / 2);
    }
}
