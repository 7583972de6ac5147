//! Property-based tests checking the ring against a plain queue model.
//!
//! Operations are applied to a `Ring` and a `VecDeque` side by side; after
//! any sequence of pushes and claims, both must agree on contents, order,
//! and occupancy, and the ring must never exceed its capacity.

use batchring::{Config, Ring};
use proptest::prelude::*;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
enum Op {
    Push(u64),
    Claim(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u64>().prop_map(Op::Push),
        (0usize..12).prop_map(Op::Claim),
    ]
}

proptest! {
    #[test]
    fn ring_matches_queue_model(
        capacity in 1usize..10,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let ring = Ring::new(Config::new(capacity, false));
        let mut model: VecDeque<u64> = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(value) => {
                    let admitted = ring.push(value).is_ok();
                    if model.len() < capacity {
                        prop_assert!(admitted, "ring rejected below capacity");
                        model.push_back(value);
                    } else {
                        prop_assert!(!admitted, "ring admitted past capacity");
                    }
                }
                Op::Claim(max) => {
                    let mut claimed = Vec::new();
                    let n = ring.consume_up_to(max, |item| claimed.push(item));
                    prop_assert_eq!(n, claimed.len());
                    prop_assert_eq!(n, max.min(model.len()));
                    for item in claimed {
                        prop_assert_eq!(Some(item), model.pop_front());
                    }
                }
            }

            prop_assert!(ring.len() <= capacity);
            prop_assert_eq!(ring.len(), model.len());
            prop_assert_eq!(ring.is_empty(), model.is_empty());
        }

        // Whatever remains drains in model order.
        let mut rest = Vec::new();
        ring.consume_up_to(capacity, |item| rest.push(item));
        prop_assert_eq!(rest, model.into_iter().collect::<Vec<_>>());
    }
}
