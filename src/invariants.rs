//! Debug assertion macros for ring buffer invariants.
//!
//! These checks are only active in debug builds, so there is zero overhead
//! in release builds.

/// Assert that the in-flight entry count does not exceed capacity.
///
/// Invariant: `0 <= (tail - head) <= capacity`
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "bounded-count violated: {} entries in flight exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that a sequence number only increases.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "monotonic progress violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that the consumer does not release entries past the published tail.
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head <= $tail,
            "claim-range violated: releasing head {} beyond tail {}",
            $new_head,
            $tail
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_head_not_past_tail;
pub(crate) use debug_assert_monotonic;
