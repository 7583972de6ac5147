use crate::invariants::{
    debug_assert_bounded_count, debug_assert_head_not_past_tail, debug_assert_monotonic,
};
use crate::{Config, Metrics};
use std::fmt;
use std::ptr;
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use thiserror::Error;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This MPSC ring buffer shares one slot array between any number of producers
// and exactly one consumer.
//
// ## Sequence Numbers (ABA Prevention)
//
// `head` and `tail` are unbounded u64 sequence numbers rather than wrapped
// indices; the physical slot index is `sequence & mask`. With 2^64 values,
// wrap-around is practically impossible, so a stale sequence can never be
// mistaken for a fresh one.
//
// ## Slot Protocol
//
// Each slot holds an atomically swapped heap pointer. A slot is empty (null)
// or owns exactly one entry. Transfer of ownership always goes through an
// atomic swap, so no entry can be observed by two parties.
//
// **Producer (push path):**
// 1. Load `tail` (Relaxed; it is re-validated by the CAS in step 4)
// 2. Load `head` with Acquire; reject if `tail - head >= capacity`
// 3. Install the pointer into slot `tail & mask` via CAS against null
//    (Release publishes the pointee)
// 4. Publish by CAS-advancing `tail` (Release). On failure the sequence was
//    lost to a race: reclaim the pointer from the slot and retry.
//
// An occupied slot in step 3 means another producer holds the same sequence
// or an unpublished install is being rolled back; spin and re-read `tail`.
//
// **Consumer (claim path):**
// 1. Load `head` (Relaxed; only the consumer writes head)
// 2. Load `tail` with Acquire (synchronizes with the producers' publishes)
// 3. Swap each claimed slot back to null (Acquire), taking ownership
// 4. Release the whole range with a single Release store to `head`
//
// Each tail CAS reads the previous producer's Release store, so the chain of
// publishes forms a release sequence: an Acquire load of `tail` makes every
// slot below it visible and non-null.
//
// =============================================================================

/// Error returned when the ring is full. Carries the rejected value so the
/// caller keeps ownership.
#[derive(Error)]
#[error("ring buffer is full")]
pub struct RingFull<T>(pub T);

impl<T> fmt::Debug for RingFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RingFull(..)")
    }
}

/// A slot owning at most one heap-allocated entry.
struct Slot<T> {
    ptr: AtomicPtr<T>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Install an owned entry into an empty slot. On failure the slot was
    /// occupied and ownership returns to the caller.
    fn install(&self, value: Box<T>) -> Result<(), Box<T>> {
        let raw = Box::into_raw(value);
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), raw, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            // SAFETY: `raw` came from Box::into_raw above and was not
            // installed, so we are still its sole owner.
            Err(_) => Err(unsafe { Box::from_raw(raw) }),
        }
    }

    /// Swap the slot back to empty, taking ownership of the entry if any.
    fn take(&self) -> Option<Box<T>> {
        let raw = self.ptr.swap(ptr::null_mut(), Ordering::Acquire);
        if raw.is_null() {
            None
        } else {
            // SAFETY: a non-null slot pointer always originates from
            // Box::into_raw in install(), and the swap above made this
            // thread its sole owner.
            Some(unsafe { Box::from_raw(raw) })
        }
    }
}

/// Bounded MPSC ring buffer of owned entries.
///
/// Any number of producers may call [`push`](Ring::push) concurrently; at
/// most one thread may act as the consumer at a time (enforced in debug
/// builds). Per-producer FIFO order is preserved: entries pushed by one
/// thread are claimed in the order they were pushed.
#[repr(C)]
pub struct Ring<T> {
    // === PRODUCER HOT === (128-byte aligned)
    /// Next sequence to be claimed by a producer (advanced via CAS).
    tail: CacheAligned<AtomicU64>,

    // === CONSUMER HOT === (128-byte aligned)
    /// Next sequence to be consumed (written only by the consumer).
    head: CacheAligned<AtomicU64>,
    /// Guards the single-consumer contract in debug builds.
    #[cfg(debug_assertions)]
    consuming: AtomicBool,

    // === COLD STATE ===
    metrics: Metrics,
    config: Config,

    /// Fixed-size slot array; length is `config.slot_count()`.
    slots: Box<[Slot<T>]>,
}

// Safety: entries are transferred by value through atomically swapped
// pointers, so sharing the ring only requires the entry type to be Send.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates a new ring buffer with the given configuration.
    pub fn new(config: Config) -> Self {
        let slots: Vec<Slot<T>> = (0..config.slot_count()).map(|_| Slot::empty()).collect();

        Self {
            tail: CacheAligned::new(AtomicU64::new(0)),
            head: CacheAligned::new(AtomicU64::new(0)),
            #[cfg(debug_assertions)]
            consuming: AtomicBool::new(false),
            metrics: Metrics::new(),
            config,
            slots: slots.into_boxed_slice(),
        }
    }

    /// Returns the admission bound of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    /// Returns the number of admitted-but-unclaimed entries.
    ///
    /// Publishes acquire on both sequence counters, so a reader observing
    /// `len() > 0` also observes the entries behind it.
    #[inline]
    pub fn len(&self) -> usize {
        // head first: tail read afterwards can only be >= the head we saw,
        // so the subtraction cannot underflow.
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    /// Returns true if no entries are waiting to be claimed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempt to admit an entry. On success the ring owns the value; if the
    /// ring is full, ownership returns to the caller and nothing blocks.
    pub fn push(&self, value: T) -> Result<(), RingFull<T>> {
        let mut boxed = Box::new(value);
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let head = self.head.load(Ordering::Acquire);

            // A racing head can make this count overshoot, never undershoot:
            // the CAS below re-validates `tail`, so admission past capacity
            // is impossible.
            if tail.wrapping_sub(head) as usize >= self.config.capacity() {
                if self.config.enable_metrics {
                    self.metrics.add_rejected(1);
                }
                return Err(RingFull(*boxed));
            }

            let idx = (tail as usize) & self.mask();
            match self.slots[idx].install(boxed) {
                Ok(()) => {
                    match self.tail.compare_exchange(
                        tail,
                        tail.wrapping_add(1),
                        Ordering::Release,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            if self.config.enable_metrics {
                                self.metrics.add_pushed(1);
                            }
                            return Ok(());
                        }
                        Err(_) => {
                            // Lost the sequence race: the slot was recycled
                            // under us and another producer advanced tail.
                            // Reclaim our entry and retry with a fresh tail.
                            match self.slots[idx].take() {
                                Some(reclaimed) => boxed = reclaimed,
                                // Nothing else can empty an unpublished slot.
                                None => unreachable!("unpublished slot was emptied"),
                            }
                        }
                    }
                }
                Err(returned) => {
                    // Slot still owned by a concurrent install; wait for its
                    // producer to publish or roll back.
                    boxed = returned;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Claim up to `max` entries as one contiguous run, transferring
    /// ownership of each to the handler, then release the run with a single
    /// `head` update. Returns the number of entries claimed.
    ///
    /// Only one thread may consume at a time.
    pub fn consume_up_to<F>(&self, max: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        if max == 0 {
            return 0;
        }

        #[cfg(debug_assertions)]
        {
            let was_consuming = self.consuming.swap(true, Ordering::AcqRel);
            debug_assert!(!was_consuming, "second consumer entered the claim path");
        }

        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let avail = tail.wrapping_sub(head) as usize;
        debug_assert_bounded_count!(avail, self.config.capacity());

        let to_claim = avail.min(max);
        for i in 0..to_claim {
            let seq = head.wrapping_add(i as u64);
            let idx = (seq as usize) & self.mask();
            match self.slots[idx].take() {
                Some(entry) => handler(*entry),
                // Every sequence below an Acquire-loaded tail has a
                // published entry behind it.
                None => unreachable!("claimed slot below tail was empty"),
            }
        }

        let new_head = head.wrapping_add(to_claim as u64);
        debug_assert_monotonic!("head", head, new_head);
        debug_assert_head_not_past_tail!(new_head, tail);
        self.head.store(new_head, Ordering::Release);

        #[cfg(debug_assertions)]
        self.consuming.store(false, Ordering::Release);

        if self.config.enable_metrics && to_claim > 0 {
            self.metrics.add_claimed(to_claim as u64);
            self.metrics.add_batches_claimed(1);
        }

        to_claim
    }

    /// Get a snapshot of metrics if enabled.
    pub fn metrics(&self) -> crate::MetricsSnapshot {
        if self.config.enable_metrics {
            self.metrics.snapshot()
        } else {
            crate::MetricsSnapshot::default()
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Reclaim every entry still owned by the ring, including any
        // unpublished install left behind by a producer that never finished.
        for slot in self.slots.iter() {
            drop(slot.take());
        }
    }
}

impl<T> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------
// HELPER: 128-byte cache-aligned wrapper
// ---------------------------------------------------------------------

/// Wrapper type that ensures 128-byte alignment to prevent prefetcher-induced
/// false sharing on Intel/AMD CPUs (which may prefetch adjacent cache lines).
#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_claim_round_trip() {
        let ring = Ring::new(Config::new(16, false));

        for i in 0..5u64 {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.len(), 5);

        let mut out = Vec::new();
        let claimed = ring.consume_up_to(16, |item| out.push(item));

        assert_eq!(claimed, 5);
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn full_ring_rejects_and_returns_ownership() {
        let ring = Ring::new(Config::new(4, false));

        for i in 0..4 {
            ring.push(format!("span-{i}")).unwrap();
        }

        let rejected = ring.push("overflow".to_string()).unwrap_err();
        assert_eq!(rejected.0, "overflow");
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn claim_is_bounded_by_request() {
        let ring = Ring::new(Config::new(16, false));
        for i in 0..10u64 {
            ring.push(i).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(ring.consume_up_to(4, |item| out.push(item)), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(ring.len(), 6);

        out.clear();
        assert_eq!(ring.consume_up_to(100, |item| out.push(item)), 6);
        assert_eq!(out, vec![4, 5, 6, 7, 8, 9]);
        assert!(ring.is_empty());
    }

    #[test]
    fn wrap_around_reuses_slots() {
        let ring = Ring::new(Config::new(4, false));

        for round in 0..10u64 {
            for i in 0..4 {
                ring.push(round * 4 + i).unwrap();
            }
            let mut out = Vec::new();
            ring.consume_up_to(4, |item| out.push(item));
            assert_eq!(out, vec![round * 4, round * 4 + 1, round * 4 + 2, round * 4 + 3]);
        }
    }

    #[test]
    fn non_power_of_two_capacity_is_exact() {
        let ring = Ring::new(Config::new(6, false));
        for i in 0..6u64 {
            ring.push(i).unwrap();
        }
        assert!(ring.push(6).is_err());
        assert_eq!(ring.len(), 6);
    }

    #[test]
    fn metrics_track_traffic() {
        let ring = Ring::new(Config::new(2, true));
        ring.push(1u64).unwrap();
        ring.push(2u64).unwrap();
        assert!(ring.push(3u64).is_err());
        ring.consume_up_to(8, |_| {});

        let snapshot = ring.metrics();
        assert_eq!(snapshot.pushed, 2);
        assert_eq!(snapshot.claimed, 2);
        assert_eq!(snapshot.batches_claimed, 1);
        assert_eq!(snapshot.rejected, 1);
    }

    #[test]
    fn drop_reclaims_unclaimed_entries() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropTracker {
            _id: u64,
        }

        impl Drop for DropTracker {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROP_COUNT.store(0, Ordering::SeqCst);

        {
            let ring = Ring::new(Config::new(8, false));
            for i in 0..5 {
                ring.push(DropTracker { _id: i }).unwrap();
            }
            // Claim two; the handler drops them immediately.
            ring.consume_up_to(2, |_| {});
            assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 2);
        }

        // The remaining three are reclaimed when the ring drops.
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 5);
    }
}
