use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for monitoring ring traffic.
///
/// Uses atomic counters with `Relaxed` ordering since these are purely
/// statistical - no control flow depends on exact values, and eventual
/// visibility is acceptable for observability.
#[derive(Debug, Default)]
pub struct Metrics {
    pushed: AtomicU64,
    claimed: AtomicU64,
    batches_claimed: AtomicU64,
    rejected: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the count of entries admitted by producers.
    #[inline]
    pub fn add_pushed(&self, n: u64) {
        self.pushed.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment the count of entries moved out by the consumer.
    #[inline]
    pub fn add_claimed(&self, n: u64) {
        self.claimed.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment the count of claim operations.
    #[inline]
    pub fn add_batches_claimed(&self, n: u64) {
        self.batches_claimed.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment the count of entries rejected because the ring was full.
    #[inline]
    pub fn add_rejected(&self, n: u64) {
        self.rejected.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot of current metrics values.
    ///
    /// Returns a plain struct with `u64` values that can be copied and compared.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            batches_claimed: self.batches_claimed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of metrics values.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub pushed: u64,
    pub claimed: u64,
    pub batches_claimed: u64,
    pub rejected: u64,
}
