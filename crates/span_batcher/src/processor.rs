//! Batching span processor.
//!
//! Finished spans flow from any number of application threads into a bounded
//! lock-free ring. A dedicated background worker drains the ring on a timed
//! cadence, in batches, and hands each batch to the exporter. Callers can
//! force a full drain ([`BatchSpanProcessor::force_flush`]) or tear the whole
//! pipeline down ([`BatchSpanProcessor::shutdown`]); both block with a
//! timeout while producers never do.

use crate::config::BatchConfig;
use crate::exporter::{CompletionCallback, SpanExporter};
use crate::permits::ExportPermits;
use crate::span::SpanContext;
use batchring::{Config as RingConfig, Ring};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Counters published by the processor.
///
/// Uses atomic counters with `Relaxed` ordering since these are purely
/// statistical - no control flow depends on exact values, and eventual
/// visibility is acceptable for observability.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    spans_dropped: AtomicU64,
    spans_exported: AtomicU64,
    batches_exported: AtomicU64,
    export_failures: AtomicU64,
}

impl ProcessorMetrics {
    /// Spans dropped at admission (queue full or processor shut down) or for
    /// want of an async export slot.
    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    /// Spans successfully handed to the exporter.
    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    /// Batches successfully handed to the exporter.
    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    /// Export calls that returned an error.
    pub fn export_failures(&self) -> u64 {
        self.export_failures.load(Ordering::Relaxed)
    }

    fn add_dropped(&self, n: u64) {
        self.spans_dropped.fetch_add(n, Ordering::Relaxed);
    }

    fn add_exported(&self, n: u64) {
        self.spans_exported.fetch_add(n, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn add_export_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Flags and wait points shared between producers, the worker, flushers and
/// shutdown callers.
///
/// Reference-counted so that a late asynchronous export callback can hold a
/// weak handle and discover the processor is gone instead of touching freed
/// state.
#[derive(Debug, Default)]
struct SynchronizationData {
    /// Monotonic false -> true.
    is_shutdown: AtomicBool,
    /// Set by a flusher; cleared by the worker the moment it decides the
    /// next batch will honor the flush.
    is_force_flush_pending: AtomicBool,
    /// Set by the worker once a flush-honoring cycle completed; cleared by
    /// the flusher on its way out.
    is_force_flush_notified: AtomicBool,
    /// Distinguishes a demand wakeup from a timer wakeup.
    is_force_wakeup_background_worker: AtomicBool,

    worker_m: Mutex<()>,
    worker_cv: Condvar,
    flush_m: Mutex<()>,
    flush_cv: Condvar,
    /// Serializes shutdown with itself.
    shutdown_m: Mutex<()>,
}

impl SynchronizationData {
    /// Signal the worker condition variable. Taking the mutex first orders
    /// this signal against a worker that is between checking its condition
    /// and going to sleep.
    fn notify_worker(&self) {
        drop(self.worker_m.lock().unwrap_or_else(PoisonError::into_inner));
        self.worker_cv.notify_one();
    }

    fn notify_flushers(&self) {
        drop(self.flush_m.lock().unwrap_or_else(PoisonError::into_inner));
        self.flush_cv.notify_all();
    }

    /// Mark an export cycle complete. Wakes flushers when the cycle honored
    /// a flush request, and permit waiters whenever the pool is in play.
    fn complete_export_cycle(&self, honoring_flush: bool, permits: Option<&ExportPermits>) {
        if honoring_flush {
            self.is_force_flush_notified.store(true, Ordering::Release);
            self.notify_flushers();
        }
        if let Some(permits) = permits {
            permits.notify_waiters();
        }
    }
}

/// Batching span processor.
///
/// Created with an exclusively owned exporter; construction spawns the
/// background worker. Dropping the processor runs [`shutdown`] if the caller
/// has not.
///
/// [`shutdown`]: BatchSpanProcessor::shutdown
pub struct BatchSpanProcessor<E: SpanExporter> {
    exporter: Arc<E>,
    buffer: Arc<Ring<E::Recordable>>,
    sync: Arc<SynchronizationData>,
    permits: Option<Arc<ExportPermits>>,
    metrics: Arc<ProcessorMetrics>,
    config: BatchConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: SpanExporter> BatchSpanProcessor<E> {
    /// Creates the processor and spawns its background worker.
    pub fn new(exporter: E, config: BatchConfig) -> Self {
        let config = config.normalized();
        let exporter = Arc::new(exporter);
        let buffer = Arc::new(Ring::new(RingConfig::new(config.max_queue_size, false)));
        let sync = Arc::new(SynchronizationData::default());
        let permits = config
            .async_export_enabled
            .then(|| Arc::new(ExportPermits::new(config.max_in_flight)));
        let metrics = Arc::new(ProcessorMetrics::default());

        let worker = BackgroundWorker {
            exporter: Arc::clone(&exporter),
            buffer: Arc::clone(&buffer),
            sync: Arc::clone(&sync),
            permits: permits.clone(),
            metrics: Arc::clone(&metrics),
            config: config.clone(),
        };
        let handle = thread::Builder::new()
            .name("span-batcher-worker".to_string())
            .spawn(move || worker.run());
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(error = %err, "failed to spawn batch export worker");
                None
            }
        };

        Self {
            exporter,
            buffer,
            sync,
            permits,
            metrics,
            config,
            worker: Mutex::new(handle),
        }
    }

    /// Returns a fresh recordable from the exporter's factory.
    pub fn make_recordable(&self) -> E::Recordable {
        self.exporter.make_recordable()
    }

    /// Called when a span starts. Batching happens on end, so this is a
    /// no-op.
    pub fn on_start(&self, _recordable: &mut E::Recordable, _parent: &SpanContext) {}

    /// Accepts a finished span. Never blocks and never fails observably:
    /// after shutdown, or when the buffer is full, the span is dropped and
    /// only the metrics record it.
    pub fn on_end(&self, span: E::Recordable) {
        if self.sync.is_shutdown.load(Ordering::Acquire) {
            self.metrics.add_dropped(1);
            return;
        }

        if self.buffer.push(span).is_err() {
            self.metrics.add_dropped(1);
            return;
        }

        // Once the queue is half full (or holds a full batch) the worker is
        // nudged instead of waiting out its timer.
        let buffered = self.buffer.len();
        if buffered >= self.config.max_queue_size / 2
            || buffered >= self.config.max_export_batch_size
        {
            self.sync.notify_worker();
        }
    }

    /// Block until every span admitted before this call has been handed to
    /// the exporter, or until `timeout` elapses. A zero `timeout` waits
    /// indefinitely. Returns false on timeout or if already shut down.
    pub fn force_flush(&self, timeout: Duration) -> bool {
        if self.sync.is_shutdown.load(Ordering::Acquire) {
            return false;
        }

        let sync = &*self.sync;
        let mut guard = sync.flush_m.lock().unwrap_or_else(PoisonError::into_inner);
        sync.is_force_flush_pending.store(true, Ordering::Release);

        // Condition checked under the flush mutex on every wakeup. While the
        // request is still pending the worker gets re-kicked, covering the
        // window where it was mid-wait when the request landed.
        let still_waiting = |_: &mut ()| {
            if sync.is_shutdown.load(Ordering::Acquire) {
                return false;
            }
            if sync.is_force_flush_pending.load(Ordering::Acquire) {
                sync.is_force_wakeup_background_worker
                    .store(true, Ordering::Release);
                sync.notify_worker();
            }
            !sync.is_force_flush_notified.load(Ordering::Acquire)
        };

        let result = if timeout.is_zero() {
            // Bounded steps instead of one open-ended wait: the completion
            // store and notify can land between the pending check and the
            // wait, and the next step picks it up.
            loop {
                let (returned, wait_result) = sync
                    .flush_cv
                    .wait_timeout_while(guard, self.config.schedule_delay, still_waiting)
                    .unwrap_or_else(PoisonError::into_inner);
                guard = returned;
                if !wait_result.timed_out() {
                    break;
                }
            }
            true
        } else {
            let (returned, wait_result) = sync
                .flush_cv
                .wait_timeout_while(guard, timeout, still_waiting)
                .unwrap_or_else(PoisonError::into_inner);
            guard = returned;
            !wait_result.timed_out()
        };
        drop(guard);

        // If the pending flag is already gone, the worker owns the request
        // and its completion signal is at most one export call away.
        if !sync.is_force_flush_pending.swap(false, Ordering::AcqRel) {
            let mut retries = 0u32;
            while !sync.is_force_flush_notified.load(Ordering::Acquire) {
                std::hint::spin_loop();
                retries = retries.wrapping_add(1);
                if retries & 127 == 127 {
                    thread::yield_now();
                }
            }
        }
        sync.is_force_flush_notified.store(false, Ordering::Release);

        result
    }

    /// Orderly termination: wake and join the worker (which drains the
    /// buffer), wait out in-flight asynchronous exports, then shut the
    /// exporter down. Idempotent; only the first call reaches the exporter.
    /// A zero `timeout` waits indefinitely.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let _shutdown_guard = self
            .sync
            .shutdown_m
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let already_shutdown = self.sync.is_shutdown.swap(true, Ordering::AcqRel);

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.sync
                .is_force_wakeup_background_worker
                .store(true, Ordering::Release);
            self.sync.notify_worker();
            if handle.join().is_err() {
                error!("batch export worker panicked");
            }
        }

        if let Some(permits) = &self.permits {
            if !permits.wait_idle(remaining_after(timeout, start)) {
                warn!("asynchronous exports still in flight at shutdown timeout");
            }
        }

        if already_shutdown {
            return true;
        }
        match self.exporter.shutdown(remaining_after(timeout, start)) {
            Ok(()) => true,
            Err(err) => {
                warn!(exporter = self.exporter.name(), error = %err, "exporter shutdown failed");
                false
            }
        }
    }

    /// Returns the processor's counters.
    pub fn metrics(&self) -> &Arc<ProcessorMetrics> {
        &self.metrics
    }
}

impl<E: SpanExporter> Drop for BatchSpanProcessor<E> {
    fn drop(&mut self) {
        if !self.sync.is_shutdown.load(Ordering::Acquire) {
            self.shutdown(Duration::ZERO);
        }
    }
}

impl<E: SpanExporter> std::fmt::Debug for BatchSpanProcessor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// State owned by the background thread.
struct BackgroundWorker<E: SpanExporter> {
    exporter: Arc<E>,
    buffer: Arc<Ring<E::Recordable>>,
    sync: Arc<SynchronizationData>,
    permits: Option<Arc<ExportPermits>>,
    metrics: Arc<ProcessorMetrics>,
    config: BatchConfig,
}

impl<E: SpanExporter> BackgroundWorker<E> {
    fn run(self) {
        let mut timeout = self.config.schedule_delay;
        loop {
            {
                let guard = self
                    .sync
                    .worker_m
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // Sleep until a demand wakeup, buffered work, or the timer.
                let _ = self
                    .sync
                    .worker_cv
                    .wait_timeout_while(guard, timeout, |_| {
                        !self
                            .sync
                            .is_force_wakeup_background_worker
                            .load(Ordering::Acquire)
                            && self.buffer.is_empty()
                    })
                    .unwrap_or_else(PoisonError::into_inner);
            }
            self.sync
                .is_force_wakeup_background_worker
                .store(false, Ordering::Release);

            if self.sync.is_shutdown.load(Ordering::Acquire) {
                self.drain_queue();
                return;
            }

            let start = Instant::now();
            self.export();
            let elapsed = start.elapsed();

            // Keep the cadence steady: the time spent exporting comes out of
            // the next sleep, but the sleep never collapses to zero.
            timeout = self.config.schedule_delay.saturating_sub(elapsed);
            if timeout.is_zero() {
                timeout = Duration::from_micros(1);
            }
        }
    }

    /// One export pass: drain the buffer batch by batch until nothing
    /// remains to claim.
    fn export(&self) {
        loop {
            let honoring_flush = self
                .sync
                .is_force_flush_pending
                .swap(false, Ordering::AcqRel);

            let buffered = self.buffer.len();
            let batch_len = if honoring_flush {
                buffered
            } else {
                buffered.min(self.config.max_export_batch_size)
            };

            if batch_len == 0 {
                self.sync
                    .complete_export_cycle(honoring_flush, self.permits.as_deref());
                return;
            }

            let mut batch = Vec::with_capacity(batch_len);
            self.buffer.consume_up_to(batch_len, |span| batch.push(span));

            match &self.permits {
                None => self.dispatch_sync(batch, honoring_flush),
                Some(permits) => self.dispatch_async(batch, honoring_flush, permits),
            }
        }
    }

    fn dispatch_sync(&self, batch: Vec<E::Recordable>, honoring_flush: bool) {
        let len = batch.len();
        match self.exporter.export(batch) {
            Ok(()) => self.metrics.add_exported(len as u64),
            Err(err) => {
                self.metrics.add_export_failure();
                warn!(exporter = self.exporter.name(), batch = len, error = %err, "span export failed");
            }
        }
        self.sync.complete_export_cycle(honoring_flush, None);
    }

    fn dispatch_async(
        &self,
        batch: Vec<E::Recordable>,
        honoring_flush: bool,
        permits: &Arc<ExportPermits>,
    ) {
        let Some(id) = permits.acquire(self.config.schedule_delay) else {
            // No export slot freed up within a whole schedule interval. The
            // batch is dropped rather than re-queued, and completion is
            // still signalled so a flusher is not stranded behind a stuck
            // exporter.
            self.metrics.add_dropped(batch.len() as u64);
            warn!(
                exporter = self.exporter.name(),
                dropped = batch.len(),
                "no async export slot available, dropping batch"
            );
            self.sync
                .complete_export_cycle(honoring_flush, Some(permits));
            return;
        };

        let len = batch.len();
        let sync = Arc::downgrade(&self.sync);
        let pool = Arc::downgrade(permits);
        let metrics = Arc::downgrade(&self.metrics);
        let done: CompletionCallback = Box::new(move |result| {
            // The callback may fire after the processor is gone; both
            // handles must still be alive before touching anything.
            let (Some(sync), Some(pool)) = (sync.upgrade(), pool.upgrade()) else {
                return;
            };
            if let Some(metrics) = metrics.upgrade() {
                match &result {
                    Ok(()) => metrics.add_exported(len as u64),
                    Err(err) => {
                        metrics.add_export_failure();
                        warn!(batch = len, error = %err, "asynchronous span export failed");
                    }
                }
            }
            pool.release(id);
            sync.complete_export_cycle(honoring_flush, Some(&pool));
        });

        self.exporter.export_async(batch, done);
    }

    /// Shutdown path: keep exporting while spans remain buffered or a flush
    /// request arrived late.
    fn drain_queue(&self) {
        while !self.buffer.is_empty()
            || self
                .sync
                .is_force_flush_pending
                .load(Ordering::Acquire)
        {
            self.export();
        }
    }
}

/// Time left of `timeout` after `start`, floored at 1 microsecond so a
/// downstream wait still yields, and preserving zero as "no deadline".
fn remaining_after(timeout: Duration, start: Instant) -> Duration {
    if timeout.is_zero() {
        return Duration::ZERO;
    }
    let elapsed = start.elapsed();
    if timeout > elapsed {
        timeout - elapsed
    } else {
        Duration::from_micros(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::InMemorySpanExporter;
    use crate::span::{SpanData, SpanKind};

    fn span(seq: u64) -> SpanData {
        SpanData::new(1, seq, 0, format!("op-{seq}"), SpanKind::Internal)
    }

    #[test]
    fn drop_runs_shutdown_once() {
        let exporter = InMemorySpanExporter::new();
        let data = exporter.data();

        {
            let processor = BatchSpanProcessor::new(exporter, BatchConfig::default());
            for seq in 0..5 {
                processor.on_end(span(seq));
            }
        }

        assert_eq!(data.span_count(), 5);
    }

    #[test]
    fn on_end_after_shutdown_drops_silently() {
        let exporter = InMemorySpanExporter::new();
        let data = exporter.data();
        let processor = BatchSpanProcessor::new(exporter, BatchConfig::default());

        assert!(processor.shutdown(Duration::from_secs(5)));
        processor.on_end(span(1));

        assert_eq!(data.span_count(), 0);
        assert_eq!(processor.metrics().spans_dropped(), 1);
        assert!(!processor.force_flush(Duration::from_millis(50)));
    }

    #[test]
    fn remaining_after_preserves_indefinite_and_floors() {
        let start = Instant::now();
        assert_eq!(remaining_after(Duration::ZERO, start), Duration::ZERO);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            remaining_after(Duration::from_millis(5), start),
            Duration::from_micros(1)
        );
    }
}
