use crate::span::SpanData;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Error types for span export operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer error (network, gRPC, HTTP)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The exporter refused the batch because it was already shut down.
    #[error("exporter is already shut down")]
    AlreadyShutdown,
    /// Export operation timed out
    #[error("export operation timed out")]
    Timeout,
    /// The export was abandoned before a result was produced.
    #[error("export was cancelled before completion")]
    Cancelled,
}

/// Outcome of an export or shutdown call.
pub type ExportResult = Result<(), ExportError>;

/// Invoked exactly once when an asynchronous export settles. May be called
/// from any thread the exporter chooses.
pub type CompletionCallback = Box<dyn FnOnce(ExportResult) + Send>;

/// Destination for finished span batches.
///
/// The exporter is also the factory for the payload it consumes: the
/// processor obtains empty recordables from [`make_recordable`], hands them
/// to the application to fill, and returns them here in batches. The
/// processor never inspects a recordable.
///
/// [`make_recordable`]: SpanExporter::make_recordable
pub trait SpanExporter: Send + Sync + 'static {
    /// The opaque payload this exporter produces and consumes.
    type Recordable: Send + 'static;

    /// Returns a fresh, empty recordable. Infallible.
    fn make_recordable(&self) -> Self::Recordable;

    /// Exports a batch of recordables synchronously.
    fn export(&self, batch: Vec<Self::Recordable>) -> ExportResult;

    /// Exports a batch asynchronously, invoking `done` exactly once when the
    /// result is known.
    ///
    /// The default implementation has no native asynchronous support and
    /// falls back to the synchronous path, completing before it returns.
    fn export_async(&self, batch: Vec<Self::Recordable>, done: CompletionCallback) {
        done(self.export(batch));
    }

    /// Shuts the exporter down. Idempotent; batches offered afterwards are
    /// refused.
    fn shutdown(&self, timeout: Duration) -> ExportResult;

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Shared handle to the spans recorded by an [`InMemorySpanExporter`].
///
/// Batch boundaries are preserved so callers can assert on how spans were
/// grouped, not just how many arrived. The handle outlives the exporter,
/// which is typically consumed by a processor.
#[derive(Debug, Default)]
pub struct InMemorySpanData {
    batches: Mutex<Vec<Vec<SpanData>>>,
    shutdown_calls: AtomicUsize,
}

impl InMemorySpanData {
    /// How many times the owning exporter's `shutdown` has been invoked.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::Relaxed)
    }

    /// All recorded spans, flattened in arrival order.
    pub fn spans(&self) -> Vec<SpanData> {
        self.lock_batches().iter().flatten().cloned().collect()
    }

    /// The size of each recorded batch, in arrival order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock_batches().iter().map(Vec::len).collect()
    }

    /// Number of spans recorded so far.
    pub fn span_count(&self) -> usize {
        self.lock_batches().iter().map(Vec::len).sum()
    }

    /// Discard everything recorded so far.
    pub fn reset(&self) {
        self.lock_batches().clear();
    }

    fn lock_batches(&self) -> std::sync::MutexGuard<'_, Vec<Vec<SpanData>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, batch: Vec<SpanData>) {
        self.lock_batches().push(batch);
    }
}

/// An in-memory exporter that keeps every received batch, for tests and
/// local inspection.
#[derive(Debug, Default)]
pub struct InMemorySpanExporter {
    data: Arc<InMemorySpanData>,
    is_shutdown: AtomicBool,
}

impl InMemorySpanExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a shared handle to the recorded spans. The handle stays valid
    /// after the exporter itself is consumed by a processor.
    pub fn data(&self) -> Arc<InMemorySpanData> {
        Arc::clone(&self.data)
    }
}

impl SpanExporter for InMemorySpanExporter {
    type Recordable = SpanData;

    fn make_recordable(&self) -> SpanData {
        SpanData::default()
    }

    fn export(&self, batch: Vec<SpanData>) -> ExportResult {
        if self.is_shutdown.load(Ordering::Acquire) {
            warn!(
                batch = batch.len(),
                "in-memory exporter refused batch after shutdown"
            );
            return Err(ExportError::AlreadyShutdown);
        }
        self.data.record(batch);
        Ok(())
    }

    fn shutdown(&self, _timeout: Duration) -> ExportResult {
        self.data.shutdown_calls.fetch_add(1, Ordering::Relaxed);
        self.is_shutdown.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

/// Stdout exporter for local debugging
#[derive(Debug)]
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    /// Creates a new stdout exporter
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SpanExporter for StdoutExporter {
    type Recordable = SpanData;

    fn make_recordable(&self) -> SpanData {
        SpanData::default()
    }

    fn export(&self, batch: Vec<SpanData>) -> ExportResult {
        if self.verbose {
            println!("=== Exporting {} spans ===", batch.len());
            for span in &batch {
                println!(
                    "Span: trace_id={:032x} span_id={:016x} name={} duration={}ns status={:?}",
                    span.trace_id,
                    span.span_id,
                    span.name,
                    span.duration_nanos(),
                    span.status
                );
            }
            println!("=== Export complete ===\n");
        }
        Ok(())
    }

    fn shutdown(&self, _timeout: Duration) -> ExportResult {
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Null exporter that discards all batches (for benchmarking)
pub struct NullExporter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> NullExporter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for NullExporter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + Send + 'static> SpanExporter for NullExporter<T> {
    type Recordable = T;

    fn make_recordable(&self) -> T {
        T::default()
    }

    fn export(&self, _batch: Vec<T>) -> ExportResult {
        Ok(())
    }

    fn shutdown(&self, _timeout: Duration) -> ExportResult {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
