//! Bridge between the processor's callback-based export contract and
//! future-returning exporters running on a Tokio runtime.

use crate::exporter::{CompletionCallback, ExportError, ExportResult, SpanExporter};
use std::future::Future;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// A span exporter whose export and shutdown paths are async.
///
/// Uses native async-fn-in-trait (Rust 2024); implementers write `async fn`
/// and the `Send` bound on the returned futures lets them run on any
/// runtime thread.
pub trait AsyncSpanExporter: Send + Sync + 'static {
    /// The opaque payload this exporter produces and consumes.
    type Recordable: Send + 'static;

    /// Returns a fresh, empty recordable. Infallible.
    fn make_recordable(&self) -> Self::Recordable;

    /// Exports a batch of recordables.
    fn export(
        &self,
        batch: Vec<Self::Recordable>,
    ) -> impl Future<Output = ExportResult> + Send;

    /// Shuts the exporter down. Idempotent.
    fn shutdown(&self, timeout: Duration) -> impl Future<Output = ExportResult> + Send;

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Adapts an [`AsyncSpanExporter`] to the blocking [`SpanExporter`]
/// contract by dispatching its futures onto a runtime handle.
///
/// `export_async` spawns the export and completes the callback from the
/// task, so a processor in async mode gets truly concurrent exports bounded
/// by its permit pool. The synchronous paths dispatch the same way and
/// block on a channel for the result.
pub struct TokioExporter<E> {
    inner: Arc<E>,
    handle: Handle,
}

impl<E: AsyncSpanExporter> TokioExporter<E> {
    /// Wraps `inner`, running its futures on `handle`.
    pub fn new(inner: E, handle: Handle) -> Self {
        Self {
            inner: Arc::new(inner),
            handle,
        }
    }
}

impl<E: AsyncSpanExporter> SpanExporter for TokioExporter<E> {
    type Recordable = E::Recordable;

    fn make_recordable(&self) -> E::Recordable {
        self.inner.make_recordable()
    }

    fn export(&self, batch: Vec<E::Recordable>) -> ExportResult {
        let (tx, rx) = mpsc::channel();
        self.export_async(
            batch,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv().unwrap_or(Err(ExportError::Cancelled))
    }

    fn export_async(&self, batch: Vec<E::Recordable>, done: CompletionCallback) {
        let inner = Arc::clone(&self.inner);
        self.handle.spawn(async move {
            done(inner.export(batch).await);
        });
    }

    fn shutdown(&self, timeout: Duration) -> ExportResult {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        self.handle.spawn(async move {
            let _ = tx.send(inner.shutdown(timeout).await);
        });

        if timeout.is_zero() {
            rx.recv().unwrap_or(Err(ExportError::Cancelled))
        } else {
            match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => Err(ExportError::Timeout),
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExportError::Cancelled),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
