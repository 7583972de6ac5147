//! Batching Span Processor
//!
//! Sits between span-producing application threads and a downstream span
//! exporter, amortizing export cost into bounded batches while bounding
//! memory, keeping a periodic export cadence, and supporting synchronous
//! force-flush and orderly shutdown.
//!
//! Built on [`batchring`]'s lock-free bounded MPSC ring: producers hand off
//! finished spans in nanoseconds and never block, while a single background
//! worker claims whole batches and drives the exporter, either synchronously
//! or through a bounded pool of concurrent asynchronous exports.
//!
//! # Example
//!
//! ```
//! use span_batcher::{BatchConfig, BatchSpanProcessor, InMemorySpanExporter};
//! use std::time::Duration;
//!
//! let exporter = InMemorySpanExporter::new();
//! let received = exporter.data();
//!
//! let processor = BatchSpanProcessor::new(exporter, BatchConfig::default());
//!
//! let mut span = processor.make_recordable();
//! span.name = "checkout".to_string();
//! processor.on_end(span);
//!
//! assert!(processor.force_flush(Duration::from_secs(5)));
//! assert_eq!(received.span_count(), 1);
//!
//! processor.shutdown(Duration::from_secs(5));
//! ```

pub mod config;
pub mod exporter;
mod permits;
pub mod processor;
pub mod span;
pub mod tokio_export;

pub use config::BatchConfig;
pub use exporter::{
    CompletionCallback, ExportError, ExportResult, InMemorySpanData, InMemorySpanExporter,
    NullExporter, SpanExporter, StdoutExporter,
};
pub use processor::{BatchSpanProcessor, ProcessorMetrics};
pub use span::{AttributeValue, SpanContext, SpanData, SpanKind, SpanStatus};
pub use tokio_export::{AsyncSpanExporter, TokioExporter};
