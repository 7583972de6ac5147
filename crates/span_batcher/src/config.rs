use std::time::Duration;

/// Configuration for the batching span processor.
///
/// All fields are fixed once the processor is constructed.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of finished spans buffered before new ones are
    /// dropped.
    pub max_queue_size: usize,
    /// Maximum time between export cycles.
    pub schedule_delay: Duration,
    /// Upper bound on spans handed to the exporter per call. Flush-honoring
    /// cycles may exceed it, since they drain the whole buffer.
    pub max_export_batch_size: usize,
    /// Dispatch batches through the exporter's asynchronous path, bounded by
    /// `max_in_flight` concurrent exports.
    pub async_export_enabled: bool,
    /// Ceiling on concurrent asynchronous exports. Ignored unless
    /// `async_export_enabled` is set.
    pub max_in_flight: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            schedule_delay: Duration::from_secs(5),
            max_export_batch_size: 512,
            async_export_enabled: false,
            max_in_flight: 8,
        }
    }
}

impl BatchConfig {
    /// Clamp the settings into a usable shape: the batch bound cannot exceed
    /// the queue bound, and sizes must be non-zero.
    pub(crate) fn normalized(mut self) -> Self {
        self.max_queue_size = self.max_queue_size.max(1);
        self.max_export_batch_size = self.max_export_batch_size.clamp(1, self.max_queue_size);
        self.max_in_flight = self.max_in_flight.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_queue_size, 2048);
        assert_eq!(config.schedule_delay, Duration::from_secs(5));
        assert_eq!(config.max_export_batch_size, 512);
        assert!(!config.async_export_enabled);
        assert_eq!(config.max_in_flight, 8);
    }

    #[test]
    fn batch_bound_clamped_to_queue_bound() {
        let config = BatchConfig {
            max_queue_size: 16,
            max_export_batch_size: 512,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.max_export_batch_size, 16);
    }

    #[test]
    fn zero_sizes_are_lifted() {
        let config = BatchConfig {
            max_queue_size: 0,
            max_export_batch_size: 0,
            max_in_flight: 0,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.max_queue_size, 1);
        assert_eq!(config.max_export_batch_size, 1);
        assert_eq!(config.max_in_flight, 1);
    }
}
