//! Ingestion log configuration.

/// Configuration for the ingestion log.
///
/// Built with `with_*` setters:
///
/// ```
/// use tessera_log::LogConfig;
///
/// let config = LogConfig::new()
///     .with_max_batch_size(512)
///     .with_segment_size(16 * 1024 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum records per submitted batch; larger batches are rejected
    /// with `BatchTooLarge`.
    pub max_batch_size: usize,

    /// Maximum concurrent submissions; beyond this, `submit` fails with
    /// `Overloaded` instead of queueing.
    pub max_in_flight: usize,

    /// Segment rotation threshold in bytes.
    pub segment_size: u64,

    /// Bound of each subscription's delivery channel, in batches. A full
    /// channel makes the producer's fan-out wait for the subscriber.
    pub channel_capacity: usize,

    /// Records per delivered batch during the replay phase.
    pub replay_chunk: usize,
}

impl LogConfig {
    /// Default configuration.
    pub fn new() -> Self {
        LogConfig {
            max_batch_size: 4096,
            max_in_flight: 64,
            segment_size: 64 * 1024 * 1024,
            channel_capacity: 8,
            replay_chunk: 256,
        }
    }

    /// Small limits for tests: tiny segments so rotation paths are exercised.
    pub fn for_testing() -> Self {
        LogConfig {
            max_batch_size: 64,
            max_in_flight: 4,
            segment_size: 4 * 1024,
            channel_capacity: 4,
            replay_chunk: 16,
        }
    }

    /// Set the maximum records per batch.
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Set the maximum concurrent submissions.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Set the segment rotation threshold in bytes.
    pub fn with_segment_size(mut self, bytes: u64) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Set the subscription channel bound, in batches.
    pub fn with_channel_capacity(mut self, batches: usize) -> Self {
        self.channel_capacity = batches;
        self
    }

    /// Set the replay delivery chunk size, in records.
    pub fn with_replay_chunk(mut self, records: usize) -> Self {
        self.replay_chunk = records;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = LogConfig::new()
            .with_max_batch_size(10)
            .with_max_in_flight(2)
            .with_segment_size(1024)
            .with_channel_capacity(1)
            .with_replay_chunk(5);

        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.max_in_flight, 2);
        assert_eq!(config.segment_size, 1024);
        assert_eq!(config.channel_capacity, 1);
        assert_eq!(config.replay_chunk, 5);
    }

    #[test]
    fn test_testing_config_is_small() {
        let config = LogConfig::for_testing();
        assert!(config.segment_size < LogConfig::new().segment_size);
        assert!(config.max_batch_size < LogConfig::new().max_batch_size);
    }
}
