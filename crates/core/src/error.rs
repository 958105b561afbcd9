//! Error types for the engine.
//!
//! One shared error enum covers the whole write/read surface. We use
//! `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Two propagation regimes exist and are worth keeping straight:
//! - **Record-level** errors (`DimensionMismatch`, rejected Add/Update) are
//!   logged and skipped during apply so one poison record cannot stall
//!   ingestion.
//! - **Batch-level** errors (`StorageIo`) abort the whole batch and leave the
//!   segment at its prior checkpoint, so replay from the log is safe.

use crate::types::CollectionId;
use std::io;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Vector length disagrees with the collection's established dimension.
    /// Record-level: does not abort the batch it arrived in.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Established collection dimension
        expected: usize,
        /// Dimension of the offending vector
        actual: usize,
    },

    /// Submitted batch exceeds the producer's admission limit.
    #[error("batch too large: {size} records (max {max})")]
    BatchTooLarge {
        /// Records in the rejected batch
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Producer has too many submissions in flight; retry with backoff.
    #[error("producer overloaded: {in_flight} submissions in flight (max {max})")]
    Overloaded {
        /// Current in-flight submissions
        in_flight: usize,
        /// Configured maximum
        max: usize,
    },

    /// Segment not found or not started for a collection. Fatal for the
    /// current call; self-heals once the segment is (re)loaded.
    #[error("segment unavailable for collection {collection} ({kind})")]
    SegmentUnavailable {
        /// Collection whose segment could not be resolved
        collection: CollectionId,
        /// Which segment kind was needed
        kind: String,
    },

    /// Malformed filter expression, rejected before touching any segment.
    #[error("invalid predicate: {0}")]
    Predicate(String),

    /// Durable-write failure. The batch is not applied and the checkpoint is
    /// not advanced; retrying the same log region is safe.
    #[error("storage I/O error: {0}")]
    StorageIo(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Durable state failed validation (bad magic, CRC mismatch, truncation)
    #[error("data corruption: {0}")]
    Corruption(String),

    /// A submitted record is structurally invalid (e.g. empty item id).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Submitted batch contains no records.
    #[error("empty batch")]
    EmptyBatch,

    /// Invalid operation or state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_dimension_mismatch() {
        let err = Error::DimensionMismatch {
            expected: 384,
            actual: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("384"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn test_display_admission_errors() {
        let err = Error::BatchTooLarge { size: 5000, max: 1000 };
        assert!(err.to_string().contains("batch too large"));

        let err = Error::Overloaded {
            in_flight: 64,
            max: 32,
        };
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_display_segment_unavailable() {
        let err = Error::SegmentUnavailable {
            collection: CollectionId::new("docs"),
            kind: "vector".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("docs"));
        assert!(msg.contains("vector"));
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::StorageIo(_)));
    }

    #[test]
    fn test_from_bincode() {
        let invalid = vec![0xFF; 3];
        let result: Result<String> = bincode::deserialize(&invalid).map_err(|e| e.into());
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> Result<i32> {
            Ok(1)
        }
        fn err() -> Result<i32> {
            Err(Error::EmptyBatch)
        }
        assert_eq!(ok().unwrap(), 1);
        assert!(err().is_err());
    }
}
