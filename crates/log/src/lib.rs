//! Ingestion log for Tessera
//!
//! The ordered, durable write path of the engine:
//! - **Producer side**: [`IngestionLog::submit`] assigns strictly increasing
//!   per-collection SeqIds and appends batches durably before returning.
//! - **Consumer side**: [`IngestionLog::subscribe`] replays the durable
//!   backlog and then streams new batches, exactly once and in order, through
//!   a bounded channel drained by a dedicated thread.
//!
//! Durable format: CRC-framed records in numbered segment files
//! (`log-NNNNNN.seg`), rotated by size, with torn-tail repair on reopen.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod format;
mod log;
pub mod reader;
pub mod writer;

pub use config::LogConfig;
pub use format::{FrameError, LogSegmentFile, SegmentHeader};
pub use log::{BatchHandler, IngestionLog, SubscriptionId};
pub use reader::{list_segments, scan_segment, LogReader, SegmentScan};
pub use writer::{LogCounters, LogWriter};
