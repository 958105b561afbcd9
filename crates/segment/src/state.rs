//! Segment lifecycle state and apply statistics.

use std::fmt;

/// Lifecycle of a storage segment.
///
/// `Uninitialized → Loaded → Running → Stopped`. Only a Running segment
/// accepts writes and queries; Stopped has flushed pending state and released
/// resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Constructed, durable state not yet read
    Uninitialized,
    /// On-disk state has been read
    Loaded,
    /// Accepting writes and queries
    Running,
    /// Flushed and shut down
    Stopped,
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentState::Uninitialized => write!(f, "uninitialized"),
            SegmentState::Loaded => write!(f, "loaded"),
            SegmentState::Running => write!(f, "running"),
            SegmentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Outcome of applying one batch of log records to a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Records that mutated segment state (no-op deletes included)
    pub applied: usize,
    /// Records skipped because their SeqId was already applied (replay)
    pub replayed: usize,
    /// Poison records skipped with a warning (e.g. dimension mismatch)
    pub failed: usize,
}

impl ApplyStats {
    /// Total records the batch contained.
    pub fn total(&self) -> usize {
        self.applied + self.replayed + self.failed
    }
}
