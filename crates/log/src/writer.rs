//! Durable append path of the ingestion log.
//!
//! The writer owns the active segment of one collection's log. Every batch is
//! written frame-by-frame and fsynced once before `append_batch` returns, so
//! a successful submit implies durability. Segments rotate when they exceed
//! the configured size; closed segments are immutable.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tessera_core::{LogRecord, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LogConfig;
use crate::format::{encode_frame, LogSegmentFile};
use crate::reader::{list_segments, scan_segment};

/// Cumulative log writer counters.
///
/// These accumulate over the lifetime of the writer and are never reset.
/// Use them to observe how many durable operations a workload triggers.
#[derive(Debug, Clone, Default)]
pub struct LogCounters {
    /// Total records appended
    pub records_appended: u64,
    /// Total durability barrier (fsync) calls
    pub sync_calls: u64,
    /// Total bytes written to segment files
    pub bytes_written: u64,
    /// Total nanoseconds spent in fsync calls
    pub sync_nanos: u64,
}

/// Appender for one collection's log directory.
///
/// Opening the writer recovers the active segment: a torn trailing frame left
/// by a crash is truncated away before any new append.
pub struct LogWriter {
    /// Current active segment
    segment: LogSegmentFile,

    /// Log directory
    dir: PathBuf,

    /// Log instance UUID stamped into every segment header
    log_uuid: [u8; 16],

    /// Configuration
    config: LogConfig,

    /// Current segment number
    current_segment_number: u64,

    /// Cumulative counters
    counters: LogCounters,
}

impl LogWriter {
    /// Open the writer for a log directory, creating it if needed.
    ///
    /// Returns the writer and the highest SeqId already durable in the
    /// directory (None for a fresh log).
    pub fn open(dir: impl Into<PathBuf>, config: LogConfig) -> Result<(Self, Option<u64>)> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let segments = list_segments(&dir)?;
        let mut last_seq = None;

        // Scan every segment for the last durable SeqId; repair the tail of
        // the newest one if a crash left a partial frame behind.
        for (idx, &number) in segments.iter().enumerate() {
            let scan = scan_segment(&dir, number)?;
            if let Some(record) = scan.records.last() {
                last_seq = Some(record.seq_id.as_u64());
            }
            if scan.torn && idx == segments.len() - 1 {
                let mut segment = LogSegmentFile::open_append(&dir, number)?;
                info!(
                    segment = number,
                    valid_len = scan.valid_len,
                    "truncating torn tail of active log segment"
                );
                segment.truncate(scan.valid_len)?;
                segment.sync()?;
            }
        }

        let (segment, current_segment_number, log_uuid) = match segments.last() {
            Some(&number) => {
                let segment = LogSegmentFile::open_append(&dir, number)?;
                let uuid = segment.log_uuid();
                (segment, number, uuid)
            }
            None => {
                let uuid = *Uuid::new_v4().as_bytes();
                let segment = LogSegmentFile::create(&dir, 1, uuid)?;
                (segment, 1, uuid)
            }
        };

        Ok((
            LogWriter {
                segment,
                dir,
                log_uuid,
                config,
                current_segment_number,
                counters: LogCounters::default(),
            },
            last_seq,
        ))
    }

    /// Durably append a batch of records.
    ///
    /// All frames are written, then the segment is fsynced once. On return
    /// the whole batch is durable. Rotation happens between frames when the
    /// active segment crosses the size threshold.
    pub fn append_batch(&mut self, records: &[LogRecord]) -> Result<()> {
        for record in records {
            let frame = encode_frame(record)
                .map_err(|e| tessera_core::Error::Serialization(e.to_string()))?;

            if self.segment.size() + frame.len() as u64 > self.config.segment_size {
                self.rotate_segment()?;
            }

            self.segment.write(&frame)?;
            self.counters.records_appended += 1;
            self.counters.bytes_written += frame.len() as u64;
        }

        self.sync()?;
        Ok(())
    }

    /// Force an fsync of the active segment.
    pub fn sync(&mut self) -> Result<()> {
        let start = Instant::now();
        self.segment.sync()?;
        self.counters.sync_calls += 1;
        self.counters.sync_nanos += start.elapsed().as_nanos() as u64;
        Ok(())
    }

    /// Close the current segment and start a new one.
    fn rotate_segment(&mut self) -> Result<()> {
        self.segment.close()?;

        self.current_segment_number += 1;
        debug!(
            segment = self.current_segment_number,
            "rotating log segment"
        );
        self.segment = LogSegmentFile::create(&self.dir, self.current_segment_number, self.log_uuid)?;
        Ok(())
    }

    /// Get the current segment number.
    pub fn current_segment(&self) -> u64 {
        self.current_segment_number
    }

    /// Get a snapshot of cumulative counters.
    pub fn counters(&self) -> LogCounters {
        self.counters.clone()
    }

    /// Get the log directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::LogReader;
    use tempfile::tempdir;
    use tessera_core::{OperationRecord, SeqId};

    fn records(seqs: std::ops::RangeInclusive<u64>) -> Vec<LogRecord> {
        seqs.map(|s| {
            LogRecord::new(
                SeqId::new(s),
                OperationRecord::upsert(format!("item-{s}"), vec![s as f32; 8]),
            )
        })
        .collect()
    }

    #[test]
    fn test_fresh_log_starts_at_none() {
        let dir = tempdir().unwrap();
        let (writer, last) = LogWriter::open(dir.path().join("log"), LogConfig::for_testing()).unwrap();
        assert_eq!(last, None);
        assert_eq!(writer.current_segment(), 1);
    }

    #[test]
    fn test_append_then_replay() {
        let dir = tempdir().unwrap();
        let (mut writer, _) =
            LogWriter::open(dir.path().join("log"), LogConfig::for_testing()).unwrap();

        writer.append_batch(&records(1..=5)).unwrap();

        let reader = LogReader::new(writer.dir());
        let replayed = reader.replay(None, None).unwrap();
        assert_eq!(replayed.len(), 5);
        assert_eq!(replayed[4].seq_id, SeqId::new(5));

        let counters = writer.counters();
        assert_eq!(counters.records_appended, 5);
        assert_eq!(counters.sync_calls, 1);
        assert!(counters.bytes_written > 0);
    }

    #[test]
    fn test_reopen_reports_last_seq() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("log");

        {
            let (mut writer, _) = LogWriter::open(&log_dir, LogConfig::for_testing()).unwrap();
            writer.append_batch(&records(1..=3)).unwrap();
        }

        let (_, last) = LogWriter::open(&log_dir, LogConfig::for_testing()).unwrap();
        assert_eq!(last, Some(3));
    }

    #[test]
    fn test_rotation_under_small_segment_size() {
        let dir = tempdir().unwrap();
        let config = LogConfig::for_testing().with_segment_size(256);
        let (mut writer, _) = LogWriter::open(dir.path().join("log"), config).unwrap();

        writer.append_batch(&records(1..=20)).unwrap();
        assert!(writer.current_segment() > 1, "expected rotation");

        // Everything still replays in order across segments
        let reader = LogReader::new(writer.dir());
        let replayed = reader.replay(None, None).unwrap();
        let seqs: Vec<u64> = replayed.iter().map(|r| r.seq_id.as_u64()).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_torn_tail_repaired_then_appendable() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("log");

        {
            let (mut writer, _) = LogWriter::open(&log_dir, LogConfig::for_testing()).unwrap();
            writer.append_batch(&records(1..=2)).unwrap();
        }

        // Simulate a crash mid-frame on the active segment
        let path = crate::format::LogSegmentFile::segment_path(&log_dir, 1);
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0xDE, 0xAD, 0xBE]).unwrap();
        drop(f);

        let (mut writer, last) = LogWriter::open(&log_dir, LogConfig::for_testing()).unwrap();
        assert_eq!(last, Some(2));

        writer.append_batch(&records(3..=3)).unwrap();

        let reader = LogReader::new(&log_dir);
        let seqs: Vec<u64> = reader
            .replay(None, None)
            .unwrap()
            .iter()
            .map(|r| r.seq_id.as_u64())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
