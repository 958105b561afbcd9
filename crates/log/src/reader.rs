//! Replay of durable log records.
//!
//! The reader walks segment files in number order, verifies every frame's
//! checksum, and hands back records filtered to a `(start, end]` SeqId range.
//!
//! A torn tail — a partial or checksum-failing frame at the very end of the
//! newest segment — is the expected crash artifact and is reported, not
//! treated as corruption. A bad frame anywhere else is corruption.

use std::path::{Path, PathBuf};

use tessera_core::{Error, LogRecord, Result, SeqId};
use tracing::warn;

use crate::format::{decode_frame, FrameError, LogSegmentFile, SEGMENT_HEADER_SIZE};

/// Result of scanning one segment file.
#[derive(Debug)]
pub struct SegmentScan {
    /// Records recovered from valid frames, in file order
    pub records: Vec<LogRecord>,

    /// Absolute file offset one past the last valid frame
    pub valid_len: u64,

    /// Whether invalid trailing bytes were found after the valid prefix
    pub torn: bool,
}

/// Scan a segment file, stopping at the first invalid frame.
pub fn scan_segment(dir: &Path, segment_number: u64) -> Result<SegmentScan> {
    let mut segment = LogSegmentFile::open_read(dir, segment_number)?;
    let region = segment.read_frames_region()?;

    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut torn = false;

    while offset < region.len() {
        match decode_frame(&region[offset..]) {
            Ok((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            Err(FrameError::InsufficientData) | Err(FrameError::ChecksumMismatch { .. }) => {
                // Partial or half-written frame: valid prefix ends here
                torn = true;
                break;
            }
            Err(e) => {
                return Err(Error::Corruption(format!(
                    "segment {} frame at offset {}: {}",
                    segment_number,
                    SEGMENT_HEADER_SIZE + offset,
                    e
                )));
            }
        }
    }

    Ok(SegmentScan {
        records,
        valid_len: (SEGMENT_HEADER_SIZE + offset) as u64,
        torn,
    })
}

/// List segment numbers present in a log directory, ascending.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut segments = Vec::new();

    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("log-") && name.ends_with(".seg") {
            if let Ok(num) = name[4..name.len() - 4].parse::<u64>() {
                segments.push(num);
            }
        }
    }

    segments.sort_unstable();
    Ok(segments)
}

/// Reader over a collection's durable log directory.
pub struct LogReader {
    dir: PathBuf,
}

impl LogReader {
    /// Create a reader for the given log directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LogReader { dir: dir.into() }
    }

    /// Replay durable records with SeqId in `(start, end]`, in order.
    ///
    /// `start = None` means from the beginning; `end = None` means no upper
    /// bound. A torn tail on the newest segment is skipped with a warning; a
    /// torn frame on any older segment is corruption.
    pub fn replay(&self, start: Option<SeqId>, end: Option<SeqId>) -> Result<Vec<LogRecord>> {
        let segments = list_segments(&self.dir)?;
        let last = segments.last().copied();

        let mut out = Vec::new();
        for number in segments {
            let scan = scan_segment(&self.dir, number)?;

            if scan.torn {
                if Some(number) == last {
                    warn!(
                        segment = number,
                        valid_len = scan.valid_len,
                        "torn tail in active log segment, ignoring trailing bytes"
                    );
                } else {
                    return Err(Error::Corruption(format!(
                        "torn frame in closed segment {}",
                        number
                    )));
                }
            }

            for record in scan.records {
                if let Some(start) = start {
                    if record.seq_id <= start {
                        continue;
                    }
                }
                if let Some(end) = end {
                    if record.seq_id > end {
                        return Ok(out);
                    }
                }
                out.push(record);
            }
        }

        Ok(out)
    }

    /// Highest durable SeqId, or None for an empty log.
    pub fn last_seq_id(&self) -> Result<Option<SeqId>> {
        Ok(self.replay(None, None)?.last().map(|r| r.seq_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::encode_frame;
    use tempfile::tempdir;
    use tessera_core::OperationRecord;

    fn record(seq: u64) -> LogRecord {
        LogRecord::new(SeqId::new(seq), OperationRecord::upsert(format!("item-{seq}"), vec![seq as f32]))
    }

    fn write_segment(dir: &Path, number: u64, seqs: &[u64]) {
        let mut segment = LogSegmentFile::create(dir, number, [1u8; 16]).unwrap();
        for &seq in seqs {
            segment.write(&encode_frame(&record(seq)).unwrap()).unwrap();
        }
        segment.sync().unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempdir().unwrap();
        let reader = LogReader::new(dir.path().join("missing"));
        assert!(reader.replay(None, None).unwrap().is_empty());
        assert_eq!(reader.last_seq_id().unwrap(), None);
    }

    #[test]
    fn test_replay_across_segments() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, &[1, 2, 3]);
        write_segment(dir.path(), 2, &[4, 5]);

        let reader = LogReader::new(dir.path());
        let records = reader.replay(None, None).unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq_id.as_u64()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.last_seq_id().unwrap(), Some(SeqId::new(5)));
    }

    #[test]
    fn test_replay_range() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, &[1, 2, 3, 4, 5]);

        let reader = LogReader::new(dir.path());

        // (start, end] excludes start, includes end
        let records = reader
            .replay(Some(SeqId::new(2)), Some(SeqId::new(4)))
            .unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq_id.as_u64()).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn test_torn_tail_ignored_on_last_segment() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, &[1, 2]);

        // Append half a frame to simulate a crash mid-write
        let half = encode_frame(&record(3)).unwrap();
        let path = LogSegmentFile::segment_path(dir.path(), 1);
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(&half[..half.len() / 2]).unwrap();

        let reader = LogReader::new(dir.path());
        let records = reader.replay(None, None).unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq_id.as_u64()).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_torn_closed_segment_is_corruption() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, &[1]);
        write_segment(dir.path(), 2, &[2]);

        // Corrupt the closed (non-final) segment
        let path = LogSegmentFile::segment_path(dir.path(), 1);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let reader = LogReader::new(dir.path());
        assert!(matches!(
            reader.replay(None, None),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_scan_reports_valid_len() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, &[1]);

        let frame_len = encode_frame(&record(1)).unwrap().len();
        let scan = scan_segment(dir.path(), 1).unwrap();
        assert!(!scan.torn);
        assert_eq!(scan.valid_len, (SEGMENT_HEADER_SIZE + frame_len) as u64);
    }
}
