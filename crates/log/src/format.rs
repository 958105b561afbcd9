//! Log segment file and record framing.
//!
//! Log segments are named `log-NNNNNN.seg` where `NNNNNN` is a zero-padded
//! segment number.
//!
//! # Segment Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (32 bytes)          │
//! ├────────────────────────────────────┤
//! │ Frame 1                            │
//! ├────────────────────────────────────┤
//! │ Frame 2                            │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The payload is the bincode encoding of a [`LogRecord`]. The length field
//! covers (format version + payload + crc32).

use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tessera_core::LogRecord;

/// Magic bytes identifying a log segment file: "TESL"
pub const SEGMENT_MAGIC: [u8; 4] = *b"TESL";

/// Current segment format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Current frame format version
pub const FRAME_FORMAT_VERSION: u8 = 1;

/// Log segment header (32 bytes).
///
/// Written at the beginning of each segment file; validated on every open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes: "TESL"
    pub magic: [u8; 4],

    /// Format version for forward compatibility
    pub format_version: u32,

    /// Segment number (monotonically increasing)
    pub segment_number: u64,

    /// Log instance UUID (for integrity checking across segments)
    pub log_uuid: [u8; 16],
}

impl SegmentHeader {
    /// Create a new segment header.
    pub fn new(segment_number: u64, log_uuid: [u8; 16]) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
            log_uuid,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes[16..32].copy_from_slice(&self.log_uuid);
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Option<Self> {
        Some(SegmentHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            segment_number: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            log_uuid: bytes[16..32].try_into().ok()?,
        })
    }

    /// Validate the header has correct magic bytes.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC
    }
}

/// Frame parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not enough data to parse a frame (torn tail)
    #[error("insufficient data to parse frame")]
    InsufficientData,

    /// Frame structure is invalid
    #[error("invalid frame format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from frame
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported frame format version
    #[error("unsupported frame format version: {0}")]
    UnsupportedVersion(u8),

    /// Payload failed to decode
    #[error("payload decode error: {0}")]
    Payload(String),
}

/// Encode a log record as a self-delimiting, CRC-checked frame.
pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(record).map_err(|e| FrameError::Payload(e.to_string()))?;

    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(FRAME_FORMAT_VERSION);
    body.extend_from_slice(&payload);

    let crc = compute_crc(&body);

    let total_len = body.len() + 4; // body + crc
    let mut frame = Vec::with_capacity(4 + total_len);
    frame.extend_from_slice(&(total_len as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

/// Decode one frame from the front of `bytes`.
///
/// Returns (record, bytes_consumed) on success.
pub fn decode_frame(bytes: &[u8]) -> Result<(LogRecord, usize), FrameError> {
    if bytes.len() < 4 {
        return Err(FrameError::InsufficientData);
    }

    let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;

    if length < 5 {
        // Minimum: 1 byte format version + 4 bytes CRC
        return Err(FrameError::InvalidFormat);
    }

    if bytes.len() < 4 + length {
        return Err(FrameError::InsufficientData);
    }

    let body = &bytes[4..4 + length - 4];
    let stored_crc = u32::from_le_bytes(bytes[4 + length - 4..4 + length].try_into().unwrap());

    let computed_crc = compute_crc(body);
    if computed_crc != stored_crc {
        return Err(FrameError::ChecksumMismatch {
            expected: stored_crc,
            computed: computed_crc,
        });
    }

    let format_version = body[0];
    if format_version != FRAME_FORMAT_VERSION {
        return Err(FrameError::UnsupportedVersion(format_version));
    }

    let record: LogRecord =
        bincode::deserialize(&body[1..]).map_err(|e| FrameError::Payload(e.to_string()))?;

    Ok((record, 4 + length))
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Log segment file handle.
///
/// A segment is a single file containing multiple frames. Only the active
/// segment is writable; closed segments are immutable.
pub struct LogSegmentFile {
    /// File handle
    file: File,

    /// Segment number
    segment_number: u64,

    /// Current write position (bytes from start)
    write_position: u64,

    /// Path to segment file
    path: PathBuf,

    /// Whether this segment is closed (immutable)
    closed: bool,

    /// Log instance UUID from the header
    log_uuid: [u8; 16],
}

impl LogSegmentFile {
    /// Create a new segment file and write its header.
    pub fn create(dir: &Path, segment_number: u64, log_uuid: [u8; 16]) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, segment_number);

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;

        let header = SegmentHeader::new(segment_number, log_uuid);
        file.write_all(&header.to_bytes())?;

        Ok(LogSegmentFile {
            file,
            segment_number,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
            closed: false,
            log_uuid,
        })
    }

    /// Open an existing segment for appending, validating the header.
    pub fn open_append(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        let mut seg = Self::open_impl(dir, segment_number, false)?;
        seg.write_position = seg.file.seek(SeekFrom::End(0))?;
        Ok(seg)
    }

    /// Open an existing segment read-only.
    pub fn open_read(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        let mut seg = Self::open_impl(dir, segment_number, true)?;
        seg.write_position = seg.file.seek(SeekFrom::End(0))?;
        Ok(seg)
    }

    fn open_impl(dir: &Path, segment_number: u64, read_only: bool) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, segment_number);

        let mut options = OpenOptions::new();
        options.read(true);
        if !read_only {
            options.write(true);
        }
        let mut file = options.open(&path)?;

        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;

        let header = SegmentHeader::from_bytes(&header_bytes).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid segment header")
        })?;

        if !header.is_valid() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid segment magic bytes",
            ));
        }

        if header.segment_number != segment_number {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "segment number mismatch: expected {}, got {}",
                    segment_number, header.segment_number
                ),
            ));
        }

        Ok(LogSegmentFile {
            file,
            segment_number,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
            closed: read_only,
            log_uuid: header.log_uuid,
        })
    }

    /// Generate segment file path: `log-NNNNNN.seg`.
    pub fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(format!("log-{:06}.seg", segment_number))
    }

    /// Get segment number.
    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    /// Get current segment size in bytes.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the log instance UUID recorded in the header.
    pub fn log_uuid(&self) -> [u8; 16] {
        self.log_uuid
    }

    /// Append bytes and advance the write position.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cannot write to closed segment",
            ));
        }

        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    /// Sync segment data to disk.
    pub fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    /// Mark segment as closed (immutable). Syncs before closing.
    pub fn close(&mut self) -> std::io::Result<()> {
        if !self.closed {
            self.file.sync_all()?;
            self.closed = true;
        }
        Ok(())
    }

    /// Check if segment is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read the full frame region (everything after the header) into memory.
    pub fn read_frames_region(&mut self) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Truncate the segment at the given absolute position.
    ///
    /// Used during recovery to drop a torn trailing frame.
    pub fn truncate(&mut self, position: u64) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cannot truncate closed segment",
            ));
        }

        self.file.set_len(position)?;
        self.write_position = position;
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tessera_core::{OperationRecord, SeqId};

    fn record(seq: u64) -> LogRecord {
        LogRecord::new(SeqId::new(seq), OperationRecord::upsert("item", vec![1.0, 2.0]))
    }

    #[test]
    fn test_header_roundtrip() {
        let header = SegmentHeader::new(12345, [0xAB; 16]);

        let bytes = header.to_bytes();
        let parsed = SegmentHeader::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.magic, SEGMENT_MAGIC);
        assert_eq!(parsed.format_version, SEGMENT_FORMAT_VERSION);
        assert_eq!(parsed.segment_number, 12345);
        assert_eq!(parsed.log_uuid, [0xAB; 16]);
        assert!(parsed.is_valid());
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut header = SegmentHeader::new(1, [0; 16]);
        header.magic = *b"XXXX";
        assert!(!header.is_valid());
    }

    #[test]
    fn test_segment_path_format() {
        let dir = Path::new("/tmp/log");
        assert_eq!(
            LogSegmentFile::segment_path(dir, 1),
            PathBuf::from("/tmp/log/log-000001.seg")
        );
        assert_eq!(
            LogSegmentFile::segment_path(dir, 999999),
            PathBuf::from("/tmp/log/log-999999.seg")
        );
    }

    #[test]
    fn test_frame_roundtrip() {
        let rec = record(42);
        let frame = encode_frame(&rec).unwrap();
        let (parsed, consumed) = decode_frame(&frame).unwrap();

        assert_eq!(parsed, rec);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_frame_checksum_failure() {
        let mut frame = encode_frame(&record(1)).unwrap();
        frame[8] ^= 0xFF;

        assert!(matches!(
            decode_frame(&frame),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_frame_insufficient_data() {
        assert!(matches!(
            decode_frame(&[1, 2, 3]),
            Err(FrameError::InsufficientData)
        ));

        // Length claims more data than available (torn tail)
        let frame = encode_frame(&record(1)).unwrap();
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 2]),
            Err(FrameError::InsufficientData)
        ));
    }

    #[test]
    fn test_multiple_frames_in_sequence() {
        let records: Vec<LogRecord> = (1..=3).map(record).collect();

        let mut all_bytes = Vec::new();
        for rec in &records {
            all_bytes.extend_from_slice(&encode_frame(rec).unwrap());
        }

        let mut offset = 0;
        for expected in &records {
            let (parsed, consumed) = decode_frame(&all_bytes[offset..]).unwrap();
            assert_eq!(&parsed, expected);
            offset += consumed;
        }
        assert_eq!(offset, all_bytes.len());
    }

    #[test]
    fn test_segment_create_write_reopen() {
        let dir = tempdir().unwrap();
        let uuid = [7u8; 16];

        let mut segment = LogSegmentFile::create(dir.path(), 1, uuid).unwrap();
        assert_eq!(segment.size(), SEGMENT_HEADER_SIZE as u64);

        let frame = encode_frame(&record(1)).unwrap();
        segment.write(&frame).unwrap();
        assert_eq!(segment.size(), (SEGMENT_HEADER_SIZE + frame.len()) as u64);
        segment.close().unwrap();

        // Cannot write after close
        assert!(segment.write(b"more").is_err());

        // Reopen and read the frame back
        let mut reopened = LogSegmentFile::open_read(dir.path(), 1).unwrap();
        let region = reopened.read_frames_region().unwrap();
        let (parsed, _) = decode_frame(&region).unwrap();
        assert_eq!(parsed, record(1));
    }

    #[test]
    fn test_segment_truncate() {
        let dir = tempdir().unwrap();
        let mut segment = LogSegmentFile::create(dir.path(), 1, [0u8; 16]).unwrap();

        let frame = encode_frame(&record(1)).unwrap();
        segment.write(&frame).unwrap();
        let good_len = segment.size();

        // Simulate a torn write, then truncate it away
        segment.write(&frame[..frame.len() / 2]).unwrap();
        segment.truncate(good_len).unwrap();
        assert_eq!(segment.size(), good_len);

        let region = segment.read_frames_region().unwrap();
        let (parsed, consumed) = decode_frame(&region).unwrap();
        assert_eq!(parsed, record(1));
        assert_eq!(consumed, region.len());
    }
}
