//! Atomic snapshot files with co-located checkpoints.
//!
//! Both segment kinds persist their state as a single snapshot file that
//! carries the max-applied SeqId *inside* the payload. The write protocol
//! makes the checkpoint advance atomic with the data:
//!
//! 1. serialize payload, write to `<file>.tmp`
//! 2. fsync the temp file
//! 3. rename over the final path
//! 4. fsync the parent directory
//!
//! A crash at any step leaves either the old snapshot or the new one — never
//! a state where the checkpoint advanced but the data is missing.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────┬─────────────┬──────────────┬─────────────────┬──────────┐
//! │ Magic (4)│ Version (4) │ Length (8)   │ Payload         │ CRC32 (4)│
//! └──────────┴─────────────┴──────────────┴─────────────────┴──────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_core::{Error, Result};
use tracing::debug;

const HEADER_SIZE: usize = 16;

/// Write a snapshot atomically (tmp + fsync + rename).
pub fn write_snapshot<T: Serialize>(
    path: &Path,
    magic: [u8; 4],
    version: u32,
    value: &T,
) -> Result<()> {
    let payload = bincode::serialize(value)?;

    let mut crc = crc32fast::Hasher::new();
    crc.update(&payload);
    let crc = crc.finalize();

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len() + 4);
    bytes.extend_from_slice(&magic);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc.to_le_bytes());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    // Make the rename itself durable
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }

    debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
    Ok(())
}

/// Read a snapshot written by [`write_snapshot`].
///
/// Returns `Ok(None)` when no snapshot exists yet; any structural problem in
/// an existing file is corruption.
pub fn read_snapshot<T: DeserializeOwned>(
    path: &Path,
    magic: [u8; 4],
    expected_version: u32,
) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    if bytes.len() < HEADER_SIZE + 4 {
        return Err(Error::Corruption(format!(
            "snapshot {} too short ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }

    if bytes[0..4] != magic {
        return Err(Error::Corruption(format!(
            "snapshot {} has wrong magic bytes",
            path.display()
        )));
    }

    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != expected_version {
        return Err(Error::Corruption(format!(
            "snapshot {} has unsupported version {}",
            path.display(),
            version
        )));
    }

    let length = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
    if bytes.len() != HEADER_SIZE + length + 4 {
        return Err(Error::Corruption(format!(
            "snapshot {} length mismatch",
            path.display()
        )));
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + length];
    let stored_crc = u32::from_le_bytes(bytes[HEADER_SIZE + length..].try_into().unwrap());

    let mut crc = crc32fast::Hasher::new();
    crc.update(payload);
    if crc.finalize() != stored_crc {
        return Err(Error::Corruption(format!(
            "snapshot {} checksum mismatch",
            path.display()
        )));
    }

    Ok(Some(bincode::deserialize(payload)?))
}
