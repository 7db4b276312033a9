//! On-disk store file.
//!
//! Layout:
//!
//! ```text
//! magic(4) | version(1) | crc32(4, LE) | body_len(8, LE) | body(MessagePack)
//! ```
//!
//! The body is a full snapshot of the store. Writes go to a temporary
//! sibling file that is renamed over the store file once synced.

use crate::error::{Result, StackError};
use crate::types::ObjectRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Magic bytes for the store file.
const STORE_MAGIC: &[u8; 4] = b"OBJS";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Header size: magic + version + checksum + body length.
const HEADER_SIZE: usize = 4 + 1 + 4 + 8;

/// Everything persisted in a store file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreSnapshot {
    /// Fingerprint of the model the objects were written with.
    pub model_hash: String,
    /// Next durable key to hand out.
    pub next_key: u64,
    /// Committed objects by durable key.
    pub objects: BTreeMap<u64, ObjectRecord>,
}

/// Read a store file. Returns `None` if it does not exist.
pub(crate) fn read_store(path: &Path) -> Result<Option<StoreSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read(path)?;
    if data.len() < HEADER_SIZE {
        return Err(StackError::InvalidFormat("Store file truncated".into()));
    }

    if &data[0..4] != STORE_MAGIC {
        return Err(StackError::InvalidFormat("Invalid store magic".into()));
    }

    if data[4] != STORE_VERSION {
        return Err(StackError::InvalidFormat(format!(
            "Unsupported store version: {}",
            data[4]
        )));
    }

    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&data[5..9]);
    let expected = u32::from_le_bytes(crc_bytes);

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&data[9..17]);
    let body_len = u64::from_le_bytes(len_bytes) as usize;

    let body = &data[HEADER_SIZE..];
    if body.len() != body_len {
        return Err(StackError::InvalidFormat(format!(
            "Store body length mismatch: header says {}, found {}",
            body_len,
            body.len()
        )));
    }

    let got = crc32fast::hash(body);
    if got != expected {
        return Err(StackError::ChecksumMismatch { expected, got });
    }

    let snapshot: StoreSnapshot = rmp_serde::from_slice(body)?;
    Ok(Some(snapshot))
}

/// Atomically replace the store file with `snapshot`.
pub(crate) fn write_store(path: &Path, tmp_path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let body = rmp_serde::to_vec_named(snapshot)?;
    let checksum = crc32fast::hash(&body);

    {
        let mut file = File::create(tmp_path)?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(&(body.len() as u64).to_le_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}
