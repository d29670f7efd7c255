// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persisted read/write cursors.
//!
//! ## Binary Format
//!
//! ```text
//! ┌──────────────────────┬────────────────────────────────────┐
//! │ magic: [u8; 4]       │ "QFMD"                             │
//! │ version: u32         │ Format version, currently 1        │
//! │ write_segment: u64   │ Segment receiving appends          │
//! │ write_position: u64  │ Offset of the next append          │
//! │ read_segment: u64    │ Segment holding the next record    │
//! │ read_position: u64   │ Offset of the next record          │
//! │ checksum: u32        │ CRC32 of every byte before it      │
//! └──────────────────────┴────────────────────────────────────┘
//! ```
//!
//! The file is replaced atomically: the new contents are written to a
//! temporary file, fsynced, then renamed over the old one.

use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Write},
    path::Path,
};

use crc32fast::Hasher;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::{
    Result,
    error::{CorruptQueueSnafu, IoSnafu},
    path::{metadata_path, metadata_tmp_path},
};

/// Magic bytes identifying a metadata file: "QFMD".
pub const METADATA_MAGIC: [u8; 4] = *b"QFMD";

/// Current metadata format version.
pub const METADATA_VERSION: u32 = 1;

/// Encoded size of the metadata file.
pub const METADATA_SIZE: usize = 44;

/// Position of both queue cursors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub write_segment:  u64,
    pub write_position: u64,
    pub read_segment:   u64,
    pub read_position:  u64,
}

impl Cursor {
    /// Whether records exist between the read and the write cursor.
    #[must_use]
    pub const fn has_unread(&self) -> bool {
        self.read_segment < self.write_segment || self.read_position < self.write_position
    }

    #[must_use]
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut buf = [0u8; METADATA_SIZE];
        buf[0..4].copy_from_slice(&METADATA_MAGIC);
        buf[4..8].copy_from_slice(&METADATA_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.write_segment.to_le_bytes());
        buf[16..24].copy_from_slice(&self.write_position.to_le_bytes());
        buf[24..32].copy_from_slice(&self.read_segment.to_le_bytes());
        buf[32..40].copy_from_slice(&self.read_position.to_le_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&buf[..40]);
        buf[40..44].copy_from_slice(&hasher.finalize().to_le_bytes());
        buf
    }

    /// Decode a metadata file. `name` only feeds error messages.
    pub fn decode(name: &str, data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() == METADATA_SIZE,
            CorruptQueueSnafu {
                name,
                reason: format!(
                    "metadata is {} bytes, expected {METADATA_SIZE}",
                    data.len()
                ),
            }
        );
        ensure!(
            data[0..4] == METADATA_MAGIC,
            CorruptQueueSnafu {
                name,
                reason: format!("invalid metadata magic: {:?}", &data[0..4]),
            }
        );

        let version = read_u32(&data[4..8]);
        ensure!(
            version == METADATA_VERSION,
            CorruptQueueSnafu {
                name,
                reason: format!("unsupported metadata version {version}"),
            }
        );

        let stored = read_u32(&data[40..44]);
        let mut hasher = Hasher::new();
        hasher.update(&data[..40]);
        let computed = hasher.finalize();
        ensure!(
            stored == computed,
            CorruptQueueSnafu {
                name,
                reason: format!(
                    "metadata checksum mismatch: stored={stored:#x}, computed={computed:#x}"
                ),
            }
        );

        Ok(Self {
            write_segment:  read_u64(&data[8..16]),
            write_position: read_u64(&data[16..24]),
            read_segment:   read_u64(&data[24..32]),
            read_position:  read_u64(&data[32..40]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Load the cursor stored in `base`, `None` if no metadata file exists.
pub fn read_metadata<P: AsRef<Path>>(name: &str, base: P) -> Result<Option<Cursor>> {
    let path = metadata_path(base);
    match std::fs::read(&path) {
        Ok(data) => Cursor::decode(name, &data).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(IoSnafu { path }),
    }
}

/// Atomically replace the metadata file in `base`.
pub fn write_metadata<P: AsRef<Path>>(base: P, cursor: &Cursor) -> Result<()> {
    let base = base.as_ref();
    let tmp_path = metadata_tmp_path(base);
    let final_path = metadata_path(base);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .context(IoSnafu { path: &tmp_path })?;
    file.write_all(&cursor.encode())
        .context(IoSnafu { path: &tmp_path })?;
    file.sync_all().context(IoSnafu { path: &tmp_path })?;
    drop(file);

    std::fs::rename(&tmp_path, &final_path).context(IoSnafu { path: &final_path })?;
    sync_dir(base)?;

    debug!(?cursor, path = ?final_path, "Metadata written");
    Ok(())
}

/// fsync a directory so renames and unlinks inside it are durable.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .context(IoSnafu { path: dir })
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> { Ok(()) }
