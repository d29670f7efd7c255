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

//! Segment file handles.
//!
//! Writes go straight to the OS with `write_all` so a reader opening the same
//! file sees them immediately; durability is only promised after
//! [`SegmentWriter::sync`].

use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use snafu::ResultExt;

use crate::{
    Result,
    error::IoSnafu,
    message::{FRAME_CRC_SIZE, FRAME_LENGTH_SIZE, encode_frame, frame_crc, frame_size},
};

/// Append handle for the active segment.
pub struct SegmentWriter {
    file:     File,
    path:     PathBuf,
    position: u64,
}

impl SegmentWriter {
    /// Open `path` for appending at `position`.
    ///
    /// A fresh segment (`position == 0`) is created or truncated. Anything
    /// past `position` in an existing file is cut off, since it was never
    /// acknowledged.
    pub fn open<P: AsRef<Path>>(path: P, position: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(position == 0)
            .open(&path)
            .context(IoSnafu { path: &path })?;

        if position > 0 {
            file.set_len(position).context(IoSnafu { path: &path })?;
            file.seek(SeekFrom::Start(position))
                .context(IoSnafu { path: &path })?;
        }

        Ok(Self {
            file,
            path,
            position,
        })
    }

    /// Append one framed payload, returning the offset it starts at.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let offset = self.position;
        self.file
            .write_all(&encode_frame(payload))
            .context(IoSnafu { path: &self.path })?;
        self.position += frame_size(payload.len());
        Ok(offset)
    }

    /// fsync the segment contents.
    pub fn sync(&self) -> Result<()> { self.file.sync_data().context(IoSnafu { path: &self.path }) }

    pub fn position(&self) -> u64 { self.position }

    pub fn path(&self) -> &Path { &self.path }
}

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum ReadFrame {
    /// A valid frame and the offset right after it.
    Frame { payload: Bytes, next: u64 },
    /// The file ends before a full frame (or exactly at `offset`).
    Incomplete,
    /// CRC check failed.
    Corrupt { reason: String },
}

/// Random-access reader over one segment file.
///
/// The file length is cached and only looked up again when a read reaches
/// the cached end, so following a growing segment costs one `stat` per
/// catch-up rather than one per frame.
pub struct SegmentReader {
    file: File,
    path: PathBuf,
    len:  u64,
}

impl SegmentReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).context(IoSnafu { path: &path })?;
        let len = file.metadata().context(IoSnafu { path: &path })?.len();
        Ok(Self { file, path, len })
    }

    /// Current length of the file on disk.
    pub fn size(&mut self) -> Result<u64> {
        self.len = self
            .file
            .metadata()
            .context(IoSnafu { path: &self.path })?
            .len();
        Ok(self.len)
    }

    /// Whether the file is at least `end` bytes long.
    fn covers(&mut self, end: u64) -> Result<bool> {
        if end > self.len {
            self.size()?;
        }
        Ok(end <= self.len)
    }

    /// Whether `offset` is at or past the end of the file.
    pub fn at_end(&mut self, offset: u64) -> Result<bool> { Ok(!self.covers(offset + 1)?) }

    /// Length prefix of the frame at `offset`, `None` past the end of file.
    fn read_length(&mut self, offset: u64) -> Result<Option<u32>> {
        if !self.covers(offset + FRAME_LENGTH_SIZE as u64)? {
            return Ok(None);
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu { path: &self.path })?;

        let mut length_buf = [0u8; FRAME_LENGTH_SIZE];
        if !self.read_exact_or_eof(&mut length_buf)? {
            return Ok(None);
        }
        Ok(Some(u32::from_le_bytes(length_buf)))
    }

    /// Read the frame starting at `offset`.
    ///
    /// A length prefix pointing past the end of the file is reported as
    /// `Incomplete` before anything is allocated for the payload.
    pub fn read_frame(&mut self, offset: u64) -> Result<ReadFrame> {
        let Some(length) = self.read_length(offset)? else {
            return Ok(ReadFrame::Incomplete);
        };
        if !self.covers(offset + frame_size(length as usize))? {
            return Ok(ReadFrame::Incomplete);
        }

        let mut payload = vec![0u8; length as usize];
        if !self.read_exact_or_eof(&mut payload)? {
            return Ok(ReadFrame::Incomplete);
        }

        let mut crc_buf = [0u8; FRAME_CRC_SIZE];
        if !self.read_exact_or_eof(&mut crc_buf)? {
            return Ok(ReadFrame::Incomplete);
        }

        let stored = u32::from_le_bytes(crc_buf);
        let computed = frame_crc(length, &payload);
        if stored != computed {
            return Ok(ReadFrame::Corrupt {
                reason: format!("crc mismatch: stored={stored:#x}, computed={computed:#x}"),
            });
        }

        Ok(ReadFrame::Frame {
            next:    offset + frame_size(payload.len()),
            payload: Bytes::from(payload),
        })
    }

    /// Offset right after the frame at `offset`, judged by its length prefix
    /// alone. The payload is neither read nor checked. `None` when the file
    /// ends before the frame does.
    pub fn skip_frame(&mut self, offset: u64) -> Result<Option<u64>> {
        let Some(length) = self.read_length(offset)? else {
            return Ok(None);
        };
        let next = offset + frame_size(length as usize);
        Ok(self.covers(next)?.then_some(next))
    }

    /// Returns `false` when the file ended before `buf` was filled.
    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.file.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e).context(IoSnafu { path: &self.path }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("0000000000.data");

        let mut writer = SegmentWriter::open(&path, 0).unwrap();
        assert_eq!(writer.append(b"hello").unwrap(), 0);
        assert_eq!(writer.append(b"world!").unwrap(), 13);
        assert_eq!(writer.position(), 27);

        let mut reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.size().unwrap(), 27);
        assert_eq!(reader.skip_frame(0).unwrap(), Some(13));
        assert_eq!(reader.skip_frame(13).unwrap(), Some(27));
        assert_eq!(reader.skip_frame(27).unwrap(), None);

        let ReadFrame::Frame { payload, next } = reader.read_frame(0).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(payload.as_ref(), b"hello");
        assert_eq!(next, 13);

        let ReadFrame::Frame { payload, next } = reader.read_frame(13).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(payload.as_ref(), b"world!");
        assert_eq!(next, 27);

        assert!(matches!(
            reader.read_frame(27).unwrap(),
            ReadFrame::Incomplete
        ));
    }

    #[test]
    fn test_reopen_truncates_unacknowledged_tail() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("0000000000.data");

        {
            let mut writer = SegmentWriter::open(&path, 0).unwrap();
            writer.append(b"keep").unwrap();
            writer.append(b"drop").unwrap();
        }

        let mut writer = SegmentWriter::open(&path, 12).unwrap();
        writer.append(b"next").unwrap();

        let mut reader = SegmentReader::open(&path).unwrap();
        let ReadFrame::Frame { payload, next } = reader.read_frame(12).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(payload.as_ref(), b"next");
        assert_eq!(next, reader.size().unwrap());
    }

    #[test]
    fn test_detects_torn_and_corrupt_frames() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("0000000000.data");

        let mut frame = encode_frame(b"payload");
        std::fs::write(&path, &frame[..frame.len() - 2]).unwrap();
        let mut reader = SegmentReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_frame(0).unwrap(),
            ReadFrame::Incomplete
        ));

        frame[5] ^= 0xff;
        std::fs::write(&path, &frame).unwrap();
        let mut reader = SegmentReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_frame(0).unwrap(),
            ReadFrame::Corrupt { .. }
        ));

        let mut garbage = u32::MAX.to_le_bytes().to_vec();
        garbage.extend_from_slice(b"tiny");
        std::fs::write(&path, &garbage).unwrap();
        let mut reader = SegmentReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_frame(0).unwrap(),
            ReadFrame::Incomplete
        ));
    }

    #[test]
    fn test_reader_follows_a_growing_segment() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("0000000000.data");

        let mut writer = SegmentWriter::open(&path, 0).unwrap();
        writer.append(b"first").unwrap();
        let mut reader = SegmentReader::open(&path).unwrap();
        let ReadFrame::Frame { next, .. } = reader.read_frame(0).unwrap() else {
            panic!("expected a frame");
        };
        assert!(matches!(
            reader.read_frame(next).unwrap(),
            ReadFrame::Incomplete
        ));

        writer.append(b"second").unwrap();
        let ReadFrame::Frame { payload, .. } = reader.read_frame(next).unwrap() else {
            panic!("expected the appended frame");
        };
        assert_eq!(payload.as_ref(), b"second");
    }

    #[test]
    fn test_skip_frame_ignores_payload_contents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("0000000000.data");

        let mut frame = encode_frame(b"payload");
        frame[5] ^= 0xff;
        let len = frame.len() as u64;
        frame.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &frame).unwrap();

        let mut reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.skip_frame(0).unwrap(), Some(len));
        assert_eq!(reader.skip_frame(len).unwrap(), None);
    }
}
