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

//! Frame format of records inside a segment file.
//!
//! ```text
//! ┌─────────────────┬──────────────────────┬─────────────────┐
//! │  Length (4B)    │   Payload (variable) │   CRC32 (4B)    │
//! │  little-endian  │   raw bytes          │   little-endian │
//! └─────────────────┴──────────────────────┴─────────────────┘
//! ```
//!
//! The CRC covers the length prefix and the payload. A frame whose CRC does
//! not match is treated as a torn write: recovery truncates the segment there
//! and the read path quarantines the segment.

use bytes::Bytes;
use crc32fast::Hasher;
use crossbeam::channel::Sender;

use crate::Result;

/// Size of the length prefix in bytes.
pub(crate) const FRAME_LENGTH_SIZE: usize = 4;

/// Size of the CRC32 trailer in bytes.
pub(crate) const FRAME_CRC_SIZE: usize = 4;

/// Request sent from an [`Appender`](crate::Appender) to the IO worker.
///
/// The worker answers on `reply` once the frame has been handed to the OS.
#[derive(Debug)]
pub(crate) struct WriteRequest {
    pub data:  Bytes,
    pub reply: Sender<Result<()>>,
}

/// Total on-disk size of a frame carrying `payload_len` bytes.
#[inline]
pub(crate) const fn frame_size(payload_len: usize) -> u64 {
    (FRAME_LENGTH_SIZE + payload_len + FRAME_CRC_SIZE) as u64
}

#[inline]
pub(crate) fn frame_crc(length: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Encode `payload` into a complete frame.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let length = payload.len() as u32;
    let mut frame = Vec::with_capacity(FRAME_LENGTH_SIZE + payload.len() + FRAME_CRC_SIZE);
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&frame_crc(length, payload).to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(frame_size(0), 8);
        assert_eq!(frame_size(10), 18);
        assert_eq!(frame_size(100), 108);
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(b"abc");
        assert_eq!(frame.len(), 11);
        assert_eq!(&frame[..4], &3u32.to_le_bytes());
        assert_eq!(&frame[4..7], b"abc");
        assert_eq!(&frame[7..], &frame_crc(3, b"abc").to_le_bytes());
    }

    #[test]
    fn test_crc_covers_length() {
        let crc = frame_crc(5, b"hello");
        assert_eq!(crc, frame_crc(5, b"hello"));
        assert_ne!(crc, frame_crc(6, b"hello"));
        assert_ne!(crc, frame_crc(5, b"hellp"));
    }

    #[test]
    fn test_empty_payload_frame_is_not_all_zero() {
        let frame = encode_frame(b"");
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[4..], &frame_crc(0, b"").to_le_bytes());
    }
}
