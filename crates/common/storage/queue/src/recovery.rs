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

//! Crash recovery for the persistent queue.
//!
//! Recovery starts from the persisted [`Cursor`]:
//! 1. Refuse to open when the metadata is missing next to existing segments,
//!    unreadable, or references a segment that is gone
//! 2. Scan the write segment from the recorded position and pick up frames
//!    that were written after the last sync, truncating a torn tail
//! 3. Count the records between the read and the write cursor
//!
//! A queue directory without metadata and without segments is a fresh queue;
//! its initial metadata is written right away.

use std::{fs::OpenOptions, path::Path};

use snafu::{ResultExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    QueueConfig, Result,
    error::{CorruptQueueSnafu, IoSnafu},
    file::{ReadFrame, SegmentReader},
    metadata::{Cursor, read_metadata, sync_dir, write_metadata},
    path::{scan_segments, segment_path},
};

/// State the IO worker resumes from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryInfo {
    pub cursor: Cursor,
    /// Records between the read and the write cursor.
    pub depth:  u64,
}

/// Result of walking the frames of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanOutcome {
    /// Offset right after the last valid frame.
    pub end:    u64,
    pub frames: u64,
    /// `true` when the scan stopped at the requested limit or exactly at the
    /// end of the file, `false` when it hit a torn or corrupt frame.
    pub clean:  bool,
}

/// Walk frames of the segment at `path` starting at `start`, stopping at
/// `limit` when given, otherwise at the end of the file.
pub(crate) fn scan_frames(path: &Path, start: u64, limit: Option<u64>) -> Result<ScanOutcome> {
    let mut reader = SegmentReader::open(path)?;
    let size = reader.size()?;
    let stop = limit.unwrap_or(size);

    let mut position = start;
    let mut frames = 0u64;

    while position < stop {
        match reader.read_frame(position)? {
            ReadFrame::Frame { next, .. } if next <= stop => {
                position = next;
                frames += 1;
            }
            ReadFrame::Frame { .. } | ReadFrame::Incomplete => {
                debug!(path = ?path, position, "Scan stopped at incomplete frame");
                return Ok(ScanOutcome {
                    end: position,
                    frames,
                    clean: false,
                });
            }
            ReadFrame::Corrupt { reason } => {
                debug!(path = ?path, position, %reason, "Scan stopped at corrupt frame");
                return Ok(ScanOutcome {
                    end: position,
                    frames,
                    clean: false,
                });
            }
        }
    }

    Ok(ScanOutcome {
        end: position,
        frames,
        clean: true,
    })
}

/// Like [`scan_frames`] but steps over frames by their length prefix without
/// reading or checking payloads.
pub(crate) fn count_frames(path: &Path, start: u64, limit: Option<u64>) -> Result<ScanOutcome> {
    let mut reader = SegmentReader::open(path)?;
    let stop = match limit {
        Some(limit) => limit,
        None => reader.size()?,
    };

    let mut position = start;
    let mut frames = 0u64;
    while position < stop {
        match reader.skip_frame(position)? {
            Some(next) if next <= stop => {
                position = next;
                frames += 1;
            }
            _ => {
                return Ok(ScanOutcome {
                    end: position,
                    frames,
                    clean: false,
                });
            }
        }
    }

    Ok(ScanOutcome {
        end: position,
        frames,
        clean: true,
    })
}

/// Open the queue state stored under `config.base_path`.
pub fn recover(config: &QueueConfig) -> Result<RecoveryInfo> {
    let base = &config.base_path;
    info!(queue = %config.name, path = ?base, "Starting queue recovery");

    std::fs::create_dir_all(base).context(IoSnafu { path: base })?;
    let segments = scan_segments(base)?;

    let Some(mut cursor) = read_metadata(&config.name, base)? else {
        ensure!(
            segments.is_empty(),
            CorruptQueueSnafu {
                name:   &config.name,
                reason: format!(
                    "{} segment file(s) present but metadata is missing",
                    segments.len()
                ),
            }
        );

        let cursor = Cursor::default();
        write_metadata(base, &cursor)?;
        info!(queue = %config.name, "No metadata found, starting fresh queue");
        return Ok(RecoveryInfo { cursor, depth: 0 });
    };

    validate_cursor(config, &cursor)?;
    extend_write_cursor(config, &mut cursor)?;
    remove_consumed_segments(config, &segments, cursor.read_segment)?;
    let depth = count_unread(config, &cursor)?;

    write_metadata(base, &cursor)?;

    info!(
        queue = %config.name,
        read_segment = cursor.read_segment,
        read_position = cursor.read_position,
        write_segment = cursor.write_segment,
        write_position = cursor.write_position,
        depth,
        "Recovery from metadata complete"
    );

    Ok(RecoveryInfo { cursor, depth })
}

/// Fail closed when the persisted cursor does not match the files on disk.
fn validate_cursor(config: &QueueConfig, cursor: &Cursor) -> Result<()> {
    let base = &config.base_path;

    ensure!(
        cursor.read_segment < cursor.write_segment
            || (cursor.read_segment == cursor.write_segment
                && cursor.read_position <= cursor.write_position),
        CorruptQueueSnafu {
            name:   &config.name,
            reason: format!("read cursor {cursor:?} is ahead of the write cursor"),
        }
    );

    for segment in cursor.read_segment..=cursor.write_segment {
        let unstarted = segment == cursor.write_segment && cursor.write_position == 0;
        ensure!(
            unstarted || segment_path(base, segment).exists(),
            CorruptQueueSnafu {
                name:   &config.name,
                reason: format!("segment {segment} referenced by metadata is missing"),
            }
        );
    }

    if cursor.read_segment < cursor.write_segment {
        let size = SegmentReader::open(segment_path(base, cursor.read_segment))?.size()?;
        ensure!(
            cursor.read_position <= size,
            CorruptQueueSnafu {
                name:   &config.name,
                reason: format!(
                    "read position {} is past the end of segment {} ({size} bytes)",
                    cursor.read_position, cursor.read_segment
                ),
            }
        );
    }

    if cursor.write_position > 0 {
        let size = SegmentReader::open(segment_path(base, cursor.write_segment))?.size()?;
        ensure!(
            cursor.write_position <= size,
            CorruptQueueSnafu {
                name:   &config.name,
                reason: format!(
                    "segment {} holds {size} bytes but {} were synced",
                    cursor.write_segment, cursor.write_position
                ),
            }
        );
    }

    Ok(())
}

/// Move the write cursor over frames appended after the last sync.
fn extend_write_cursor(config: &QueueConfig, cursor: &mut Cursor) -> Result<()> {
    let base = &config.base_path;

    loop {
        let path = segment_path(base, cursor.write_segment);
        if !path.exists() {
            return Ok(());
        }

        let outcome = scan_frames(&path, cursor.write_position, None)?;
        if outcome.frames > 0 {
            info!(
                queue = %config.name,
                segment = cursor.write_segment,
                frames = outcome.frames,
                "Recovered frames written after the last sync"
            );
        }
        cursor.write_position = outcome.end;

        if !outcome.clean {
            warn!(
                queue = %config.name,
                segment = cursor.write_segment,
                position = outcome.end,
                "Truncating torn tail of write segment"
            );
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|f| f.set_len(outcome.end).and_then(|()| f.sync_all()))
                .context(IoSnafu { path: &path })?;
        }

        let next = cursor.write_segment + 1;
        if !segment_path(base, next).exists() {
            return Ok(());
        }

        if !outcome.clean {
            warn!(
                queue = %config.name,
                segment = next,
                "Ignoring segment that follows a torn segment, it will be overwritten"
            );
            return Ok(());
        }

        cursor.write_segment = next;
        cursor.write_position = 0;
    }
}

/// Delete segments fully consumed before the crash but never unlinked.
fn remove_consumed_segments(config: &QueueConfig, segments: &[u64], read_segment: u64) -> Result<()> {
    let mut removed = false;
    for &segment in segments.iter().filter(|&&s| s < read_segment) {
        let path = segment_path(&config.base_path, segment);
        debug!(queue = %config.name, path = ?path, "Removing consumed segment");
        std::fs::remove_file(&path).context(IoSnafu { path: &path })?;
        removed = true;
    }
    if removed {
        sync_dir(&config.base_path)?;
    }
    Ok(())
}

/// Count the records between the read and the write cursor.
pub(crate) fn count_unread(config: &QueueConfig, cursor: &Cursor) -> Result<u64> {
    let base = &config.base_path;
    let mut depth = 0;

    for segment in cursor.read_segment..=cursor.write_segment {
        let path = segment_path(base, segment);
        if !path.exists() {
            continue;
        }

        let start = if segment == cursor.read_segment {
            cursor.read_position
        } else {
            0
        };
        let limit = (segment == cursor.write_segment).then_some(cursor.write_position);

        let outcome = count_frames(&path, start, limit)?;
        if !outcome.clean {
            warn!(
                queue = %config.name,
                segment,
                position = outcome.end,
                "Unreadable frame inside the unread range, depth is an estimate"
            );
        }
        depth += outcome.frames;
    }

    Ok(depth)
}
