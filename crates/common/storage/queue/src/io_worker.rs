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

//! Background I/O worker owning the segment files of one queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  WriteRequest   ┌──────────────┐   frames    ┌──────────────┐
//! │   Appender   │ ──────────────► │   IOWorker   │ ──────────► │   Segments   │
//! └──────────────┘                 │  (bg thread) │             │   (.data)    │
//! ┌──────────────┐   rendezvous    │              │   cursors   ┌──────────────┐
//! │    Tailer    │ ◄────────────── │              │ ──────────► │  queue.meta  │
//! └──────────────┘                 └──────────────┘             └──────────────┘
//! ```
//!
//! The worker is the only owner of the cursors, so reads and writes never
//! race. It waits on four sources at once: write requests, a sync ticker, the
//! exit signal and, while a record is prefetched, a tailer ready to take it.
//! The read channel has no buffer, so a record counts as consumed exactly
//! when a tailer receives it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Select, SendError, Sender, tick};
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::{
    QueueConfig, Result,
    error::IoSnafu,
    file::{ReadFrame, SegmentReader, SegmentWriter},
    message::{WriteRequest, frame_size},
    metadata::{Cursor, write_metadata},
    path::{quarantine_path, segment_path},
    recovery::count_unread,
};

/// Record at the read cursor, waiting for a tailer.
struct Pending {
    payload: Bytes,
    next:    u64,
}

enum Event {
    Write(Option<WriteRequest>),
    Tick,
    Exit,
    Delivered(std::result::Result<(), SendError<Bytes>>),
}

/// Channels connecting the worker to the [`Queue`](crate::Queue) handles.
pub(crate) struct WorkerChannels {
    pub write_rx: Receiver<WriteRequest>,
    pub read_tx:  Sender<Bytes>,
    pub exit_rx:  Receiver<()>,
}

pub(crate) struct IOWorker {
    config:    Arc<QueueConfig>,
    channels:  WorkerChannels,
    ticker:    Receiver<Instant>,
    cursor:    Cursor,
    depth:     Arc<AtomicU64>,
    writer:    Option<SegmentWriter>,
    /// Reader for `cursor.read_segment`.
    reader:    Option<SegmentReader>,
    pending:   Option<Pending>,
    /// Reads and writes since the last sync.
    unsynced:  u64,
    delivered: u64,
}

impl IOWorker {
    pub(crate) fn new(
        config: Arc<QueueConfig>,
        channels: WorkerChannels,
        cursor: Cursor,
        depth: Arc<AtomicU64>,
    ) -> Self {
        let ticker = tick(config.sync_timeout);
        Self {
            config,
            channels,
            ticker,
            cursor,
            depth,
            writer: None,
            reader: None,
            pending: None,
            unsynced: 0,
            delivered: 0,
        }
    }

    /// Serve requests until the exit signal fires, then sync and stop.
    pub(crate) fn run(&mut self) {
        info!(queue = %self.config.name, "IOWorker starting");

        loop {
            if self.pending.is_none()
                && let Err(e) = self.prefetch()
            {
                error!(queue = %self.config.name, error = %e, "Failed to read next record");
            }

            match self.next_event() {
                Event::Write(Some(request)) => self.handle_write(request),
                Event::Write(None) => {
                    debug!(queue = %self.config.name, "All appenders dropped");
                    break;
                }
                Event::Tick => {
                    if self.unsynced > 0
                        && let Err(e) = self.sync()
                    {
                        error!(queue = %self.config.name, error = %e, "Periodic sync failed");
                    }
                }
                Event::Exit => break,
                Event::Delivered(Ok(())) => self.commit_read(),
                Event::Delivered(Err(_)) => {
                    debug!(queue = %self.config.name, "No tailer left to take the record");
                }
            }
        }

        let drained: Vec<WriteRequest> = self.channels.write_rx.try_iter().collect();
        for request in drained {
            self.handle_write(request);
        }

        if let Err(e) = self.sync() {
            error!(queue = %self.config.name, error = %e, "Final sync failed");
        }

        info!(
            queue = %self.config.name,
            depth = self.depth.load(Ordering::Relaxed),
            delivered = self.delivered,
            "IOWorker stopped"
        );
    }

    fn next_event(&self) -> Event {
        let mut sel = Select::new();
        let write_idx = sel.recv(&self.channels.write_rx);
        let tick_idx = sel.recv(&self.ticker);
        let exit_idx = sel.recv(&self.channels.exit_rx);
        let read_idx = self
            .pending
            .as_ref()
            .map(|_| sel.send(&self.channels.read_tx));

        let oper = sel.select();
        let index = oper.index();
        if index == write_idx {
            Event::Write(oper.recv(&self.channels.write_rx).ok())
        } else if index == tick_idx {
            let _ = oper.recv(&self.ticker);
            Event::Tick
        } else if index == exit_idx {
            let _ = oper.recv(&self.channels.exit_rx);
            Event::Exit
        } else {
            debug_assert_eq!(Some(index), read_idx);
            let payload = self
                .pending
                .as_ref()
                .map(|p| p.payload.clone())
                .unwrap_or_default();
            Event::Delivered(oper.send(&self.channels.read_tx, payload))
        }
    }

    fn handle_write(&mut self, request: WriteRequest) {
        let result = self.append(&request.data);
        if let Err(e) = &result {
            error!(queue = %self.config.name, error = %e, "Failed to append record");
        }
        // The caller may have given up waiting.
        let _ = request.reply.send(result);
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.rotate_if_needed(frame_size(data.len()))?;

        let writer = self.ensure_writer()?;
        let position = match writer.append(data) {
            Ok(_) => writer.position(),
            Err(e) => {
                // Reopening at the cursor truncates whatever part of the
                // frame reached the file.
                self.writer = None;
                return Err(e);
            }
        };
        self.cursor.write_position = position;
        self.depth.fetch_add(1, Ordering::Relaxed);

        self.note_op()
    }

    /// Start a new segment when the next frame would overflow the active one.
    fn rotate_if_needed(&mut self, frame: u64) -> Result<()> {
        if self.cursor.write_position == 0
            || self.cursor.write_position + frame <= self.config.max_bytes_per_file
        {
            return Ok(());
        }

        if let Some(writer) = self.writer.take() {
            writer.sync()?;
        }
        self.cursor.write_segment += 1;
        self.cursor.write_position = 0;
        self.sync()?;

        info!(
            queue = %self.config.name,
            segment = self.cursor.write_segment,
            "Rotated to new segment"
        );
        Ok(())
    }

    fn ensure_writer(&mut self) -> Result<&mut SegmentWriter> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                let path = segment_path(&self.config.base_path, self.cursor.write_segment);
                debug!(queue = %self.config.name, path = ?path, "Opening write segment");
                SegmentWriter::open(path, self.cursor.write_position)?
            }
        };
        Ok(self.writer.insert(writer))
    }

    /// Load the record at the read cursor into `pending`.
    fn prefetch(&mut self) -> Result<()> {
        loop {
            if !self.cursor.has_unread() {
                return Ok(());
            }

            let reader = match self.reader.take() {
                Some(reader) => reader,
                None => SegmentReader::open(segment_path(
                    &self.config.base_path,
                    self.cursor.read_segment,
                ))?,
            };
            let reader = self.reader.insert(reader);

            if self.cursor.read_segment < self.cursor.write_segment
                && reader.at_end(self.cursor.read_position)?
            {
                self.finish_read_segment()?;
                continue;
            }

            match reader.read_frame(self.cursor.read_position)? {
                ReadFrame::Frame { payload, next } => {
                    self.pending = Some(Pending { payload, next });
                    return Ok(());
                }
                ReadFrame::Incomplete => {
                    self.quarantine_read_segment("frame extends past the end of the segment")?;
                }
                ReadFrame::Corrupt { reason } => self.quarantine_read_segment(&reason)?,
            }
        }
    }

    fn commit_read(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.cursor.read_position = pending.next;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.delivered += 1;

        if let Err(e) = self.note_op() {
            error!(queue = %self.config.name, error = %e, "Sync after read failed");
        }
    }

    /// Move past a fully consumed segment and delete it once the new cursor
    /// is on disk.
    fn finish_read_segment(&mut self) -> Result<()> {
        let consumed = self.cursor.read_segment;
        self.reader = None;
        self.cursor.read_segment += 1;
        self.cursor.read_position = 0;
        self.sync()?;

        let path = segment_path(&self.config.base_path, consumed);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(queue = %self.config.name, path = ?path, error = %e, "Failed to remove consumed segment");
        } else {
            debug!(queue = %self.config.name, segment = consumed, "Removed consumed segment");
        }
        Ok(())
    }

    /// Take a segment with an unreadable frame out of rotation.
    fn quarantine_read_segment(&mut self, reason: &str) -> Result<()> {
        let segment = self.cursor.read_segment;
        error!(
            queue = %self.config.name,
            segment,
            position = self.cursor.read_position,
            %reason,
            "Corrupt frame, quarantining segment"
        );

        self.reader = None;
        if segment == self.cursor.write_segment {
            self.writer = None;
            self.cursor.write_segment += 1;
            self.cursor.write_position = 0;
        }
        self.cursor.read_segment = segment + 1;
        self.cursor.read_position = 0;
        self.sync()?;

        let from = segment_path(&self.config.base_path, segment);
        let to = quarantine_path(&self.config.base_path, segment);
        std::fs::rename(&from, &to).context(IoSnafu { path: &from })?;

        let depth = count_unread(&self.config, &self.cursor)?;
        self.depth.store(depth, Ordering::Relaxed);
        warn!(queue = %self.config.name, path = ?to, depth, "Segment quarantined");
        Ok(())
    }

    fn note_op(&mut self) -> Result<()> {
        self.unsynced += 1;
        if self.unsynced >= self.config.sync_every {
            self.sync()?;
        }
        Ok(())
    }

    /// fsync the active segment, then persist both cursors.
    fn sync(&mut self) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.sync()?;
        }
        write_metadata(&self.config.base_path, &self.cursor)?;
        self.unsynced = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam::channel::{bounded, unbounded};
    use tempfile::TempDir;

    use super::*;
    use crate::metadata::read_metadata;

    struct WorkerFixture {
        _temp_dir: TempDir,
        config:    Arc<QueueConfig>,
        worker:    IOWorker,
        _write_tx: Sender<WriteRequest>,
        read_rx:   Receiver<Bytes>,
        _exit_tx:  Sender<()>,
    }

    impl WorkerFixture {
        fn new(max_bytes_per_file: u64, sync_every: u64) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let config = Arc::new(QueueConfig {
                name: "worker".to_string(),
                base_path: temp_dir.path().to_path_buf(),
                max_bytes_per_file,
                max_msg_size: 64,
                sync_every,
                sync_timeout: Duration::from_secs(60),
                ..QueueConfig::default()
            });
            let (write_tx, write_rx) = unbounded();
            let (read_tx, read_rx) = bounded(0);
            let (exit_tx, exit_rx) = bounded(0);
            let worker = IOWorker::new(
                config.clone(),
                WorkerChannels {
                    write_rx,
                    read_tx,
                    exit_rx,
                },
                Cursor::default(),
                Arc::new(AtomicU64::new(0)),
            );
            Self {
                _temp_dir: temp_dir,
                config,
                worker,
                _write_tx: write_tx,
                read_rx,
                _exit_tx: exit_tx,
            }
        }
    }

    #[test]
    fn test_append_advances_write_cursor() {
        let mut fixture = WorkerFixture::new(1024, 1000);
        fixture.worker.append(b"hello").unwrap();
        fixture.worker.append(b"world").unwrap();

        assert_eq!(fixture.worker.cursor.write_position, frame_size(5) * 2);
        assert_eq!(fixture.worker.depth.load(Ordering::Relaxed), 2);
        assert_eq!(fixture.worker.unsynced, 2);
    }

    #[test]
    fn test_rotation_keeps_segments_within_limit() {
        let mut fixture = WorkerFixture::new(64, 1000);
        for _ in 0..10 {
            fixture.worker.append(&[7u8; 20]).unwrap();
        }

        // Two 28 byte frames fit into 64 bytes, a third does not.
        assert_eq!(fixture.worker.cursor.write_segment, 4);
        for segment in 0..=4 {
            let len = std::fs::metadata(segment_path(&fixture.config.base_path, segment))
                .unwrap()
                .len();
            assert!(len <= 64, "segment {segment} is {len} bytes");
        }
    }

    #[test]
    fn test_sync_every_writes_metadata() {
        let mut fixture = WorkerFixture::new(1024, 2);
        fixture.worker.append(b"a").unwrap();
        assert!(read_metadata("worker", &fixture.config.base_path)
            .unwrap()
            .is_none());

        fixture.worker.append(b"b").unwrap();
        let cursor = read_metadata("worker", &fixture.config.base_path)
            .unwrap()
            .unwrap();
        assert_eq!(cursor.write_position, frame_size(1) * 2);
        assert_eq!(fixture.worker.unsynced, 0);
    }

    #[test]
    fn test_prefetch_crosses_segments_and_removes_consumed() {
        let mut fixture = WorkerFixture::new(32, 1000);
        fixture.worker.append(&[1u8; 10]).unwrap();
        fixture.worker.append(&[2u8; 10]).unwrap();
        assert_eq!(fixture.worker.cursor.write_segment, 1);

        fixture.worker.prefetch().unwrap();
        assert_eq!(fixture.worker.pending.as_ref().unwrap().payload[0], 1);
        fixture.worker.commit_read();

        fixture.worker.prefetch().unwrap();
        assert_eq!(fixture.worker.pending.as_ref().unwrap().payload[0], 2);
        assert_eq!(fixture.worker.cursor.read_segment, 1);
        assert!(!segment_path(&fixture.config.base_path, 0).exists());

        fixture.worker.commit_read();
        assert_eq!(fixture.worker.depth.load(Ordering::Relaxed), 0);
        fixture.worker.prefetch().unwrap();
        assert!(fixture.worker.pending.is_none());
        assert!(fixture.read_rx.is_empty());
    }

    #[test]
    fn test_corrupt_frame_quarantines_segment() {
        let mut fixture = WorkerFixture::new(1024, 1000);
        fixture.worker.append(b"first").unwrap();
        fixture.worker.append(b"second").unwrap();
        fixture.worker.writer = None;

        let path = segment_path(&fixture.config.base_path, 0);
        let mut data = std::fs::read(&path).unwrap();
        data[5] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        fixture.worker.prefetch().unwrap();
        assert!(fixture.worker.pending.is_none());
        assert!(quarantine_path(&fixture.config.base_path, 0).exists());
        assert_eq!(fixture.worker.cursor.read_segment, 1);
        assert_eq!(fixture.worker.cursor.write_segment, 1);
        assert_eq!(fixture.worker.depth.load(Ordering::Relaxed), 0);

        fixture.worker.append(b"after").unwrap();
        fixture.worker.prefetch().unwrap();
        assert_eq!(
            fixture.worker.pending.as_ref().unwrap().payload.as_ref(),
            b"after"
        );
    }
}
