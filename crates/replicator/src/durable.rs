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

//! Async channel pair backed by a disk queue.
//!
//! ```text
//!   inbound tx ──► writer thread ──put──► Queue ──tailer──► reader thread ──► outbound rx
//! ```
//!
//! Both ends are bounded tokio channels, the two threads block on the queue
//! so async callers never do. Everything sent on the inbound side is on disk
//! before the writer takes the next record.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use qflow_common_queue::{Appender, Queue, QueueBuilder, TailError, Tailer};
use snafu::{OptionExt, ResultExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    Record,
    error::{QueueSnafu, Result, SpawnThreadSnafu, ThreadPanickedSnafu},
};

/// How often the reader checks whether the outbound side went away while the
/// queue is empty.
const READER_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct DurableChannel {
    name:   String,
    queue:  Option<Queue>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl DurableChannel {
    /// Open the queue described by `builder` and start the writer and reader
    /// threads. Returns the channel handle plus the inbound sender and the
    /// outbound receiver, both bounded to `capacity`.
    pub fn open(
        builder: QueueBuilder,
        capacity: usize,
    ) -> Result<(Self, mpsc::Sender<Record>, mpsc::Receiver<Record>)> {
        let name = builder.config().name.clone();
        let queue = builder.build().context(QueueSnafu { group: &name })?;
        let appender = queue.appender().context(QueueSnafu { group: &name })?;

        let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));

        let writer = {
            let name = name.clone();
            let appender = appender.clone();
            let thread_name = format!("{name}-writer");
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || write_loop(&name, in_rx, &appender))
                .context(SpawnThreadSnafu { name: thread_name })?
        };

        let reader = {
            let name = name.clone();
            let tailer = queue.tailer();
            let thread_name = format!("{name}-reader");
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || read_loop(&name, &tailer, &appender, &out_tx))
                .context(SpawnThreadSnafu { name: thread_name })?
        };

        info!(group = %name, depth = queue.depth(), "Durable channel opened");

        Ok((
            Self {
                name,
                queue: Some(queue),
                writer: Some(writer),
                reader: Some(reader),
            },
            in_tx,
            out_rx,
        ))
    }

    pub fn name(&self) -> &str { &self.name }

    /// Records on disk that the reader has not taken yet.
    pub fn depth(&self) -> u64 { self.queue.as_ref().map_or(0, Queue::depth) }

    /// Stop both threads and close the queue.
    ///
    /// Blocks until the outbound receiver and every inbound sender are gone,
    /// so drop those first. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.join().ok().context(ThreadPanickedSnafu {
                name: format!("{}-reader", self.name),
            })?;
        }
        if let Some(writer) = self.writer.take() {
            writer.join().ok().context(ThreadPanickedSnafu {
                name: format!("{}-writer", self.name),
            })?;
        }
        if let Some(mut queue) = self.queue.take() {
            queue.close().context(QueueSnafu { group: &self.name })?;
        }
        info!(group = %self.name, "Durable channel closed");
        Ok(())
    }
}

fn write_loop(name: &str, mut in_rx: mpsc::Receiver<Record>, appender: &Appender) {
    debug!(group = %name, "Writer thread started");

    while let Some(record) = in_rx.blocking_recv() {
        let payload = match record.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(group = %name, url = %record.url, error = %e, "Dropping record that failed to encode");
                continue;
            }
        };

        match appender.put(payload) {
            Ok(()) => {}
            Err(e) if e.is_per_message() => {
                warn!(group = %name, url = %record.url, error = %e, "Dropping record rejected by the queue");
            }
            Err(e) => {
                error!(group = %name, url = %record.url, error = %e, "Failed to persist record");
            }
        }
    }

    debug!(group = %name, "Writer thread stopped");
}

fn read_loop(name: &str, tailer: &Tailer, appender: &Appender, out_tx: &mpsc::Sender<Record>) {
    debug!(group = %name, "Reader thread started");

    loop {
        let payload = match tailer.recv_timeout(READER_POLL_INTERVAL) {
            Ok(payload) => payload,
            Err(TailError::Timeout) if out_tx.is_closed() => break,
            Err(TailError::Timeout) => continue,
            Err(TailError::Closed) => break,
        };

        let record = match Record::decode(&payload) {
            Ok(record) => record,
            Err(e) => {
                error!(group = %name, error = %e, "Dropping record that failed to decode");
                continue;
            }
        };

        if out_tx.blocking_send(record).is_err() {
            // The consumer is gone; the record was already taken off the queue.
            if let Err(e) = appender.put(payload) {
                error!(group = %name, error = %e, "Failed to put record back");
            }
            break;
        }
    }

    debug!(group = %name, "Reader thread stopped");
}
