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

//! Main queue struct and lifecycle management.
//!
//! ## Usage
//!
//! ```ignore
//! let mut queue = QueueBuilder::new("/path/to/queue").name("orders").build()?;
//!
//! queue.put(b"hello".as_slice())?;
//!
//! let tailer = queue.tailer();
//! let record = tailer.recv_timeout(Duration::from_secs(1))?;
//!
//! queue.close()?;
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use snafu::{OptionExt, ResultExt};
use tracing::{info, warn};

use crate::{
    QueueConfig, Result,
    appender::Appender,
    error::{ClosedSnafu, InternalSnafu, IoSnafu},
    io_worker::{IOWorker, WorkerChannels},
    message::WriteRequest,
    recovery::{RecoveryInfo, recover},
    tailer::Tailer,
};

/// A persistent FIFO queue backed by segment files in one directory.
pub struct Queue {
    config:           Arc<QueueConfig>,
    /// `None` after close.
    write_tx:         Option<Sender<WriteRequest>>,
    read_rx:          Receiver<Bytes>,
    /// Dropping it tells the worker to stop.
    exit_tx:          Option<Sender<()>>,
    depth:            Arc<AtomicU64>,
    io_worker_handle: Option<JoinHandle<()>>,
}

impl Queue {
    /// Recover the queue directory and start its IO worker.
    pub(crate) fn open(config: QueueConfig) -> Result<Self> {
        let config = Arc::new(config);
        let RecoveryInfo { cursor, depth } = recover(&config)?;

        let (write_tx, write_rx) = unbounded();
        let (read_tx, read_rx) = bounded(0);
        let (exit_tx, exit_rx) = bounded(0);
        let depth = Arc::new(AtomicU64::new(depth));

        let mut worker = IOWorker::new(
            config.clone(),
            WorkerChannels {
                write_rx,
                read_tx,
                exit_rx,
            },
            cursor,
            depth.clone(),
        );
        let io_worker_handle = thread::Builder::new()
            .name(format!("queue-io-{}", config.name))
            .spawn(move || worker.run())
            .context(IoSnafu {
                path: &config.base_path,
            })?;

        info!(
            queue = %config.name,
            path = ?config.base_path,
            depth = depth.load(Ordering::Relaxed),
            "Queue opened"
        );

        Ok(Self {
            config,
            write_tx: Some(write_tx),
            read_rx,
            exit_tx: Some(exit_tx),
            depth,
            io_worker_handle: Some(io_worker_handle),
        })
    }

    /// Create a write handle.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub fn appender(&self) -> Result<Appender> {
        let tx = self.write_tx.clone().context(ClosedSnafu)?;
        Ok(Appender::new(tx, self.config.clone()))
    }

    /// Append one record, see [`Appender::put`].
    ///
    /// # Errors
    ///
    /// Same as [`Appender::put`].
    pub fn put(&self, data: impl Into<Bytes>) -> Result<()> { self.appender()?.put(data) }

    /// Create a read handle. Tailers share the records between them.
    #[must_use]
    pub fn tailer(&self) -> Tailer { Tailer::new(self.read_rx.clone()) }

    /// Records appended but not yet handed to a tailer.
    #[must_use]
    pub fn depth(&self) -> u64 { self.depth.load(Ordering::Relaxed) }

    #[must_use]
    pub fn config(&self) -> &QueueConfig { &self.config }

    /// Stop the IO worker after a final sync of data and metadata.
    ///
    /// Blocked tailers wake up with `Closed`; later puts fail with `Closed`.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the IO worker thread panicked.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.io_worker_handle.take() else {
            return Ok(());
        };
        info!(queue = %self.config.name, "Closing queue");

        self.exit_tx.take();
        self.write_tx.take();

        handle.join().map_err(|_| {
            InternalSnafu {
                message: format!("IO worker of queue {} panicked", self.config.name),
            }
            .build()
        })?;

        info!(queue = %self.config.name, "Queue closed");
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(queue = %self.config.name, error = %e, "Failed to close queue on drop");
        }
    }
}
