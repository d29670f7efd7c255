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

//! Write handle for the queue.
//!
//! An [`Appender`] validates the payload size, hands the payload to the
//! `IOWorker` and blocks until the frame has been written to the OS. Appenders
//! are cheap to clone and can be used from several threads; the worker
//! serializes the writes.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{Sender, bounded};
use snafu::ensure;

use crate::{
    QueueConfig, QueueError, Result,
    error::{ClosedSnafu, OversizeSnafu},
    message::WriteRequest,
};

#[derive(Clone)]
pub struct Appender {
    tx:     Sender<WriteRequest>,
    config: Arc<QueueConfig>,
}

impl Appender {
    pub(crate) const fn new(tx: Sender<WriteRequest>, config: Arc<QueueConfig>) -> Self {
        Self { tx, config }
    }

    /// Append one record.
    ///
    /// Returns once the frame reached the OS; it is durable after the next
    /// sync. A payload outside `[min_msg_size, max_msg_size]` is rejected
    /// with [`QueueError::Oversize`] and nothing is written.
    ///
    /// # Errors
    ///
    /// `Oversize` for a payload out of bounds, `Closed` once the queue has
    /// been closed, or the I/O error the worker hit while writing.
    pub fn put(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        ensure!(
            self.config.accepts(data.len()),
            OversizeSnafu {
                size: data.len(),
                min:  self.config.min_msg_size,
                max:  self.config.max_msg_size,
            }
        );

        let (reply, reply_rx) = bounded(1);
        ensure!(
            self.tx.send(WriteRequest { data, reply }).is_ok(),
            ClosedSnafu
        );
        reply_rx.recv().map_err(|_| QueueError::Closed)?
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crossbeam::channel::unbounded;

    use super::*;

    fn config(min_msg_size: usize, max_msg_size: usize) -> Arc<QueueConfig> {
        Arc::new(QueueConfig {
            min_msg_size,
            max_msg_size,
            ..QueueConfig::default()
        })
    }

    #[test]
    fn test_put_waits_for_worker_reply() {
        let (tx, rx) = unbounded::<WriteRequest>();
        let appender = Appender::new(tx, config(0, 100));

        let worker = thread::spawn(move || {
            let request = rx.recv().unwrap();
            assert_eq!(request.data, Bytes::from_static(b"payload"));
            request.reply.send(Ok(())).unwrap();
        });

        appender.put(Bytes::from_static(b"payload")).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_oversize_never_reaches_worker() {
        let (tx, rx) = unbounded::<WriteRequest>();
        let appender = Appender::new(tx, config(2, 4));

        assert!(matches!(
            appender.put(vec![0u8; 5]),
            Err(QueueError::Oversize {
                size: 5,
                min: 2,
                max: 4
            })
        ));
        assert!(matches!(
            appender.put(vec![0u8; 1]),
            Err(QueueError::Oversize { size: 1, .. })
        ));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_put_after_worker_gone_is_closed() {
        let (tx, rx) = unbounded::<WriteRequest>();
        let appender = Appender::new(tx, config(0, 100));
        drop(rx);

        assert!(matches!(appender.put(b"late".to_vec()), Err(QueueError::Closed)));
    }

    #[test]
    fn test_dropped_reply_is_closed() {
        let (tx, rx) = unbounded::<WriteRequest>();
        let appender = Appender::new(tx, config(0, 100));

        let worker = thread::spawn(move || drop(rx.recv().unwrap()));

        assert!(matches!(appender.put(b"lost".to_vec()), Err(QueueError::Closed)));
        worker.join().unwrap();
    }
}
