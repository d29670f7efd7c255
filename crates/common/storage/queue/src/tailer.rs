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

//! Read handle for the queue.
//!
//! A [`Tailer`] receives records from the `IOWorker` in append order. Every
//! record is delivered to exactly one tailer, and it counts as consumed once
//! received, so a record taken by a tailer is not replayed after a restart.

use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use snafu::Snafu;

/// Why [`Tailer::recv_timeout`] returned without a record.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TailError {
    #[snafu(display("no record within the timeout"))]
    Timeout,
    #[snafu(display("queue is closed"))]
    Closed,
}

pub struct Tailer {
    rx: Receiver<Bytes>,
}

impl Tailer {
    pub(crate) const fn new(rx: Receiver<Bytes>) -> Self { Self { rx } }

    /// Block until the next record arrives, `None` once the queue is closed.
    pub fn recv(&self) -> Option<Bytes> { self.rx.recv().ok() }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// `Timeout` when nothing arrived in time, `Closed` once the queue is
    /// closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Bytes, TailError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => TailError::Timeout,
            RecvTimeoutError::Disconnected => TailError::Closed,
        })
    }
}

impl Iterator for Tailer {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> { self.recv() }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crossbeam::channel::bounded;

    use super::*;

    #[test]
    fn test_iterates_until_closed() {
        let (tx, rx) = bounded(0);
        let tailer = Tailer::new(rx);

        let producer = thread::spawn(move || {
            for i in 0..3u8 {
                tx.send(Bytes::from(vec![i])).unwrap();
            }
        });

        let records: Vec<Bytes> = tailer.collect();
        producer.join().unwrap();
        assert_eq!(records, vec![Bytes::from(vec![0]), Bytes::from(vec![1]), Bytes::from(vec![2])]);
    }

    #[test]
    fn test_recv_timeout_distinguishes_timeout_and_close() {
        let (tx, rx) = bounded::<Bytes>(0);
        let tailer = Tailer::new(rx);

        assert_eq!(
            tailer.recv_timeout(Duration::from_millis(10)),
            Err(TailError::Timeout)
        );
        drop(tx);
        assert_eq!(
            tailer.recv_timeout(Duration::from_millis(10)),
            Err(TailError::Closed)
        );
    }
}
