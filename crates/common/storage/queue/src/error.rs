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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Filesystem I/O failure on a queue file.
    #[snafu(display("IO error on {}", path.display()))]
    Io {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Payload length outside `[min_msg_size, max_msg_size]`.
    #[snafu(display("invalid message size {size}, must be between {min} and {max}"))]
    Oversize { size: usize, min: usize, max: usize },

    /// On-disk state cannot be trusted; the queue refuses to open.
    #[snafu(display("queue {name} is corrupt: {reason}"))]
    CorruptQueue { name: String, reason: String },

    /// Rejected queue configuration.
    #[snafu(display("invalid queue config: {reason}"))]
    InvalidConfig { reason: String },

    /// The IO worker is gone, either closed or crashed.
    #[snafu(display("queue is closed"))]
    Closed,

    #[snafu(display("internal queue error: {message}"))]
    Internal { message: String },
}

impl QueueError {
    /// Errors that describe a single payload rather than the queue itself.
    #[must_use]
    pub const fn is_per_message(&self) -> bool { matches!(self, Self::Oversize { .. }) }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
