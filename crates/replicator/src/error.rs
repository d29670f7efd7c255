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

use qflow_common_queue::QueueError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReplicatorError {
    #[snafu(display("queue of group {group} failed"))]
    Queue {
        group:  String,
        source: QueueError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("failed to spawn thread {name}"))]
    SpawnThread {
        name:   String,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("thread {name} panicked"))]
    ThreadPanicked {
        name: String,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("failed to build HTTP client for group {group}"))]
    BuildClient {
        group:  String,
        source: crate::transport::TransportError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("endpoint-group {group} has no hosts"))]
    NoHosts {
        group: String,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },
}

impl ReplicatorError {
    /// Whether the group's on-disk queue failed recovery.
    #[must_use]
    pub const fn is_corrupt_queue(&self) -> bool {
        matches!(
            self,
            Self::Queue {
                source: QueueError::CorruptQueue { .. },
                ..
            }
        )
    }

    /// Whether the group's on-disk queue could not be opened or recovered,
    /// for any reason.
    #[must_use]
    pub const fn is_queue_failure(&self) -> bool { matches!(self, Self::Queue { .. }) }
}

pub type Result<T> = std::result::Result<T, ReplicatorError>;
