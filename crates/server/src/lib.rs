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

pub mod http;
pub mod ingest;
pub mod metrics;

use std::net::SocketAddr;

use snafu::{ResultExt, Snafu};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum NetworkError {
    #[snafu(display("Failed to bind {addr}"))]
    ConnectionError {
        addr:   String,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse address {addr}"))]
    ParseAddressError {
        addr:   String,
        #[snafu(source)]
        source: std::net::AddrParseError,
    },

    #[snafu(display("Server task on {addr} failed"))]
    ServerTaskError {
        addr:   SocketAddr,
        #[snafu(source)]
        source: tokio::task::JoinError,
    },
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Handle for a running HTTP server.
///
/// The listener is already bound when the handle exists, so
/// [`ServiceHandler::local_addr`] is the real address even for port 0.
pub struct ServiceHandler {
    join_handle:        JoinHandle<()>,
    cancellation_token: CancellationToken,
    local_addr:         SocketAddr,
}

impl ServiceHandler {
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// Waits for the server task to finish. Call [`ServiceHandler::shutdown`]
    /// first.
    pub async fn wait_for_stop(self) -> Result<()> {
        self.join_handle.await.context(ServerTaskSnafu {
            addr: self.local_addr,
        })
    }

    /// Stop accepting connections and let in-flight requests finish.
    pub fn shutdown(&self) { self.cancellation_token.cancel(); }
}
