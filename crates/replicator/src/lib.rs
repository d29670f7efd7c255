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

//! Durable per endpoint-group delivery.
//!
//! Every endpoint-group gets a [`DurableChannel`] (a disk queue with an async
//! channel on each side) and a [`Replicator`] draining it towards the
//! group's hosts.

pub mod durable;
pub mod error;
pub mod metrics;
pub mod record;
pub mod replicate;
pub mod transport;

pub use durable::DurableChannel;
pub use error::{ReplicatorError, Result};
pub use metrics::{MetricsSink, PrometheusMetrics};
pub use record::Record;
pub use replicate::{EndpointGroup, Replicator, RetryDecision, RetryPolicy, UnboundedRetry};
pub use transport::{HttpTransport, TransportError};
