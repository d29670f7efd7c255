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

//! Per endpoint-group delivery worker.
//!
//! A [`Replicator`] drains the outbound side of its group's
//! [`DurableChannel`](crate::durable::DurableChannel), sends every record to
//! the group's hosts in round-robin order and hands transport failures to a
//! [`RetryPolicy`]. Any HTTP response, whatever the status, counts as
//! delivered.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use snafu::{ResultExt, Snafu, ensure};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::{Position, Url};

use crate::{
    Record,
    error::{BuildClientSnafu, NoHostsSnafu, Result},
    metrics::MetricsSink,
    transport::{HttpTransport, TransportError},
};

/// Records between two progress lines in the debug log.
const PROGRESS_INTERVAL: u64 = 1000;

/// A named cluster of downstream hosts sharing one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointGroup {
    pub name:    String,
    /// Absolute `http`/`https` origins.
    pub hosts:   Vec<Url>,
    /// Timeout of one outbound request.
    pub timeout: Duration,
}

/// Hands out host indices in strict rotation, starting at zero.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    counter: usize,
    len:     usize,
}

impl RoundRobin {
    /// `len` must be non-zero.
    pub const fn new(len: usize) -> Self { Self { counter: 0, len } }

    pub const fn next_index(&mut self) -> usize {
        let index = self.counter % self.len;
        self.counter = self.counter.wrapping_add(1);
        index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Append the record to the tail of the group's queue again.
    Requeue,
    Drop,
}

/// Decides what happens to a record whose delivery failed below HTTP.
pub trait RetryPolicy: Send + Sync {
    fn on_transport_error(
        &self,
        group: &str,
        record: &Record,
        error: &TransportError,
    ) -> RetryDecision;
}

/// Requeue every failed record, forever, without backoff.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedRetry;

impl RetryPolicy for UnboundedRetry {
    fn on_transport_error(&self, _: &str, _: &Record, _: &TransportError) -> RetryDecision {
        RetryDecision::Requeue
    }
}

/// Why a record could not be turned into an outbound request.
#[derive(Debug, Snafu)]
pub enum InvalidRequest {
    #[snafu(display("invalid method {method:?}"))]
    Method {
        method: String,
        source: http::method::InvalidMethod,
    },

    #[snafu(display("invalid target {target}"))]
    Target {
        target: String,
        source: http::Error,
    },

    #[snafu(display("url {url:?} is not a path"))]
    NotAPath { url: String },
}

/// Put a record's path and query behind a host's scheme, authority and base
/// path. The record's part is kept byte for byte.
pub fn target_uri(host: &Url, path_and_query: &str) -> std::result::Result<Uri, InvalidRequest> {
    ensure!(
        path_and_query.starts_with('/'),
        NotAPathSnafu {
            url: path_and_query,
        }
    );
    let base = host.path().trim_end_matches('/');
    let target = format!("{base}{path_and_query}");
    Uri::builder()
        .scheme(host.scheme())
        .authority(&host[Position::BeforeHost..Position::AfterPort])
        .path_and_query(target.as_str())
        .build()
        .context(TargetSnafu { target })
}

#[derive(Debug)]
enum Delivery {
    Delivered { status: StatusCode },
    Failed(TransportError),
    Invalid(InvalidRequest),
}

pub struct Replicator {
    group:     EndpointGroup,
    transport: HttpTransport,
    balancer:  RoundRobin,
    /// Inbound side of the group's own channel, used for requeueing.
    inbound:   mpsc::Sender<Record>,
    outbound:  mpsc::Receiver<Record>,
    metrics:   Arc<dyn MetricsSink>,
    retry:     Arc<dyn RetryPolicy>,
    processed: u64,
}

impl Replicator {
    pub fn new(
        group: EndpointGroup,
        inbound: mpsc::Sender<Record>,
        outbound: mpsc::Receiver<Record>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        ensure!(!group.hosts.is_empty(), NoHostsSnafu { group: &group.name });

        let transport =
            HttpTransport::new(group.timeout).context(BuildClientSnafu { group: &group.name })?;

        Ok(Self {
            balancer: RoundRobin::new(group.hosts.len()),
            group,
            transport,
            inbound,
            outbound,
            metrics,
            retry: Arc::new(UnboundedRetry),
            processed: 0,
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Deliver records until `cancel` fires or the outbound channel ends.
    ///
    /// On cancellation the record in flight and everything still buffered in
    /// the outbound channel go back onto the queue.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(group = %self.group.name, hosts = self.group.hosts.len(), "Replicator started");

        loop {
            let record = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                record = self.outbound.recv() => match record {
                    Some(record) => record,
                    None => {
                        info!(group = %self.group.name, "Outbound channel closed");
                        break;
                    }
                },
            };

            let index = self.balancer.next_index();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                outcome = self.deliver(index, &record) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                self.requeue(record).await;
                break;
            };

            self.settle(outcome, record).await;
        }

        self.requeue_buffered().await;
        info!(group = %self.group.name, processed = self.processed, "Replicator stopped");
    }

    async fn deliver(&self, index: usize, record: &Record) -> Delivery {
        let host = &self.group.hosts[index];
        let method = match Method::from_bytes(record.method.as_bytes()).context(MethodSnafu {
            method: &record.method,
        }) {
            Ok(method) => method,
            Err(e) => return Delivery::Invalid(e),
        };
        let target = match target_uri(host, &record.url) {
            Ok(target) => target,
            Err(e) => return Delivery::Invalid(e),
        };

        self.metrics.endpoint_request(&self.group.name);
        let started = Instant::now();
        let delivery = match self
            .transport
            .send(method, target, Bytes::copy_from_slice(&record.body))
            .await
        {
            Ok(status) => Delivery::Delivered { status },
            Err(e) => Delivery::Failed(e),
        };
        self.metrics
            .endpoint_latency(&self.group.name, started.elapsed());
        delivery
    }

    async fn settle(&mut self, outcome: Delivery, record: Record) {
        match outcome {
            Delivery::Delivered { status } => {
                self.metrics.endpoint_success(&self.group.name);
                debug!(group = %self.group.name, url = %record.url, %status, "Delivered");
            }
            Delivery::Failed(e) => {
                self.metrics.endpoint_failure(&self.group.name);
                debug!(group = %self.group.name, url = %record.url, error = %e, "Delivery failed");
                match self.retry.on_transport_error(&self.group.name, &record, &e) {
                    RetryDecision::Requeue => self.requeue(record).await,
                    RetryDecision::Drop => {
                        warn!(group = %self.group.name, url = %record.url, "Dropping record after failed delivery");
                    }
                }
            }
            Delivery::Invalid(e) => {
                warn!(group = %self.group.name, url = %record.url, error = %e, "Dropping record that cannot form a request");
            }
        }

        self.processed += 1;
        if self.processed % PROGRESS_INTERVAL == 0 {
            debug!(group = %self.group.name, processed = self.processed, "Replication progress");
        }
    }

    async fn requeue(&self, record: Record) {
        if let Err(e) = self.inbound.send(record).await {
            error!(group = %self.group.name, url = %e.0.url, "Failed to requeue record, inbound channel closed");
        }
    }

    async fn requeue_buffered(&mut self) {
        self.outbound.close();
        let mut requeued = 0usize;
        while let Some(record) = self.outbound.recv().await {
            self.requeue(record).await;
            requeued += 1;
        }
        if requeued > 0 {
            info!(group = %self.group.name, requeued, "Requeued buffered records");
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_round_robin_starts_at_first_host() {
        let mut balancer = RoundRobin::new(3);
        let picked: Vec<_> = (0..7).map(|_| balancer.next_index()).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test_case(1, 5 ; "single host")]
    #[test_case(2, 10 ; "even split")]
    #[test_case(3, 10 ; "uneven split")]
    #[test_case(7, 100 ; "many hosts")]
    fn test_round_robin_fairness(hosts: usize, deliveries: usize) {
        let mut balancer = RoundRobin::new(hosts);
        let mut counts = vec![0usize; hosts];
        for _ in 0..deliveries {
            counts[balancer.next_index()] += 1;
        }
        let floor = deliveries / hosts;
        let ceil = deliveries.div_ceil(hosts);
        assert!(counts.iter().all(|&c| c == floor || c == ceil), "{counts:?}");
    }

    #[test_case("http://10.0.0.1:8080", "/x?y=1", "http://10.0.0.1:8080/x?y=1" ; "origin")]
    #[test_case("http://10.0.0.1:8080/", "/x", "http://10.0.0.1:8080/x" ; "trailing slash")]
    #[test_case("https://example.com/api/", "/v1/items", "https://example.com/api/v1/items" ; "host with path")]
    #[test_case("http://10.0.0.1:8080", "/a/../b", "http://10.0.0.1:8080/a/../b" ; "parent segment kept")]
    #[test_case("http://10.0.0.1:8080", "/a/./b", "http://10.0.0.1:8080/a/./b" ; "current segment kept")]
    #[test_case("http://10.0.0.1", "/a%2Fb?q=%2e%2e", "http://10.0.0.1/a%2Fb?q=%2e%2e" ; "escapes kept")]
    #[test_case("http://user:pw@[::1]:9000", "/x", "http://[::1]:9000/x" ; "ipv6 without userinfo")]
    fn test_target_uri(host: &str, path: &str, expected: &str) {
        let host = Url::parse(host).unwrap();
        assert_eq!(target_uri(&host, path).unwrap().to_string(), expected);
    }

    #[test]
    fn test_target_uri_rejects_non_path() {
        let host = Url::parse("http://10.0.0.1:8080").unwrap();
        assert!(matches!(
            target_uri(&host, "*"),
            Err(InvalidRequest::NotAPath { .. })
        ));
    }

    #[test]
    fn test_group_without_hosts_is_rejected() {
        let (inbound, _) = mpsc::channel(1);
        let (_, outbound) = mpsc::channel(1);
        let metrics: Arc<dyn MetricsSink> =
            Arc::new(crate::metrics::PrometheusMetrics::new().unwrap());
        let group = EndpointGroup {
            name:    "empty".to_string(),
            hosts:   Vec::new(),
            timeout: Duration::from_secs(1),
        };
        let err = Replicator::new(group, inbound, outbound, metrics).err().unwrap();
        assert!(matches!(err, crate::error::ReplicatorError::NoHosts { .. }));
    }

    #[tokio::test]
    async fn test_cancel_requeues_buffered_records() {
        let (inbound, mut requeued) = mpsc::channel(8);
        let (out_tx, outbound) = mpsc::channel(8);
        let metrics: Arc<dyn MetricsSink> =
            Arc::new(crate::metrics::PrometheusMetrics::new().unwrap());
        let group = EndpointGroup {
            name:    "g".to_string(),
            hosts:   vec![Url::parse("http://127.0.0.1:1").unwrap()],
            timeout: Duration::from_secs(1),
        };
        let replicator = Replicator::new(group, inbound, outbound, metrics).unwrap();

        for i in 0..3 {
            out_tx
                .send(Record::new("POST", format!("/{i}"), Vec::new()))
                .await
                .unwrap();
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        replicator.run(cancel).await;

        let mut urls = Vec::new();
        while let Ok(record) = requeued.try_recv() {
            urls.push(record.url);
        }
        assert_eq!(urls, vec!["/0", "/1", "/2"]);
    }
}
