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

//! Ingest and replication metrics.
//!
//! Components record through the [`MetricsSink`] trait; the binary wires in
//! [`PrometheusMetrics`], which owns its registry instead of using the
//! process-global one.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
    exponential_buckets,
};

pub const ENDPOINT_LABEL: &str = "endpoint";

pub trait MetricsSink: Send + Sync {
    fn ingest_request(&self);
    fn ingest_failure(&self);
    fn endpoint_request(&self, endpoint: &str);
    fn endpoint_success(&self, endpoint: &str);
    fn endpoint_failure(&self, endpoint: &str);
    fn endpoint_latency(&self, endpoint: &str, latency: Duration);
}

pub struct PrometheusMetrics {
    registry:           Registry,
    ingest_requests:    IntCounter,
    ingest_failures:    IntCounter,
    endpoint_requests:  IntCounterVec,
    endpoint_successes: IntCounterVec,
    endpoint_failures:  IntCounterVec,
    endpoint_latency:   HistogramVec,
    panics:             IntCounter,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ingest_requests = IntCounter::new(
            "ingest_requests_total",
            "Total number of inbound requests",
        )?;
        let ingest_failures = IntCounter::new(
            "ingest_failures_total",
            "Inbound requests that could not be read or fanned out",
        )?;
        let endpoint_requests = IntCounterVec::new(
            Opts::new(
                "endpoint_requests_total",
                "Delivery attempts per endpoint-group",
            ),
            &[ENDPOINT_LABEL],
        )?;
        let endpoint_successes = IntCounterVec::new(
            Opts::new(
                "endpoint_successes_total",
                "Attempts that received an HTTP response",
            ),
            &[ENDPOINT_LABEL],
        )?;
        let endpoint_failures = IntCounterVec::new(
            Opts::new(
                "endpoint_failures_total",
                "Attempts that failed at the transport level",
            ),
            &[ENDPOINT_LABEL],
        )?;
        let endpoint_latency = HistogramVec::new(
            HistogramOpts::new(
                "endpoint_latency_us",
                "Delivery latency per endpoint-group in microseconds",
            )
            .buckets(exponential_buckets(0.5, 1.3, 50)?),
            &[ENDPOINT_LABEL],
        )?;
        let panics = IntCounter::new("qflow_panics_total", "Panics caught by the panic hook")?;

        registry.register(Box::new(ingest_requests.clone()))?;
        registry.register(Box::new(ingest_failures.clone()))?;
        registry.register(Box::new(endpoint_requests.clone()))?;
        registry.register(Box::new(endpoint_successes.clone()))?;
        registry.register(Box::new(endpoint_failures.clone()))?;
        registry.register(Box::new(endpoint_latency.clone()))?;
        registry.register(Box::new(panics.clone()))?;

        Ok(Self {
            registry,
            ingest_requests,
            ingest_failures,
            endpoint_requests,
            endpoint_successes,
            endpoint_failures,
            endpoint_latency,
            panics,
        })
    }

    pub const fn registry(&self) -> &Registry { &self.registry }

    /// Counter handed to the panic hook.
    pub fn panic_counter(&self) -> IntCounter { self.panics.clone() }

    /// Render every metric in the Prometheus text format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn ingest_requests(&self) -> u64 { self.ingest_requests.get() }

    pub fn ingest_failures(&self) -> u64 { self.ingest_failures.get() }

    pub fn endpoint_requests(&self, endpoint: &str) -> u64 {
        self.endpoint_requests.with_label_values(&[endpoint]).get()
    }

    pub fn endpoint_successes(&self, endpoint: &str) -> u64 {
        self.endpoint_successes.with_label_values(&[endpoint]).get()
    }

    pub fn endpoint_failures(&self, endpoint: &str) -> u64 {
        self.endpoint_failures.with_label_values(&[endpoint]).get()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn ingest_request(&self) { self.ingest_requests.inc(); }

    fn ingest_failure(&self) { self.ingest_failures.inc(); }

    fn endpoint_request(&self, endpoint: &str) {
        self.endpoint_requests.with_label_values(&[endpoint]).inc();
    }

    fn endpoint_success(&self, endpoint: &str) {
        self.endpoint_successes.with_label_values(&[endpoint]).inc();
    }

    fn endpoint_failure(&self, endpoint: &str) {
        self.endpoint_failures.with_label_values(&[endpoint]).inc();
    }

    #[allow(clippy::cast_precision_loss)]
    fn endpoint_latency(&self, endpoint: &str, latency: Duration) {
        self.endpoint_latency
            .with_label_values(&[endpoint])
            .observe(latency.as_micros() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled_per_endpoint() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.endpoint_request("a");
        metrics.endpoint_request("a");
        metrics.endpoint_failure("b");
        metrics.ingest_request();

        assert_eq!(metrics.endpoint_requests("a"), 2);
        assert_eq!(metrics.endpoint_requests("b"), 0);
        assert_eq!(metrics.endpoint_failures("b"), 1);
        assert_eq!(metrics.ingest_requests(), 1);
    }

    #[test]
    fn test_text_export_names() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.endpoint_success("cluster-a");
        metrics.endpoint_latency("cluster-a", Duration::from_micros(1500));
        metrics.ingest_failure();

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("ingest_requests_total 0"));
        assert!(text.contains("ingest_failures_total 1"));
        assert!(text.contains(r#"endpoint_successes_total{endpoint="cluster-a"} 1"#));
        assert!(text.contains(r#"endpoint_latency_us_count{endpoint="cluster-a"} 1"#));
        assert!(text.contains("qflow_panics_total 0"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = PrometheusMetrics::new().unwrap();
        let second = PrometheusMetrics::new().unwrap();
        first.ingest_request();
        assert_eq!(second.ingest_requests(), 0);
    }
}
