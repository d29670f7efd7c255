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

//! Catch-all route turning every inbound request into a [`Record`] for each
//! endpoint-group.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use qflow_replicator::{MetricsSink, Record};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Inbound side of one endpoint-group.
#[derive(Clone)]
pub struct GroupSender {
    name:       String,
    tx:         mpsc::Sender<Record>,
    /// Cancelled once the group's replicator died; ingest then skips it.
    quarantine: CancellationToken,
}

impl GroupSender {
    pub fn new(
        name: impl Into<String>,
        tx: mpsc::Sender<Record>,
        quarantine: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            tx,
            quarantine,
        }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn is_quarantined(&self) -> bool { self.quarantine.is_cancelled() }
}

#[derive(Clone)]
pub struct IngestState {
    groups:  Arc<[GroupSender]>,
    metrics: Arc<dyn MetricsSink>,
}

impl IngestState {
    pub fn new(groups: Vec<GroupSender>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            groups: groups.into(),
            metrics,
        }
    }
}

/// Install the ingest handler as the router's fallback, so it sees every
/// method and path no other route claims.
pub fn ingest_routes(state: IngestState) -> impl Fn(Router) -> Router + Send + Sync + 'static {
    move |router: Router| router.merge(Router::new().fallback(ingest).with_state(state.clone()))
}

async fn ingest(
    State(state): State<IngestState>,
    method: Method,
    uri: Uri,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    state.metrics.ingest_request();

    let body = match body {
        Ok(body) => body,
        Err(e) => {
            state.metrics.ingest_failure();
            debug!(%method, %uri, error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "can't read body").into_response();
        }
    };

    let url = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), ToString::to_string);
    let record = Record::new(method.as_str(), url, body);

    for group in state.groups.iter() {
        if group.is_quarantined() {
            continue;
        }
        if group.tx.send(record.clone()).await.is_err() {
            state.metrics.ingest_failure();
            error!(group = %group.name, url = %record.url, "Group channel closed, record not queued");
        }
    }

    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use qflow_common_telemetry::logging::init_default_ut_logging;
    use qflow_replicator::PrometheusMetrics;

    use super::*;
    use crate::{
        ServiceHandler,
        http::{RestServerConfig, start_rest_server},
    };

    struct Fixture {
        handler: ServiceHandler,
        metrics: Arc<PrometheusMetrics>,
    }

    impl Fixture {
        async fn start(groups: Vec<GroupSender>, max_body_size: usize) -> Self {
            init_default_ut_logging();
            let metrics = Arc::new(PrometheusMetrics::new().unwrap());
            let state = IngestState::new(groups, metrics.clone());
            let config = RestServerConfig::builder()
                .bind_address("127.0.0.1:0".to_string())
                .max_body_size(max_body_size)
                .build();
            let handler = start_rest_server(config, vec![ingest_routes(state)])
                .await
                .unwrap();
            Self { handler, metrics }
        }

        fn addr(&self) -> SocketAddr { self.handler.local_addr() }

        async fn stop(self) {
            self.handler.shutdown();
            self.handler.wait_for_stop().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_request_fans_out_to_every_group() {
        let (a_tx, mut a_rx) = mpsc::channel(4);
        let (b_tx, mut b_rx) = mpsc::channel(4);
        let fixture = Fixture::start(
            vec![
                GroupSender::new("a", a_tx, CancellationToken::new()),
                GroupSender::new("b", b_tx, CancellationToken::new()),
            ],
            1024,
        )
        .await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/x?y=1", fixture.addr()))
            .body("abc")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let expected = Record::new("POST", "/x?y=1", b"abc".to_vec());
        assert_eq!(a_rx.recv().await.unwrap(), expected);
        assert_eq!(b_rx.recv().await.unwrap(), expected);
        assert_eq!(fixture.metrics.ingest_requests(), 1);
        assert_eq!(fixture.metrics.ingest_failures(), 0);
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_any_method_and_path_is_accepted() {
        let (tx, mut rx) = mpsc::channel(4);
        let fixture = Fixture::start(
            vec![GroupSender::new("a", tx, CancellationToken::new())],
            1024,
        )
        .await;

        let client = reqwest::Client::new();
        let response = client
            .delete(format!("http://{}/deep/nested/path", fixture.addr()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        let response = client
            .get(format!("http://{}/", fixture.addr()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        assert_eq!(
            rx.recv().await.unwrap(),
            Record::new("DELETE", "/deep/nested/path", Vec::new())
        );
        assert_eq!(rx.recv().await.unwrap(), Record::new("GET", "/", Vec::new()));
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_quarantined_group_is_skipped() {
        let (live_tx, mut live_rx) = mpsc::channel(4);
        let (dead_tx, mut dead_rx) = mpsc::channel(4);
        let quarantine = CancellationToken::new();
        quarantine.cancel();
        let fixture = Fixture::start(
            vec![
                GroupSender::new("dead", dead_tx, quarantine),
                GroupSender::new("live", live_tx, CancellationToken::new()),
            ],
            1024,
        )
        .await;

        let response = reqwest::Client::new()
            .put(format!("http://{}/y", fixture.addr()))
            .body("z")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        assert_eq!(live_rx.recv().await.unwrap().url, "/y");
        assert!(dead_rx.try_recv().is_err());
        assert_eq!(fixture.metrics.ingest_failures(), 0);
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_closed_group_counts_failure_and_others_still_receive() {
        let (closed_tx, closed_rx) = mpsc::channel(4);
        drop(closed_rx);
        let (tx, mut rx) = mpsc::channel(4);
        let fixture = Fixture::start(
            vec![
                GroupSender::new("closed", closed_tx, CancellationToken::new()),
                GroupSender::new("open", tx, CancellationToken::new()),
            ],
            1024,
        )
        .await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/x", fixture.addr()))
            .body("abc")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        assert_eq!(rx.recv().await.unwrap().body, b"abc");
        assert_eq!(fixture.metrics.ingest_failures(), 1);
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (tx, mut rx) = mpsc::channel(4);
        let fixture = Fixture::start(
            vec![GroupSender::new("a", tx, CancellationToken::new())],
            16,
        )
        .await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/big", fixture.addr()))
            .body(vec![b'x'; 64])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(response.text().await.unwrap(), "can't read body");

        assert!(rx.try_recv().is_err());
        assert_eq!(fixture.metrics.ingest_requests(), 1);
        assert_eq!(fixture.metrics.ingest_failures(), 1);
        fixture.stop().await;
    }
}
