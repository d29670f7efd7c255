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

use std::sync::Arc;

use axum::{
    Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use qflow_replicator::PrometheusMetrics;
use tracing::error;

pub const METRICS_PATH: &str = "/metrics";

/// Serve `metrics` in the Prometheus text format on [`METRICS_PATH`].
pub fn metrics_routes(
    metrics: Arc<PrometheusMetrics>,
) -> impl Fn(Router) -> Router + Send + Sync + 'static {
    move |router: Router| {
        let metrics = metrics.clone();
        router.route(METRICS_PATH, get(move || render(metrics.clone())))
    }
}

async fn render(metrics: Arc<PrometheusMetrics>) -> Response {
    match metrics.gather_text() {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use qflow_replicator::MetricsSink;

    use super::*;
    use crate::http::{RestServerConfig, start_rest_server};

    #[tokio::test]
    async fn test_metrics_endpoint_exports_text_format() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        metrics.ingest_request();
        metrics.endpoint_failure("cluster-a");

        let config = RestServerConfig::builder()
            .bind_address("127.0.0.1:0".to_string())
            .max_body_size(1024)
            .build();
        let handler = start_rest_server(config, vec![metrics_routes(metrics)])
            .await
            .unwrap();

        let response = reqwest::get(format!("http://{}/metrics", handler.local_addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let content_type = response.headers()[header::CONTENT_TYPE.as_str()]
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
        let body = response.text().await.unwrap();
        assert!(body.contains("ingest_requests_total 1"));
        assert!(body.contains(r#"endpoint_failures_total{endpoint="cluster-a"} 1"#));

        handler.shutdown();
        handler.wait_for_stop().await.unwrap();
    }
}
