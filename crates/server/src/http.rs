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

use std::net::SocketAddr;

use axum::{Router, extract::DefaultBodyLimit};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{ConnectionSnafu, ParseAddressSnafu, Result, ServiceHandler};

/// Default maximum HTTP request body size (10 MiB)
pub const DEFAULT_MAX_HTTP_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Configuration options for a REST server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
pub struct RestServerConfig {
    /// The address to bind, `ip:port` or `:port` for every interface
    #[default = ":8080"]
    pub bind_address:  String,
    /// Maximum HTTP request body size in bytes
    #[default(_code = "DEFAULT_MAX_HTTP_BODY_SIZE")]
    pub max_body_size: usize,
}

/// Expand the `:port` shorthand to all interfaces.
pub fn normalize_bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Binds the configured address and serves the router built by
/// `route_handlers` in a background task.
///
/// Every handler gets the router in turn; tracing and the body limit are
/// layered over all of their routes, fallbacks included.
///
/// # Errors
/// Returns an error if the bind address cannot be parsed or bound.
///
/// # Example
///
/// ```rust,ignore
/// use axum::{Router, routing::get};
/// use qflow_server::http::{RestServerConfig, start_rest_server};
///
/// fn my_routes(router: Router) -> Router {
///     router.route("/hello", get(|| async { "Hello, World!" }))
/// }
///
/// let handle = start_rest_server(RestServerConfig::default(), vec![my_routes]).await?;
/// ```
pub async fn start_rest_server<F>(
    config: RestServerConfig,
    route_handlers: Vec<F>,
) -> Result<ServiceHandler>
where
    F: Fn(Router) -> Router + Send + Sync + 'static,
{
    let addr = normalize_bind_address(&config.bind_address);
    let bind_addr = addr
        .parse::<SocketAddr>()
        .context(ParseAddressSnafu { addr: &addr })?;

    let mut router = Router::new();
    for handler in &route_handlers {
        router = handler(router);
    }
    let router = router
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context(ConnectionSnafu { addr: &addr })?;
    let local_addr = listener
        .local_addr()
        .context(ConnectionSnafu { addr: &addr })?;
    info!("REST server listening on {}", local_addr);

    let cancellation_token = CancellationToken::new();
    let join_handle = {
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    cancellation_token.cancelled().await;
                    info!("REST server (on {}) received shutdown signal", local_addr);
                })
                .await;

            match result {
                Ok(()) => info!("REST server (on {}) stopped", local_addr),
                Err(e) => error!("REST server (on {}) failed: {}", local_addr, e),
            }
        })
    };

    Ok(ServiceHandler {
        join_handle,
        cancellation_token,
        local_addr,
    })
}
