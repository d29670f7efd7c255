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

pub mod config;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::Router;
use bon::Builder;
use qflow_common_telemetry::{
    logging::{LoggingError, LoggingOptions, WorkerGuard, init_global_logging},
    panic_hook::set_panic_hook,
};
use qflow_replicator::{
    DurableChannel, EndpointGroup, MetricsSink, PrometheusMetrics, Replicator, ReplicatorError,
};
use qflow_server::{
    NetworkError, ServiceHandler,
    http::{RestServerConfig, start_rest_server},
    ingest::{GroupSender, IngestState, ingest_routes},
    metrics::metrics_routes,
};
use snafu::{ResultExt, Snafu};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, QflowConfig};

const APP_NAME: &str = "qflow";

type RouteHandler = Box<dyn Fn(Router) -> Router + Send + Sync>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("invalid configuration"))]
    Config {
        source: ConfigError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("failed to initialize logging"))]
    Logging {
        source: LoggingError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("failed to register metrics"))]
    Metrics {
        source: prometheus::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("failed to create data directory {}", path.display()))]
    DataDir {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("failed to start endpoint-group {group}"))]
    Group {
        group:  String,
        source: ReplicatorError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("failed to start HTTP server"))]
    Server {
        source: NetworkError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("failed to install signal handler"))]
    Signal {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

/// Configuration for the application
#[derive(Debug, Clone, Builder)]
pub struct AppConfig {
    /// Parsed and validated configuration file
    pub config:       QflowConfig,
    /// Parent directory of every group's queue
    #[builder(into)]
    pub data_dir:     PathBuf,
    /// Listen address, `ip:port` or `:port`
    #[builder(into, default = ":8080".to_string())]
    pub bind_address: String,
    #[builder(default)]
    pub logging:      LoggingOptions,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            config:             self,
            cancellation_token: CancellationToken::new(),
        }
    }
}

/// Represents the main application with lifecycle management
pub struct App {
    config:             AppConfig,
    /// Parent of every replicator's token
    cancellation_token: CancellationToken,
}

/// One endpoint-group's running pieces.
struct Lane {
    name:       String,
    channel:    DurableChannel,
    supervisor: JoinHandle<()>,
    quarantine: CancellationToken,
}

/// Handle for controlling a running application
pub struct AppHandle {
    server:             ServiceHandler,
    lanes:              Vec<Lane>,
    /// Groups whose queue failed to open or recover and never started.
    unopened:           Vec<String>,
    metrics:            Arc<PrometheusMetrics>,
    cancellation_token: CancellationToken,
    _log_guards:        Vec<WorkerGuard>,
}

impl AppHandle {
    pub const fn local_addr(&self) -> SocketAddr { self.server.local_addr() }

    pub const fn metrics(&self) -> &Arc<PrometheusMetrics> { &self.metrics }

    /// Whether ingest skips `group`, because its queue failed to open or its
    /// replicator died.
    pub fn is_quarantined(&self, group: &str) -> bool {
        self.unopened.iter().any(|name| name == group)
            || self
                .lanes
                .iter()
                .any(|lane| lane.name == group && lane.quarantine.is_cancelled())
    }

    /// Stop the HTTP server, stop every replicator (which puts in-flight
    /// records back onto its queue), then close the queues.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown");

        self.server.shutdown();
        if let Err(e) = self.server.wait_for_stop().await {
            error!(error = %e, "HTTP server did not stop cleanly");
        }

        self.cancellation_token.cancel();
        let mut channels = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes {
            if let Err(e) = lane.supervisor.await {
                error!(group = %lane.name, error = %e, "Supervisor task failed");
            }
            channels.push((lane.name, lane.channel));
        }

        for (name, mut channel) in channels {
            match tokio::task::spawn_blocking(move || channel.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(group = %name, error = %e, "Failed to close queue"),
                Err(e) => error!(group = %name, error = %e, "Queue close task failed"),
            }
        }

        info!("Application shutdown complete");
    }
}

impl App {
    /// Open every group's queue, start the replicators and the HTTP server.
    ///
    /// A group whose queue cannot be opened or recovered is quarantined and
    /// the others start; every other failure aborts startup.
    pub async fn start(self) -> Result<AppHandle, AppError> {
        let log_guards = init_global_logging(APP_NAME, &self.config.logging).context(LoggingSnafu)?;
        info!("Starting qflow");

        let metrics = Arc::new(PrometheusMetrics::new().context(MetricsSnafu)?);
        set_panic_hook(metrics.panic_counter());

        let qflow = &self.config.config;
        let groups = qflow.endpoint_groups().context(ConfigSnafu)?;
        if groups.is_empty() {
            warn!("No endpoint-groups configured, requests will be accepted and discarded");
        }

        let data_dir = &self.config.data_dir;
        if !data_dir.exists() {
            info!("Creating data directory: {}", data_dir.display());
        }
        std::fs::create_dir_all(data_dir).context(DataDirSnafu { path: data_dir })?;

        let sink: Arc<dyn MetricsSink> = metrics.clone();
        let mut lanes = Vec::with_capacity(groups.len());
        let mut unopened = Vec::new();
        let mut senders = Vec::with_capacity(groups.len());

        for group in groups {
            let builder = qflow.queue.builder(data_dir.join(&group.name), &group.name);
            let (channel, in_tx, out_rx) =
                match DurableChannel::open(builder, qflow.queue.channel_capacity) {
                    Ok(opened) => opened,
                    Err(e) if e.is_queue_failure() => {
                        error!(
                            group = %group.name,
                            corrupt = e.is_corrupt_queue(),
                            error = ?e,
                            "Queue failed to open, group quarantined"
                        );
                        unopened.push(group.name);
                        continue;
                    }
                    Err(e) => return Err(e).context(GroupSnafu { group: &group.name }),
                };

            log_group(&group, qflow.queue.max_msg_size);

            let replicator = Replicator::new(group.clone(), in_tx.clone(), out_rx, sink.clone())
                .context(GroupSnafu { group: &group.name })?;
            let task = tokio::spawn(replicator.run(self.cancellation_token.child_token()));
            let quarantine = CancellationToken::new();
            let supervisor = tokio::spawn(supervise(group.name.clone(), task, quarantine.clone()));

            senders.push(GroupSender::new(&group.name, in_tx, quarantine.clone()));
            lanes.push(Lane {
                name: group.name,
                channel,
                supervisor,
                quarantine,
            });
        }

        let handlers: Vec<RouteHandler> = vec![
            Box::new(metrics_routes(metrics.clone())),
            Box::new(ingest_routes(IngestState::new(senders, sink))),
        ];
        let http_config = RestServerConfig::builder()
            .bind_address(self.config.bind_address.clone())
            .max_body_size(qflow.http.max_body_size)
            .build();
        let server = start_rest_server(http_config, handlers)
            .await
            .context(ServerSnafu)?;

        info!("listening on {}", server.local_addr());

        Ok(AppHandle {
            server,
            lanes,
            unopened,
            metrics,
            cancellation_token: self.cancellation_token,
            _log_guards: log_guards,
        })
    }

    /// Run until Ctrl+C or SIGTERM, then shut down gracefully.
    pub async fn run(self) -> Result<(), AppError> {
        let handle = self.start().await?;
        let signal = shutdown_signal().await;
        handle.shutdown().await;
        signal.context(SignalSnafu)
    }
}

fn log_group(group: &EndpointGroup, max_msg_size: usize) {
    let hosts = group
        .hosts
        .iter()
        .map(|h| h.as_str().trim_end_matches('/'))
        .collect::<Vec<_>>()
        .join(",");
    info!("registered ({}) with endpoints: [{}]", group.name, hosts);
    info!(
        "config options: (http timeout: {:?}, maxMsgSize: {})",
        group.timeout, max_msg_size
    );
}

/// Quarantine the group once its replicator ends abnormally.
async fn supervise(group: String, task: JoinHandle<()>, quarantine: CancellationToken) {
    match task.await {
        Ok(()) => debug!(group = %group, "Replicator exited"),
        Err(e) if e.is_panic() => {
            error!(group = %group, "Replicator panicked, group quarantined");
            quarantine.cancel();
        }
        Err(e) => {
            warn!(group = %group, error = %e, "Replicator aborted, group quarantined");
            quarantine.cancel();
        }
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => info!("Received terminate signal"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}
