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

//! YAML configuration file.
//!
//! ```yaml
//! http:
//!   timeout: 10s
//! queue:
//!   maxMsgSize: 10485760
//! endpoints:
//!   - name: cluster-a
//!     hosts: ["http://10.0.0.1:8080", "https://10.0.0.2"]
//! ```

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use qflow_common_queue::{
    QueueBuilder, QueueConfig, QueueError,
    config::{
        DEFAULT_MAX_BYTES_PER_FILE, DEFAULT_MAX_MSG_SIZE, DEFAULT_SYNC_EVERY,
        DEFAULT_SYNC_TIMEOUT,
    },
};
use qflow_replicator::EndpointGroup;
use qflow_server::http::DEFAULT_MAX_HTTP_BODY_SIZE;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, Snafu, ensure};
use url::Url;

/// Outbound request timeout used when the file sets none or zero.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}", path.display()))]
    ReadFile {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse config"))]
    Parse { source: serde_yaml::Error },

    #[snafu(display("({group}) [{host}] is not a valid endpoint url"))]
    InvalidHost {
        group:  String,
        host:   String,
        source: url::ParseError,
    },

    #[snafu(display("({group}) [{host}] must be an absolute http or https url"))]
    UnsupportedScheme { group: String, host: String },

    #[snafu(display("endpoint-group {group} has no hosts"))]
    EmptyHosts { group: String },

    #[snafu(display("endpoint-group name {name:?} is not usable as a directory name"))]
    InvalidEndpointName { name: String },

    #[snafu(display("endpoint-group {name} is defined twice"))]
    DuplicateEndpoint { name: String },

    #[snafu(display("invalid queue settings"))]
    Queue { source: QueueError },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QflowConfig {
    pub http:      HttpConfig,
    pub queue:     QueueSettings,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout of one outbound request; zero means the default.
    #[serde(with = "humantime_serde")]
    #[default(_code = "DEFAULT_HTTP_TIMEOUT")]
    pub timeout:       Duration,
    /// Read but unused.
    pub concurrency:   usize,
    /// Largest inbound body accepted, in bytes.
    #[default(_code = "DEFAULT_MAX_HTTP_BODY_SIZE")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueSettings {
    /// Zero means the default.
    #[default(_code = "DEFAULT_MAX_MSG_SIZE")]
    pub max_msg_size:       usize,
    pub min_msg_size:       usize,
    #[default(_code = "DEFAULT_MAX_BYTES_PER_FILE")]
    pub max_bytes_per_file: u64,
    #[default(_code = "DEFAULT_SYNC_EVERY")]
    pub sync_every:         u64,
    #[serde(with = "humantime_serde")]
    #[default(_code = "DEFAULT_SYNC_TIMEOUT")]
    pub sync_timeout:       Duration,
    /// Capacity of the async channels on both sides of a group's queue.
    #[default = 1]
    pub channel_capacity:   usize,
}

impl QueueSettings {
    /// Queue of `group` stored in `dir`.
    pub fn builder(&self, dir: impl Into<PathBuf>, group: &str) -> QueueBuilder {
        QueueBuilder::new(dir)
            .name(group)
            .max_bytes_per_file(self.max_bytes_per_file)
            .min_msg_size(self.min_msg_size)
            .max_msg_size(self.max_msg_size)
            .sync_every(self.sync_every)
            .sync_timeout(self.sync_timeout)
    }

    fn validate(&self) -> Result<()> {
        QueueConfig {
            max_bytes_per_file: self.max_bytes_per_file,
            min_msg_size: self.min_msg_size,
            max_msg_size: self.max_msg_size,
            sync_every: self.sync_every,
            sync_timeout: self.sync_timeout,
            ..QueueConfig::default()
        }
        .validate()
        .context(QueueSnafu)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name:    String,
    #[serde(default)]
    pub hosts:   Vec<String>,
    /// Overrides `http.timeout` for this group.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl QflowConfig {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate, replacing zero timeouts and sizes by their
    /// defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        // An empty document parses as null, not as an empty mapping.
        let mut config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw).context(ParseSnafu)?
        };
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        if self.http.timeout.is_zero() {
            self.http.timeout = DEFAULT_HTTP_TIMEOUT;
        }
        if self.http.max_body_size == 0 {
            self.http.max_body_size = DEFAULT_MAX_HTTP_BODY_SIZE;
        }
        if self.queue.max_msg_size == 0 {
            self.queue.max_msg_size = DEFAULT_MAX_MSG_SIZE;
        }
        if self.queue.channel_capacity == 0 {
            self.queue.channel_capacity = 1;
        }
        for endpoint in &mut self.endpoints {
            if endpoint.timeout.is_some_and(|t| t.is_zero()) {
                endpoint.timeout = None;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.endpoint_groups().map(|_| ())
    }

    /// The configured endpoint-groups with parsed hosts and effective
    /// timeouts.
    pub fn endpoint_groups(&self) -> Result<Vec<EndpointGroup>> {
        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(self.endpoints.len());

        for endpoint in &self.endpoints {
            ensure!(
                is_valid_group_name(&endpoint.name),
                InvalidEndpointNameSnafu {
                    name: &endpoint.name,
                }
            );
            ensure!(
                seen.insert(endpoint.name.as_str()),
                DuplicateEndpointSnafu {
                    name: &endpoint.name,
                }
            );
            ensure!(
                !endpoint.hosts.is_empty(),
                EmptyHostsSnafu {
                    group: &endpoint.name,
                }
            );

            let hosts = endpoint
                .hosts
                .iter()
                .map(|host| parse_host(&endpoint.name, host))
                .collect::<Result<Vec<_>>>()?;

            groups.push(EndpointGroup {
                name: endpoint.name.clone(),
                hosts,
                timeout: endpoint.timeout.unwrap_or(self.http.timeout),
            });
        }

        Ok(groups)
    }
}

fn parse_host(group: &str, host: &str) -> Result<Url> {
    let url = Url::parse(host).context(InvalidHostSnafu { group, host })?;
    ensure!(
        matches!(url.scheme(), "http" | "https") && url.has_host(),
        UnsupportedSchemeSnafu { group, host }
    );
    Ok(url)
}

/// Group names become queue directories under the data directory.
fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
