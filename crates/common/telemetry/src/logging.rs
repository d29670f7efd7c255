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

use std::{
    env,
    io::IsTerminal,
    sync::{Mutex, Once},
};

use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{ResultExt, Snafu};
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter, layer::SubscriberExt};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// Default directory for log files when file logging is enabled.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Fallback filter when neither `level` nor `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoggingError {
    #[snafu(display("invalid log filter '{filter}'"))]
    InvalidFilter {
        filter: String,
        source: filter::ParseError,
    },

    #[snafu(display("failed to create rolling log file in {dir}"))]
    RollingFile { dir: String, source: InitError },

    #[snafu(display("failed to install the log bridge"))]
    LogBridge { source: tracing_log::log::SetLoggerError },

    #[snafu(display("failed to install the global subscriber"))]
    GlobalSubscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for hourly rotated log files. Empty disables file logging.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Filter such as `info` or `debug,hyper=warn`. Falls back to `RUST_LOG`,
    /// then `info`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log kind.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

impl LoggingOptions {
    /// Options matching the `--debug` switch of the binary.
    #[must_use]
    pub fn with_debug(debug: bool) -> Self {
        Self {
            level: debug.then(|| "debug".to_string()),
            ..Self::default()
        }
    }
}

#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log pipelines.
    Json,
    #[default]
    Text,
}

/// Initialize logging specifically designed for unit tests.
///
/// Logs go to `UNITTEST_LOG_DIR` (default `/tmp/__unittest_logs`) with
/// `UNITTEST_LOG_LEVEL` (default `debug` with noisy HTTP crates at `warn`).
/// Safe to call from every test.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();
    static GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());

    START.call_once(|| {
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,hyper=warn,hyper_util=warn,reqwest=warn,h2=info".to_string());

        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };
        match init_global_logging("unittest", &opts) {
            Ok(guards) => {
                if let Ok(mut g) = GUARDS.lock() {
                    g.extend(guards);
                }
                tracing::info!("logs dir = {}", dir);
            }
            Err(e) => eprintln!("unit test logging disabled: {e}"),
        }
    });
}

fn rolling_writer(
    dir: &str,
    prefix: &str,
    max_log_files: usize,
) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(max_log_files)
        .build(dir)
        .context(RollingFileSnafu { dir })
}

/// Install the global subscriber.
///
/// Layers: stdout (when `append_stdout`), an hourly rotated file and an
/// error-only file (when `dir` is set), all behind one target
/// filter. Returns the guards of the non-blocking writers; dropping them
/// flushes and stops logging. Only the first call installs anything, later
/// calls return no guards.
pub fn init_global_logging(
    app_name: &str,
    opts: &LoggingOptions,
) -> Result<Vec<WorkerGuard>, LoggingError> {
    static START: Once = Once::new();
    let mut result = Ok(Vec::new());

    START.call_once(|| result = install(app_name, opts));

    result
}

fn install(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>, LoggingError> {
    let mut guards = vec![];

    let stdout_logging_layer = if opts.append_stdout {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);

        let layer = tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(std::io::stdout().is_terminal());
        Some(if opts.log_format == LogFormat::Json {
            layer.json().with_current_span(true).boxed()
        } else {
            layer.boxed()
        })
    } else {
        None
    };

    let (file_logging_layer, err_file_logging_layer) = if opts.dir.is_empty() {
        (None, None)
    } else {
        let appender = rolling_writer(&opts.dir, app_name, opts.max_log_files)?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        let layer = tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(false);
        let file_layer = if opts.log_format == LogFormat::Json {
            layer.json().boxed()
        } else {
            layer.boxed()
        };

        let appender = rolling_writer(
            &opts.dir,
            &format!("{app_name}-err"),
            opts.max_log_files,
        )?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        let layer = tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(false);
        let err_layer = if opts.log_format == LogFormat::Json {
            layer
                .json()
                .with_filter(filter::LevelFilter::ERROR)
                .boxed()
        } else {
            layer.with_filter(filter::LevelFilter::ERROR).boxed()
        };

        (Some(file_layer), Some(err_layer))
    };

    let env_filter = env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter_str = opts
        .level
        .as_deref()
        .or(env_filter.as_deref())
        .unwrap_or(DEFAULT_LOG_TARGETS);
    let targets = filter_str
        .parse::<filter::Targets>()
        .context(InvalidFilterSnafu { filter: filter_str })?;

    LogTracer::init().context(LogBridgeSnafu)?;

    let subscriber = Registry::default()
        .with(targets)
        .with(stdout_logging_layer)
        .with(file_logging_layer)
        .with(err_file_logging_layer);
    tracing::subscriber::set_global_default(subscriber).context(GlobalSubscriberSnafu)?;

    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: LoggingOptions =
            serde_json::from_str(r#"{"dir": "/var/log/qflow", "log_format": ""}"#).unwrap();
        assert_eq!(opts.dir, "/var/log/qflow");
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.max_log_files, 720);
        assert!(opts.append_stdout);
        assert!(opts.level.is_none());
    }

    #[test]
    fn test_debug_switch_sets_level() {
        assert_eq!(
            LoggingOptions::with_debug(true).level.as_deref(),
            Some("debug")
        );
        assert!(LoggingOptions::with_debug(false).level.is_none());
    }

    #[test]
    fn test_builder_defaults_match_default() {
        assert_eq!(LoggingOptions::builder().build(), LoggingOptions::default());
    }
}
