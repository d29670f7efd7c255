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

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use qflow_app::{AppConfig, config::QflowConfig};
use qflow_common_telemetry::logging::LoggingOptions;
use snafu::{ResultExt, Whatever};

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "qflow",
about = "Durable HTTP traffic replicator",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION,
long_version = build_info::LONG_VERSION)]
struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
    Validate(ValidateArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Accepts HTTP requests and replicates each one to every endpoint-group.
Examples:

qflow server --config qflow.yaml --data-dir ./data
qflow server -a 127.0.0.1:9000 -c qflow.yaml -d /var/lib/qflow --debug

")]
struct ServerArgs {
    /// Listen address, `ip:port` or `:port` for every interface
    #[arg(short, long, default_value = ":8080")]
    addr:     String,
    /// YAML configuration file
    #[arg(short, long)]
    config:   PathBuf,
    /// Directory holding one queue per endpoint-group
    #[arg(short, long)]
    data_dir: PathBuf,
}

impl ServerArgs {
    async fn run(self, debug: bool) -> Result<(), Whatever> {
        let config = load(&self.config)?;
        AppConfig::builder()
            .config(config)
            .data_dir(self.data_dir)
            .bind_address(self.addr)
            .logging(LoggingOptions::with_debug(debug))
            .build()
            .open()
            .run()
            .await
            .whatever_context("qflow server failed")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Checks a configuration file and prints its endpoint-groups.
Examples:

qflow validate --config qflow.yaml

")]
struct ValidateArgs {
    /// YAML configuration file
    #[arg(short, long)]
    config: PathBuf,
}

impl ValidateArgs {
    fn run(&self) -> Result<(), Whatever> {
        let config = load(&self.config)?;
        let groups = config
            .endpoint_groups()
            .whatever_context("invalid endpoint-groups")?;

        println!("{}: ok", self.config.display());
        for group in groups {
            let hosts: Vec<_> = group.hosts.iter().map(|h| h.as_str()).collect();
            println!(
                "  {} (timeout {:?}): {}",
                group.name,
                group.timeout,
                hosts.join(", ")
            );
        }
        Ok(())
    }
}

fn load(path: &Path) -> Result<QflowConfig, Whatever> {
    QflowConfig::load(path)
        .with_whatever_context(|_| format!("failed to load config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(args) => args.run(cli.debug).await,
        Commands::Validate(args) => args.run(),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() { Cli::command().debug_assert(); }

    #[test]
    fn test_server_flags() {
        let cli = Cli::parse_from([
            "qflow", "server", "-c", "qflow.yaml", "-d", "/tmp/data", "--debug",
        ]);
        assert!(cli.debug);
        let Commands::Server(args) = cli.commands else {
            panic!("expected the server command");
        };
        assert_eq!(args.addr, ":8080");
        assert_eq!(args.config, PathBuf::from("qflow.yaml"));
        assert_eq!(args.data_dir, PathBuf::from("/tmp/data"));
    }

    #[test]
    fn test_server_requires_config_and_data_dir() {
        assert!(Cli::try_parse_from(["qflow", "server", "-d", "/tmp/data"]).is_err());
        assert!(Cli::try_parse_from(["qflow", "server", "-c", "qflow.yaml"]).is_err());
    }
}
