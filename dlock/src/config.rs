// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Args, Parser, Subcommand};
use dlock_config::{
    APP_NAME, DEFAULT_LOG_LEVEL, ENV_ADDRESS, ENV_CLUSTER, ENV_CONFIG_FILE, ENV_LOG_DIRECTORY, ENV_LOG_JSON, ENV_LOG_LEVEL,
    ENV_PEER_SCOPED_ENTITIES, VERSION,
};
use dlock_lock::LockConfig;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version = VERSION, about = "Quorum based distributed lock service")]
pub struct Opt {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = ENV_LOG_LEVEL, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Write daily rolled log files to this directory instead of stdout
    #[arg(long, global = true, env = ENV_LOG_DIRECTORY)]
    pub log_directory: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = ENV_LOG_JSON)]
    pub log_json: bool,

    /// JSON configuration file; command line flags take precedence
    #[arg(long, global = true, env = ENV_CONFIG_FILE)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a lock server until Ctrl-C
    Server(ServerArgs),
    /// Wait until the cluster lock is held
    Acquire(LockArgs),
    /// Take the cluster lock only if a quorum grants it right away
    TryAcquire(LockArgs),
    /// Release the cluster lock on every member
    Release(LockArgs),
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// bind to a specific ADDRESS:PORT, ADDRESS can be an IP or hostname
    #[arg(long, env = ENV_ADDRESS)]
    pub address: Option<String>,

    /// Identify holders by peer address and entity
    #[arg(long, env = ENV_PEER_SCOPED_ENTITIES)]
    pub peer_scoped_entities: bool,
}

#[derive(Debug, Args)]
pub struct LockArgs {
    /// Cluster members as a comma separated host:port list
    #[arg(long, env = ENV_CLUSTER, value_delimiter = ',')]
    pub cluster: Vec<String>,

    /// Name of the lock
    pub lock_name: String,

    /// Entity to act as. Acquire commands generate one when omitted.
    #[arg(long)]
    pub entity: Option<String>,

    /// Give up acquiring after this long, e.g. `5s` or `500ms`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Delay between quorum attempts
    #[arg(long, value_parser = humantime::parse_duration)]
    pub retry_interval: Option<Duration>,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

impl Opt {
    /// Configuration file (or defaults) with command line overrides applied
    pub fn lock_config(&self) -> anyhow::Result<LockConfig> {
        let mut config = match &self.config {
            Some(path) => LockConfig::from_file(path)?,
            None => LockConfig::default(),
        };

        match &self.command {
            Commands::Server(args) => {
                if let Some(address) = &args.address {
                    config.server.address = address.clone();
                }
                if args.peer_scoped_entities {
                    config.server.peer_scoped_entities = true;
                }
            }
            Commands::Acquire(args) | Commands::TryAcquire(args) | Commands::Release(args) => {
                let members: Vec<String> = args
                    .cluster
                    .iter()
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect();
                if !members.is_empty() {
                    config.cluster.members = members;
                }
                if let Some(interval) = args.retry_interval {
                    config.cluster.retry_interval = interval;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_flags_override_defaults() {
        let opt = Opt::try_parse_from(["dlock", "server", "--address", "127.0.0.1:9000", "--peer-scoped-entities"]).unwrap();
        let config = opt.lock_config().unwrap();
        assert_eq!(config.server.address, "127.0.0.1:9000");
        assert!(config.server.peer_scoped_entities);
    }

    #[test]
    fn test_lock_args() {
        let opt = Opt::try_parse_from([
            "dlock",
            "--log-level",
            "debug",
            "acquire",
            "--cluster",
            "a:1, b:2,c:3",
            "orders",
            "--timeout",
            "1s 500ms",
            "--retry-interval",
            "50ms",
        ])
        .unwrap();
        assert_eq!(opt.log_level, "debug");

        let Commands::Acquire(args) = &opt.command else {
            panic!("expected acquire, got {:?}", opt.command);
        };
        assert_eq!(args.lock_name, "orders");
        assert_eq!(args.timeout, Some(Duration::from_millis(1500)));
        assert!(args.entity.is_none());

        let config = opt.lock_config().unwrap();
        assert_eq!(config.cluster.members, vec!["a:1", "b:2", "c:3"]);
        assert_eq!(config.cluster.retry_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_config_file_is_overridden_by_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cluster":{{"members":["x:1","y:2","z:3"]}},"server":{{"address":"127.0.0.1:7000"}}}}"#).unwrap();
        let path = file.path().to_str().unwrap();

        let opt = Opt::try_parse_from(["dlock", "--config", path, "release", "orders", "--entity", "e1"]).unwrap();
        assert_eq!(opt.lock_config().unwrap().cluster.members, vec!["x:1", "y:2", "z:3"]);

        let opt = Opt::try_parse_from(["dlock", "--config", path, "server", "--address", "0.0.0.0:7001"]).unwrap();
        assert_eq!(opt.lock_config().unwrap().server.address, "0.0.0.0:7001");
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        assert!(Opt::try_parse_from(["dlock", "try-acquire", "orders", "--timeout", "soon"]).is_err());
    }
}
