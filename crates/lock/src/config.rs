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

use crate::error::{LockError, Result};
use dlock_config::{
    DEFAULT_ADDRESS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MANAGER_QUEUE_DEPTH, DEFAULT_MAX_LINE_LENGTH,
    DEFAULT_OUTBOUND_QUEUE_DEPTH, DEFAULT_PEER_SCOPED_ENTITIES, DEFAULT_REQUEST_QUEUE_DEPTH, DEFAULT_RETRY_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Top level configuration of a node and of the tools that talk to nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,
}

/// Lock server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_address")]
    pub address: String,

    /// Treat `<peer>_<entity>` as the holder identity
    #[serde(default = "default_peer_scoped_entities")]
    pub peer_scoped_entities: bool,

    /// Longest accepted request line
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Lock manager command channel capacity
    #[serde(default = "default_manager_queue_depth")]
    pub manager_queue_depth: usize,

    /// Per connection outbound queue capacity
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

/// Connection multiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Request queue capacity
    #[serde(default = "default_request_queue_depth")]
    pub request_queue_depth: usize,

    /// Longest accepted response line
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Member addresses, in order
    #[serde(default)]
    pub members: Vec<String>,

    /// Delay between quorum attempts of a blocking acquire
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            peer_scoped_entities: default_peer_scoped_entities(),
            max_line_length: default_max_line_length(),
            manager_queue_depth: default_manager_queue_depth(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_queue_depth: default_request_queue_depth(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            retry_interval: default_retry_interval(),
        }
    }
}

// Default value functions
fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_peer_scoped_entities() -> bool {
    DEFAULT_PEER_SCOPED_ENTITIES
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_manager_queue_depth() -> usize {
    DEFAULT_MANAGER_QUEUE_DEPTH
}

fn default_outbound_queue_depth() -> usize {
    DEFAULT_OUTBOUND_QUEUE_DEPTH
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
}

fn default_request_queue_depth() -> usize {
    DEFAULT_REQUEST_QUEUE_DEPTH
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS)
}

impl LockConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LockError::configuration(format!("Failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| LockError::configuration(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.address.is_empty() {
            return Err(LockError::configuration("Server address must not be empty"));
        }

        if self.server.max_line_length == 0 || self.client.max_line_length == 0 {
            return Err(LockError::configuration("Max line length must be greater than zero"));
        }

        if self.server.manager_queue_depth == 0
            || self.server.outbound_queue_depth == 0
            || self.client.request_queue_depth == 0
        {
            return Err(LockError::configuration("Queue depths must be greater than zero"));
        }

        if self.client.connect_timeout.is_zero() {
            return Err(LockError::configuration("Connect timeout must be greater than zero"));
        }

        if self.cluster.retry_interval.is_zero() {
            return Err(LockError::configuration("Retry interval must be greater than zero"));
        }

        if self.cluster.members.iter().any(|m| m.trim().is_empty()) {
            return Err(LockError::configuration("Cluster member addresses must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LockConfig::default();
        assert_eq!(config.server.address, "0.0.0.0:8422");
        assert!(!config.server.peer_scoped_entities);
        assert_eq!(config.server.max_line_length, 8192);
        assert_eq!(config.cluster.retry_interval, Duration::from_millis(250));
        assert!(config.cluster.members.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LockConfig::default();
        config.cluster.retry_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(LockError::Configuration { .. })));

        let mut config = LockConfig::default();
        config.client.request_queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = LockConfig::default();
        config.cluster.members = vec!["127.0.0.1:1".to_string(), " ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server":{{"address":"127.0.0.1:9000","peer_scoped_entities":true}},"cluster":{{"members":["a:1","b:2"]}}}}"#
        )
        .unwrap();

        let config = LockConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:9000");
        assert!(config.server.peer_scoped_entities);
        assert_eq!(config.server.outbound_queue_depth, 256);
        assert_eq!(config.cluster.members, vec!["a:1", "b:2"]);
        assert_eq!(config.cluster.retry_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            LockConfig::from_file("/nonexistent/dlock.json"),
            Err(LockError::Configuration { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(LockConfig::from_file(file.path()).is_err());
    }
}
