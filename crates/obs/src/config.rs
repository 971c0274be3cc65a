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

use dlock_config::{APP_NAME, DEFAULT_LOG_FILE_PREFIX, DEFAULT_LOG_JSON, DEFAULT_LOG_LEVEL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily rolled log files; stdout when `None`
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// File name prefix of rolled log files
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// JSON lines instead of plain text
    #[serde(default = "default_json")]
    pub json: bool,

    /// Service name attached to the startup record
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: None,
            file_prefix: default_file_prefix(),
            json: default_json(),
            service_name: default_service_name(),
        }
    }
}

impl LoggerConfig {
    /// Set the log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Write logs to rolling files in `directory`
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Toggle JSON output
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

fn default_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_file_prefix() -> String {
    DEFAULT_LOG_FILE_PREFIX.to_string()
}

fn default_json() -> bool {
    DEFAULT_LOG_JSON
}

fn default_service_name() -> String {
    APP_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggerConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.directory.is_none());
        assert_eq!(config.file_prefix, "dlock.log");
        assert!(!config.json);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: LoggerConfig = serde_json::from_str(r#"{"level":"debug","json":true}"#).unwrap();
        assert_eq!(config.level, "debug");
        assert!(config.json);
        assert_eq!(config.service_name, "dlock");
    }

    #[test]
    fn test_builder_methods() {
        let config = LoggerConfig::default().with_level("warn").with_directory("/tmp/logs").with_json(true);
        assert_eq!(config.level, "warn");
        assert_eq!(config.directory, Some(PathBuf::from("/tmp/logs")));
        assert!(config.json);
    }
}
