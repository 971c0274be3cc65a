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

use const_str::concat;

/// Application name
/// Default value: dlock
pub const APP_NAME: &str = "dlock";

/// Application version, taken from the workspace manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix shared by every environment variable the binary reads
pub const ENV_PREFIX: &str = "DLOCK_";

/// Default logger level
/// Default value: info
/// Environment variable: DLOCK_LOG_LEVEL
/// Command line argument: --log-level
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const ENV_LOG_LEVEL: &str = concat!(ENV_PREFIX, "LOG_LEVEL");

/// Directory for rolling log files. Logs go to stdout when unset.
/// Environment variable: DLOCK_LOG_DIRECTORY
/// Command line argument: --log-directory
pub const ENV_LOG_DIRECTORY: &str = concat!(ENV_PREFIX, "LOG_DIRECTORY");

/// Emit logs as JSON lines instead of human readable text
/// Default value: false
/// Environment variable: DLOCK_LOG_JSON
pub const DEFAULT_LOG_JSON: bool = false;
pub const ENV_LOG_JSON: &str = concat!(ENV_PREFIX, "LOG_JSON");

/// File name prefix of rolled log files
/// Default value: dlock.log
pub const DEFAULT_LOG_FILE_PREFIX: &str = concat!(APP_NAME, ".log");

/// Optional JSON configuration file
/// Environment variable: DLOCK_CONFIG_FILE
/// Command line argument: --config
pub const ENV_CONFIG_FILE: &str = concat!(ENV_PREFIX, "CONFIG_FILE");
