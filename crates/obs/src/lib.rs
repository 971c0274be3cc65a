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

//! # dlock observability
//!
//! Installs the global `tracing` subscriber used by the lock server and the
//! command line tools.
//!
//! ## Usage
//!
//! ```no_run
//! use dlock_obs::{LoggerConfig, init_logging};
//!
//! let _guard = init_logging(&LoggerConfig::default()).expect("logging");
//! tracing::info!("ready");
//! ```
mod config;
mod error;
mod telemetry;

pub use config::LoggerConfig;
pub use error::ObsError;
pub use telemetry::{LoggingGuard, init_logging};
