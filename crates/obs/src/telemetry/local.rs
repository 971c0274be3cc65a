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

//! Local logging backend: stdout, or daily rolled files when a log directory
//! is configured.

use crate::telemetry::filter::build_env_filter;
use crate::{LoggerConfig, ObsError};
use std::{fs, io::IsTerminal};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize local logging and return the writer guard.
pub(super) fn init_local_logging(config: &LoggerConfig) -> Result<WorkerGuard, ObsError> {
    let (writer, guard, ansi) = match config.directory.as_deref() {
        Some(directory) => {
            fs::create_dir_all(directory).map_err(|source| ObsError::CreateDirectory {
                path: directory.display().to_string(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, false)
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (writer, guard, std::io::stdout().is_terminal())
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(writer);
    let fmt_layer = if config.json {
        fmt_layer.json().with_current_span(true).with_span_list(true).boxed()
    } else {
        fmt_layer.with_ansi(ansi).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(build_env_filter(&config.level, None))
        .with(ErrorLayer::default())
        .try_init()?;

    info!(
        service = %config.service_name,
        directory = ?config.directory,
        "Init logging (level: {})",
        config.level
    );
    Ok(guard)
}
