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

mod filter;
mod local;

use crate::{LoggerConfig, ObsError};
use tracing_appender::non_blocking::WorkerGuard;

/// Keeps the non-blocking log writer alive.
///
/// Dropping the guard flushes buffered records, so hold it until the process exits.
#[must_use = "dropping the guard stops the log writer"]
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard").finish_non_exhaustive()
    }
}

/// Install the global `tracing` subscriber described by `config`.
///
/// # Errors
/// Returns [`ObsError`] when the log directory cannot be created or a global
/// subscriber has already been installed.
pub fn init_logging(config: &LoggerConfig) -> Result<LoggingGuard, ObsError> {
    let worker = local::init_local_logging(config)?;
    Ok(LoggingGuard { _worker: worker })
}
