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

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use commands::LockOperation;
use config::{Commands, Opt};
use dlock_obs::{LoggerConfig, init_logging};
use std::process::ExitCode;
use tracing::debug;

fn main() -> Result<ExitCode> {
    let opt = Opt::parse();

    let mut logger = LoggerConfig::default().with_level(&opt.log_level).with_json(opt.log_json);
    if let Some(directory) = &opt.log_directory {
        logger = logger.with_directory(directory);
    }
    let _guard = init_logging(&logger).context("failed to initialize logging")?;

    run(opt)
}

#[tokio::main]
async fn run(opt: Opt) -> Result<ExitCode> {
    debug!("opt: {:?}", &opt);
    let config = opt.lock_config().context("invalid configuration")?;

    match opt.command {
        Commands::Server(_) => commands::run_server(config).await,
        Commands::Acquire(args) => commands::run_lock_command(config, LockOperation::Acquire, args).await,
        Commands::TryAcquire(args) => commands::run_lock_command(config, LockOperation::TryAcquire, args).await,
        Commands::Release(args) => commands::run_lock_command(config, LockOperation::Release, args).await,
    }
}
