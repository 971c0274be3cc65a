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

use crate::config::LockArgs;
use anyhow::{Context, Result, bail};
use dlock_lock::{ClusterOutcome, LockCluster, LockConfig, LockManager, LockServer, MemberStatus};
use serde::Serialize;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Serve a node until Ctrl-C
pub async fn run_server(config: LockConfig) -> Result<ExitCode> {
    let manager = LockManager::with_queue_depth(config.server.manager_queue_depth);
    let server = LockServer::bind(config.server.clone(), manager)
        .await
        .context("failed to start lock server")?;
    info!("lock server is running at {}", server.local_addr()?);

    let shutdown = CancellationToken::new();
    let mut handle = tokio::spawn(server.serve(shutdown.clone()));

    tokio::select! {
        res = &mut handle => {
            res.context("lock server task failed")??;
            return Ok(ExitCode::SUCCESS);
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutdown signal received");
        }
    }

    shutdown.cancel();
    handle.await.context("lock server task failed")??;
    info!("server is stopped");
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Clone, Copy)]
pub enum LockOperation {
    Acquire,
    TryAcquire,
    Release,
}

#[derive(Debug, Serialize)]
struct MemberReport<'a> {
    endpoint: &'a str,
    #[serde(flatten)]
    status: &'a MemberStatus,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    lock_name: &'a str,
    entity: &'a str,
    success: bool,
    members: Vec<MemberReport<'a>>,
}

fn describe(status: &MemberStatus) -> String {
    match status {
        MemberStatus::Granted => "granted".to_string(),
        MemberStatus::Held { owner } => format!("held by {owner}"),
        MemberStatus::Released => "released".to_string(),
        MemberStatus::ReleaseDenied => "release denied".to_string(),
        MemberStatus::Unavailable { error } => format!("unavailable: {error}"),
        MemberStatus::Error { error } => format!("error: {error}"),
    }
}

fn print_outcome(cluster: &LockCluster, args: &LockArgs, entity: &str, outcome: &ClusterOutcome) -> Result<()> {
    let endpoints = cluster.endpoints();
    if args.json {
        let report = Report {
            lock_name: &args.lock_name,
            entity,
            success: outcome.success,
            members: endpoints
                .iter()
                .copied()
                .zip(&outcome.statuses)
                .map(|(endpoint, status)| MemberReport { endpoint, status })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (endpoint, status) in endpoints.iter().zip(&outcome.statuses) {
            println!("{endpoint}\t{}", describe(status));
        }
        let verdict = if outcome.success { "ok" } else { "failed" };
        println!("{verdict}: lock '{}' entity '{entity}'", args.lock_name);
    }
    Ok(())
}

/// One cluster operation; the exit code reflects the quorum outcome
pub async fn run_lock_command(config: LockConfig, operation: LockOperation, args: LockArgs) -> Result<ExitCode> {
    let entity = match (&args.entity, operation) {
        (Some(entity), _) => entity.clone(),
        (None, LockOperation::Release) => bail!("--entity is required to release a lock"),
        (None, _) => Uuid::new_v4().to_string(),
    };
    if config.cluster.members.is_empty() {
        bail!("no cluster members given, use --cluster or the cluster section of the config file");
    }

    let cluster = LockCluster::connect(&config)
        .await
        .context("failed to connect to lock cluster")?;

    let outcome = match operation {
        LockOperation::TryAcquire => Ok(cluster.try_acquire_lock(&args.lock_name, &entity).await),
        LockOperation::Release => Ok(cluster.release_lock(&args.lock_name, &entity).await),
        LockOperation::Acquire => match args.timeout {
            Some(timeout) => cluster.acquire_lock_timeout(&args.lock_name, &entity, timeout).await,
            None => {
                let token = CancellationToken::new();
                let ctrl_c = tokio::spawn({
                    let token = token.clone();
                    async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            token.cancel();
                        }
                    }
                });
                let res = cluster.acquire_lock_with_cancel(&args.lock_name, &entity, &token).await;
                ctrl_c.abort();
                res
            }
        },
    };

    let result = match outcome {
        Ok(outcome) => {
            print_outcome(&cluster, &args, &entity, &outcome)?;
            Ok(if outcome.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Err(e) => {
            warn!(lock_name = %args.lock_name, entity = %entity, error = %e, "cluster acquire gave up");
            Err(e).context(format!("failed to acquire lock '{}'", args.lock_name))
        }
    };
    cluster.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_report_serialization() {
        let status = MemberStatus::Held { owner: "w1".into() };
        let report = Report {
            lock_name: "orders",
            entity: "w2",
            success: false,
            members: vec![MemberReport {
                endpoint: "127.0.0.1:8422",
                status: &status,
            }],
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({
                "lock_name": "orders",
                "entity": "w2",
                "success": false,
                "members": [{"endpoint": "127.0.0.1:8422", "status": "held", "owner": "w1"}],
            })
        );
    }

    #[test]
    fn test_describe_status() {
        assert_eq!(describe(&MemberStatus::Granted), "granted");
        assert_eq!(describe(&MemberStatus::Held { owner: "a".into() }), "held by a");
        assert_eq!(
            describe(&MemberStatus::Unavailable { error: "down".into() }),
            "unavailable: down"
        );
    }
}
