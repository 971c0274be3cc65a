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

//! Quorum locking over independent lock servers.
//!
//! A cluster lock is held once a majority (`N / 2 + 1`) of members granted it.
//! Attempts that fall short give back every grant they collected, so a failed
//! attempt never leaves partial state behind.

use crate::{
    LockKey,
    client::{LockClient, remote::RemoteClient},
    config::{ClusterConfig, LockConfig},
    error::{LockError, Result},
    types::{ReleaseReply, TryAcquireReply},
};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Majority of `members`
pub fn quorum_size(members: usize) -> usize {
    members / 2 + 1
}

/// What one member answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MemberStatus {
    Granted,
    /// Already held, possibly by the requesting entity itself
    Held { owner: String },
    Released,
    ReleaseDenied,
    /// Connection level fault; tolerated like a denial
    Unavailable { error: String },
    /// Protocol fault or double request; a try-acquire reporting one fails
    Error { error: String },
}

impl MemberStatus {
    fn from_error(err: &LockError) -> Self {
        match err {
            LockError::Protocol(_)
            | LockError::DoubleRequest { .. }
            | LockError::Internal { .. }
            | LockError::Configuration { .. } => Self::Error { error: err.to_string() },
            _ => Self::Unavailable { error: err.to_string() },
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Result of one cluster wide operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterOutcome {
    pub success: bool,
    /// One entry per member, in member order
    pub statuses: Vec<MemberStatus>,
}

impl ClusterOutcome {
    pub fn grants(&self) -> usize {
        self.statuses.iter().filter(|s| s.is_granted()).count()
    }
}

/// Stand-in for a member that could not be reached at connect time
#[derive(Debug)]
struct UnreachableMember {
    endpoint: String,
}

#[async_trait]
impl LockClient for UnreachableMember {
    async fn acquire_lock(&self, _lock_name: &str, _entity: &str) -> Result<()> {
        Err(LockError::connection_closed(&self.endpoint))
    }

    async fn try_acquire_lock(&self, _lock_name: &str, _entity: &str) -> Result<TryAcquireReply> {
        Err(LockError::connection_closed(&self.endpoint))
    }

    async fn release_lock(&self, _lock_name: &str, _entity: &str) -> Result<ReleaseReply> {
        Err(LockError::connection_closed(&self.endpoint))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Quorum lock over a fixed, ordered set of members
#[derive(Debug, Clone)]
pub struct LockCluster {
    members: Vec<Arc<dyn LockClient>>,
    retry_interval: Duration,
}

impl LockCluster {
    pub fn new(members: Vec<Arc<dyn LockClient>>, config: &ClusterConfig) -> Result<Self> {
        if members.is_empty() {
            return Err(LockError::InsufficientNodes {
                required: 1,
                available: 0,
            });
        }
        if config.retry_interval.is_zero() {
            return Err(LockError::configuration("Retry interval must be greater than zero"));
        }
        Ok(Self {
            members,
            retry_interval: config.retry_interval,
        })
    }

    /// Connect to every member of `config.cluster`.
    ///
    /// Unreachable members stay in the member list and answer `Unavailable`, so
    /// the quorum is always computed over the configured size. Fails when fewer
    /// than a quorum could be reached.
    pub async fn connect(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        let endpoints = &config.cluster.members;
        if endpoints.is_empty() {
            return Err(LockError::InsufficientNodes {
                required: 1,
                available: 0,
            });
        }

        let attempts = join_all(endpoints.iter().map(|endpoint| RemoteClient::connect(endpoint, &config.client))).await;
        let mut members: Vec<Arc<dyn LockClient>> = Vec::with_capacity(endpoints.len());
        let mut reachable = 0;
        for (endpoint, attempt) in endpoints.iter().zip(attempts) {
            match attempt {
                Ok(client) => {
                    reachable += 1;
                    members.push(Arc::new(client));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "cluster member unreachable");
                    members.push(Arc::new(UnreachableMember {
                        endpoint: endpoint.clone(),
                    }));
                }
            }
        }

        let required = quorum_size(endpoints.len());
        if reachable < required {
            close_all(&members).await;
            return Err(LockError::InsufficientNodes {
                required,
                available: reachable,
            });
        }
        info!(members = endpoints.len(), reachable, quorum = required, "connected to lock cluster");
        Self::new(members, &config.cluster)
    }

    pub fn members(&self) -> &[Arc<dyn LockClient>] {
        &self.members
    }

    pub fn endpoints(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.endpoint()).collect()
    }

    pub fn quorum(&self) -> usize {
        quorum_size(self.members.len())
    }

    /// Single quorum attempt. Never queues on any member.
    pub async fn try_acquire_lock(&self, lock_name: &str, entity: &str) -> ClusterOutcome {
        let statuses = join_all(self.members.iter().map(|member| async move {
            match member.try_acquire_lock(lock_name, entity).await {
                Ok(TryAcquireReply::Acquired) => MemberStatus::Granted,
                Ok(TryAcquireReply::Held { owner }) => MemberStatus::Held { owner },
                Err(e) => {
                    debug!(endpoint = member.endpoint(), lock_name, error = %e, "member try_acquire failed");
                    MemberStatus::from_error(&e)
                }
            }
        }))
        .await;

        let outcome = ClusterOutcome {
            success: false,
            statuses,
        };
        let grants = outcome.grants();
        let vetoed = outcome.statuses.iter().any(|s| matches!(s, MemberStatus::Error { .. }));
        let success = !vetoed && grants >= self.quorum();

        if !success && grants > 0 {
            self.roll_back(lock_name, entity, &outcome.statuses).await;
        }
        debug!(lock_name, entity, grants, quorum = self.quorum(), vetoed, success, "cluster try_acquire");
        ClusterOutcome { success, ..outcome }
    }

    async fn roll_back(&self, lock_name: &str, entity: &str, statuses: &[MemberStatus]) {
        let granted = self
            .members
            .iter()
            .zip(statuses)
            .filter(|(_, status)| status.is_granted())
            .map(|(member, _)| member);
        let results = join_all(granted.map(|member| async move { (member, member.release_lock(lock_name, entity).await) })).await;
        for (member, result) in results {
            match result {
                Ok(ReleaseReply::Released) => {}
                Ok(ReleaseReply::Denied) => {
                    warn!(endpoint = member.endpoint(), lock_name, entity, "rollback release denied")
                }
                Err(e) => warn!(endpoint = member.endpoint(), lock_name, entity, error = %e, "failed to roll back grant"),
            }
        }
    }

    /// Retry quorum attempts every `retry_interval` until one succeeds.
    pub async fn acquire_lock(&self, lock_name: &str, entity: &str) -> Result<ClusterOutcome> {
        match self.acquire_until(lock_name, entity, std::future::pending()).await? {
            Some(outcome) => Ok(outcome),
            None => Err(LockError::internal("cluster acquire aborted without an abort signal")),
        }
    }

    /// Like [`acquire_lock`](Self::acquire_lock), stopping with
    /// `LockError::Cancelled` once `token` fires.
    pub async fn acquire_lock_with_cancel(
        &self,
        lock_name: &str,
        entity: &str,
        token: &CancellationToken,
    ) -> Result<ClusterOutcome> {
        self.acquire_until(lock_name, entity, token.cancelled())
            .await?
            .ok_or_else(|| LockError::cancelled(lock_name))
    }

    /// Like [`acquire_lock`](Self::acquire_lock), stopping with
    /// `LockError::Timeout` after `timeout`.
    pub async fn acquire_lock_timeout(&self, lock_name: &str, entity: &str, timeout: Duration) -> Result<ClusterOutcome> {
        self.acquire_until(lock_name, entity, tokio::time::sleep(timeout))
            .await?
            .ok_or_else(|| LockError::timeout(lock_name, timeout))
    }

    /// `None` when `abort` fired. An attempt in flight is always finished
    /// (and rolled back if short) before giving up.
    async fn acquire_until(
        &self,
        lock_name: &str,
        entity: &str,
        abort: impl Future<Output = ()>,
    ) -> Result<Option<ClusterOutcome>> {
        LockKey::new(lock_name, entity).validate()?;
        tokio::pin!(abort);

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let outcome = self.try_acquire_lock(lock_name, entity).await;
            if outcome.success {
                info!(lock_name, entity, attempt, "cluster lock acquired");
                return Ok(Some(outcome));
            }

            tokio::select! {
                biased;
                _ = &mut abort => {
                    debug!(lock_name, entity, attempt, "cluster acquire abandoned");
                    return Ok(None);
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// Release on every member; succeeds only if every member released.
    pub async fn release_lock(&self, lock_name: &str, entity: &str) -> ClusterOutcome {
        let statuses = join_all(self.members.iter().map(|member| async move {
            match member.release_lock(lock_name, entity).await {
                Ok(ReleaseReply::Released) => MemberStatus::Released,
                Ok(ReleaseReply::Denied) => MemberStatus::ReleaseDenied,
                Err(e) => MemberStatus::from_error(&e),
            }
        }))
        .await;
        let success = statuses.iter().all(|s| matches!(s, MemberStatus::Released));
        debug!(lock_name, entity, success, "cluster release");
        ClusterOutcome { success, statuses }
    }

    /// Close every member connection
    pub async fn shutdown(&self) {
        close_all(&self.members).await;
    }
}

async fn close_all(members: &[Arc<dyn LockClient>]) {
    for (member, result) in members.iter().zip(join_all(members.iter().map(|m| m.close())).await) {
        if let Err(e) = result {
            warn!(endpoint = member.endpoint(), error = %e, "failed to close cluster member");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::local::LocalClient, manager::LockManager};

    #[derive(Debug)]
    struct FailingClient {
        double_request: bool,
    }

    impl FailingClient {
        fn error(&self) -> LockError {
            if self.double_request {
                LockError::double_request("l", "e")
            } else {
                LockError::connection_closed("10.0.0.1:8422")
            }
        }
    }

    #[async_trait]
    impl LockClient for FailingClient {
        async fn acquire_lock(&self, _lock_name: &str, _entity: &str) -> Result<()> {
            Err(self.error())
        }

        async fn try_acquire_lock(&self, _lock_name: &str, _entity: &str) -> Result<TryAcquireReply> {
            Err(self.error())
        }

        async fn release_lock(&self, _lock_name: &str, _entity: &str) -> Result<ReleaseReply> {
            Err(self.error())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn endpoint(&self) -> &str {
            "failing"
        }
    }

    fn config() -> ClusterConfig {
        ClusterConfig {
            members: Vec::new(),
            retry_interval: Duration::from_millis(10),
        }
    }

    fn local_cluster(n: usize) -> (LockCluster, Vec<LockManager>) {
        let managers: Vec<_> = (0..n).map(|_| LockManager::new()).collect();
        let members = managers
            .iter()
            .map(|m| Arc::new(LocalClient::new(m.clone())) as Arc<dyn LockClient>)
            .collect();
        (LockCluster::new(members, &config()).unwrap(), managers)
    }

    async fn owners(managers: &[LockManager], lock_name: &str) -> Vec<Option<String>> {
        let mut owners = Vec::new();
        for manager in managers {
            owners.push(manager.inspect(lock_name).await.unwrap().map(|s| s.owner));
        }
        owners
    }

    #[test]
    fn test_quorum_size() {
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(2), 2);
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(4), 3);
        assert_eq!(quorum_size(5), 3);
    }

    #[test]
    fn test_new_rejects_empty_cluster() {
        assert!(matches!(
            LockCluster::new(Vec::new(), &config()),
            Err(LockError::InsufficientNodes { required: 1, available: 0 })
        ));
    }

    #[tokio::test]
    async fn test_try_acquire_and_denials() {
        let (cluster, managers) = local_cluster(4);
        assert_eq!(cluster.quorum(), 3);

        let outcome = cluster.try_acquire_lock("l", "a").await;
        assert!(outcome.success);
        assert_eq!(outcome.grants(), 4);

        let outcome = cluster.try_acquire_lock("l", "b").await;
        assert!(!outcome.success);
        assert!(outcome.statuses.iter().all(|s| *s == MemberStatus::Held { owner: "a".into() }));

        // Held by the requester itself is still a denial, and nothing is rolled back
        let outcome = cluster.try_acquire_lock("l", "a").await;
        assert!(!outcome.success);
        assert_eq!(owners(&managers, "l").await, vec![Some("a".to_string()); 4]);
    }

    #[tokio::test]
    async fn test_partial_grants_are_rolled_back() {
        let (cluster, managers) = local_cluster(4);
        managers[0].acquire("l", "x").await.unwrap();
        managers[1].acquire("l", "x").await.unwrap();

        let outcome = cluster.try_acquire_lock("l", "a").await;
        assert!(!outcome.success);
        assert_eq!(outcome.grants(), 2);
        assert_eq!(
            owners(&managers, "l").await,
            vec![Some("x".to_string()), Some("x".to_string()), None, None]
        );
    }

    #[tokio::test]
    async fn test_unavailable_minority_is_tolerated() {
        let managers: Vec<_> = (0..3).map(|_| LockManager::new()).collect();
        let mut members: Vec<Arc<dyn LockClient>> = managers
            .iter()
            .map(|m| Arc::new(LocalClient::new(m.clone())) as Arc<dyn LockClient>)
            .collect();
        members.push(Arc::new(FailingClient { double_request: false }));
        let cluster = LockCluster::new(members, &config()).unwrap();

        let outcome = cluster.try_acquire_lock("l", "a").await;
        assert!(outcome.success);
        assert!(matches!(outcome.statuses[3], MemberStatus::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_member_error_vetoes_success() {
        let managers: Vec<_> = (0..3).map(|_| LockManager::new()).collect();
        let mut members: Vec<Arc<dyn LockClient>> = managers
            .iter()
            .map(|m| Arc::new(LocalClient::new(m.clone())) as Arc<dyn LockClient>)
            .collect();
        members.push(Arc::new(FailingClient { double_request: true }));
        let cluster = LockCluster::new(members, &config()).unwrap();

        let outcome = cluster.try_acquire_lock("l", "a").await;
        assert_eq!(outcome.grants(), 3);
        assert!(!outcome.success);
        assert!(matches!(outcome.statuses[3], MemberStatus::Error { .. }));
        assert_eq!(owners(&managers, "l").await, vec![None, None, None]);
    }

    #[tokio::test]
    async fn test_release_requires_every_member() {
        let (cluster, managers) = local_cluster(3);
        assert!(cluster.try_acquire_lock("l", "a").await.success);

        // One member lost the lock behind the cluster's back
        managers[2].release("l", "a").await.unwrap();
        let outcome = cluster.release_lock("l", "a").await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.statuses,
            vec![MemberStatus::Released, MemberStatus::Released, MemberStatus::ReleaseDenied]
        );
        assert_eq!(owners(&managers, "l").await, vec![None, None, None]);
    }

    #[tokio::test]
    async fn test_blocking_acquire_waits_for_release() {
        let (cluster, _managers) = local_cluster(3);
        assert!(cluster.try_acquire_lock("l", "a").await.success);

        let waiter = tokio::spawn({
            let cluster = cluster.clone();
            async move { cluster.acquire_lock("l", "b").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        assert!(cluster.release_lock("l", "a").await.success);
        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_acquire_timeout_and_cancel() {
        let (cluster, managers) = local_cluster(3);
        assert!(cluster.try_acquire_lock("l", "a").await.success);

        let err = cluster
            .acquire_lock_timeout("l", "b", Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        let token = CancellationToken::new();
        token.cancel();
        let err = cluster.acquire_lock_with_cancel("l", "b", &token).await.unwrap_err();
        assert!(matches!(err, LockError::Cancelled { .. }));

        assert_eq!(owners(&managers, "l").await, vec![Some("a".to_string()); 3]);
    }

    #[tokio::test]
    async fn test_acquire_rejects_unsendable_names() {
        let (cluster, _managers) = local_cluster(3);
        assert!(matches!(
            cluster.acquire_lock("a||b", "e").await,
            Err(LockError::Protocol(_))
        ));
    }

    #[test]
    fn test_status_serialization() {
        let outcome = ClusterOutcome {
            success: false,
            statuses: vec![
                MemberStatus::Granted,
                MemberStatus::Held { owner: "a".into() },
                MemberStatus::Unavailable { error: "down".into() },
            ],
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({
                "success": false,
                "statuses": [
                    {"status": "granted"},
                    {"status": "held", "owner": "a"},
                    {"status": "unavailable", "error": "down"},
                ],
            })
        );
    }
}
