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

use crate::{
    client::LockClient,
    error::Result,
    manager::LockManager,
    types::{ReleaseReply, TryAcquireReply},
};

/// Local lock client
///
/// Talks to an in-process [`LockManager`] without any network hop.
#[derive(Debug, Clone)]
pub struct LocalClient {
    manager: LockManager,
}

impl LocalClient {
    /// Create new local client
    pub fn new(manager: LockManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &LockManager {
        &self.manager
    }
}

#[async_trait::async_trait]
impl LockClient for LocalClient {
    async fn acquire_lock(&self, lock_name: &str, entity: &str) -> Result<()> {
        self.manager.acquire(lock_name, entity).await
    }

    async fn try_acquire_lock(&self, lock_name: &str, entity: &str) -> Result<TryAcquireReply> {
        self.manager.try_acquire(lock_name, entity).await
    }

    async fn release_lock(&self, lock_name: &str, entity: &str) -> Result<ReleaseReply> {
        self.manager.release(lock_name, entity).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_local_client_round_trip() {
        let client: Arc<dyn LockClient> = Arc::new(LocalClient::new(LockManager::new()));
        assert_eq!(client.endpoint(), "local");

        client.acquire_lock("orders", "a").await.unwrap();
        assert_eq!(
            client.try_acquire_lock("orders", "b").await.unwrap(),
            TryAcquireReply::Held { owner: "a".to_string() }
        );
        assert_eq!(client.release_lock("orders", "b").await.unwrap(), ReleaseReply::Denied);
        assert_eq!(client.release_lock("orders", "a").await.unwrap(), ReleaseReply::Released);
        client.close().await.unwrap();
    }
}
