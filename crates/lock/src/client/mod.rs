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

pub mod local;
pub mod remote;

use crate::{
    config::ClientConfig,
    error::Result,
    manager::LockManager,
    types::{ReleaseReply, TryAcquireReply},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Lock client trait
#[async_trait]
pub trait LockClient: Send + Sync + std::fmt::Debug {
    /// Wait until `entity` holds `lock_name`
    async fn acquire_lock(&self, lock_name: &str, entity: &str) -> Result<()>;

    /// Acquire `lock_name` only if it is free
    async fn try_acquire_lock(&self, lock_name: &str, entity: &str) -> Result<TryAcquireReply>;

    /// Release `lock_name` held by `entity`
    async fn release_lock(&self, lock_name: &str, entity: &str) -> Result<ReleaseReply>;

    /// Close client
    async fn close(&self) -> Result<()>;

    /// Where this client's locks live
    fn endpoint(&self) -> &str;
}

/// Client factory
pub struct ClientFactory;

impl ClientFactory {
    /// Create local client
    pub fn create_local(manager: LockManager) -> Arc<dyn LockClient> {
        Arc::new(local::LocalClient::new(manager))
    }

    /// Connect to a lock server
    pub async fn connect_remote(endpoint: &str, config: &ClientConfig) -> Result<Arc<dyn LockClient>> {
        Ok(Arc::new(remote::RemoteClient::connect(endpoint, config).await?))
    }
}
