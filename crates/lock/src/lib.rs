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

// ============================================================================
// Core Module Declarations
// ============================================================================

// Single node lock state
pub mod manager;

// Wire format and TCP front end
pub mod protocol;
pub mod server;

// Abstraction Layer Modules
pub mod client;

// Quorum layer
pub mod cluster;

// Core Modules
pub mod config;
pub mod error;
pub mod types;

// ============================================================================
// Public API Exports
// ============================================================================

pub use crate::{
    // Client interfaces
    client::{ClientFactory, LockClient, local::LocalClient, remote::RemoteClient},
    // Quorum layer
    cluster::{ClusterOutcome, LockCluster, MemberStatus, quorum_size},
    // Configuration
    config::{ClientConfig, ClusterConfig, LockConfig, ServerConfig},
    // Error types
    error::{LockError, Result},
    // Main components
    manager::{LockManager, PendingAcquire, PendingReply},
    protocol::{Command, ProtocolError, Response},
    server::{LockServer, spawn_server},
    // Core types
    types::{LockKey, LockSnapshot, ManagerStats, ReleaseReply, TryAcquireReply},
};

/// Current version of the lock crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
