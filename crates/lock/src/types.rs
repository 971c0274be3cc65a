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

use crate::protocol::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of one logical lock request: which lock, on behalf of whom
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub lock_name: String,
    pub entity: String,
}

impl LockKey {
    pub fn new(lock_name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            lock_name: lock_name.into(),
            entity: entity.into(),
        }
    }

    /// Check that both fields can travel as single protocol fields
    pub fn validate(&self) -> Result<(), ProtocolError> {
        crate::protocol::validate_field(&self.lock_name)?;
        crate::protocol::validate_field(&self.entity)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.lock_name, self.entity)
    }
}

/// Outcome of a non-blocking acquire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TryAcquireReply {
    Acquired,
    /// The lock is held; nothing was queued
    Held { owner: String },
}

impl TryAcquireReply {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// Outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReply {
    Released,
    /// Absent lock or a different owner
    Denied,
}

impl ReleaseReply {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }
}

/// Point-in-time view of one lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub owner: String,
    /// Waiting entities in grant order
    pub waiters: Vec<String>,
}

/// Manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    /// Locks currently held
    pub locks: usize,
    /// Live waiters across all locks
    pub waiters: usize,
    /// Grants since start
    pub grants: u64,
    /// Try-acquire and release denials since start
    pub denials: u64,
}
