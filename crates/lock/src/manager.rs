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

//! Single node lock manager.
//!
//! All lock state lives in one task. Handles talk to it through a bounded
//! command channel and receive their answers on oneshot channels, so every
//! state transition is applied in arrival order without any mutex.

use crate::{
    LockKey,
    error::{LockError, Result},
    types::{LockSnapshot, ManagerStats, ReleaseReply, TryAcquireReply},
};
use dlock_config::DEFAULT_MANAGER_QUEUE_DEPTH;
use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    future::Future,
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum LockCommand {
    Acquire {
        key: LockKey,
        sink: oneshot::Sender<()>,
    },
    TryAcquire {
        key: LockKey,
        reply: oneshot::Sender<TryAcquireReply>,
    },
    Release {
        key: LockKey,
        reply: oneshot::Sender<ReleaseReply>,
    },
    Inspect {
        lock_name: String,
        reply: oneshot::Sender<Option<LockSnapshot>>,
    },
    Stats {
        reply: oneshot::Sender<ManagerStats>,
    },
}

struct PendingRequest {
    entity: String,
    sink: oneshot::Sender<()>,
}

/// A held lock. States without an owner are removed from the table.
struct LockState {
    owner: String,
    waiters: VecDeque<PendingRequest>,
}

impl LockState {
    fn new(owner: String) -> Self {
        Self {
            owner,
            waiters: VecDeque::new(),
        }
    }

    /// Grant the lock to the first waiter still listening.
    fn hand_over(&mut self) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.sink.send(()).is_ok() {
                self.owner = waiter.entity;
                return true;
            }
        }
        false
    }

    fn live_waiters(&self) -> impl Iterator<Item = &PendingRequest> {
        self.waiters.iter().filter(|w| !w.sink.is_closed())
    }
}

#[derive(Default)]
struct LockTable {
    locks: HashMap<String, LockState>,
    grants: u64,
    denials: u64,
}

impl LockTable {
    fn apply(&mut self, command: LockCommand) {
        match command {
            LockCommand::Acquire { key, sink } => self.acquire(key, sink),
            LockCommand::TryAcquire { key, reply } => {
                let _ = reply.send(self.try_acquire(key));
            }
            LockCommand::Release { key, reply } => {
                let _ = reply.send(self.release(key));
            }
            LockCommand::Inspect { lock_name, reply } => {
                let snapshot = self.locks.get(&lock_name).map(|state| LockSnapshot {
                    owner: state.owner.clone(),
                    waiters: state.live_waiters().map(|w| w.entity.clone()).collect(),
                });
                let _ = reply.send(snapshot);
            }
            LockCommand::Stats { reply } => {
                let _ = reply.send(ManagerStats {
                    locks: self.locks.len(),
                    waiters: self.locks.values().map(|s| s.live_waiters().count()).sum(),
                    grants: self.grants,
                    denials: self.denials,
                });
            }
        }
    }

    fn acquire(&mut self, key: LockKey, sink: oneshot::Sender<()>) {
        match self.locks.entry(key.lock_name) {
            Entry::Occupied(mut entry) => {
                debug!(lock_name = %entry.key(), entity = %key.entity, owner = %entry.get().owner, "lock busy, queued");
                entry.get_mut().waiters.push_back(PendingRequest {
                    entity: key.entity,
                    sink,
                });
            }
            Entry::Vacant(entry) => {
                // The caller may have given up before the command was processed
                if sink.send(()).is_ok() {
                    debug!(lock_name = %entry.key(), entity = %key.entity, "lock granted");
                    entry.insert(LockState::new(key.entity));
                    self.grants += 1;
                }
            }
        }
    }

    fn try_acquire(&mut self, key: LockKey) -> TryAcquireReply {
        match self.locks.entry(key.lock_name) {
            Entry::Occupied(entry) => {
                self.denials += 1;
                TryAcquireReply::Held {
                    owner: entry.get().owner.clone(),
                }
            }
            Entry::Vacant(entry) => {
                debug!(lock_name = %entry.key(), entity = %key.entity, "lock granted");
                entry.insert(LockState::new(key.entity));
                self.grants += 1;
                TryAcquireReply::Acquired
            }
        }
    }

    fn release(&mut self, key: LockKey) -> ReleaseReply {
        let Entry::Occupied(mut entry) = self.locks.entry(key.lock_name) else {
            self.denials += 1;
            return ReleaseReply::Denied;
        };
        if entry.get().owner != key.entity {
            debug!(lock_name = %entry.key(), entity = %key.entity, owner = %entry.get().owner, "release denied");
            self.denials += 1;
            return ReleaseReply::Denied;
        }

        if entry.get_mut().hand_over() {
            debug!(lock_name = %entry.key(), from = %key.entity, to = %entry.get().owner, "lock handed over");
            self.grants += 1;
        } else {
            debug!(lock_name = %entry.key(), entity = %key.entity, "lock released");
            entry.remove();
        }
        ReleaseReply::Released
    }
}

async fn run(mut commands: mpsc::Receiver<LockCommand>) {
    let mut table = LockTable::default();
    while let Some(command) = commands.recv().await {
        table.apply(command);
    }
    debug!(locks = table.locks.len(), "lock manager stopped");
}

/// Handle to a lock manager task. Cloning is cheap; the task stops once every
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct LockManager {
    commands: mpsc::Sender<LockCommand>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Spawn a manager on the current tokio runtime.
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_MANAGER_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(depth: usize) -> Self {
        let (commands, rx) = mpsc::channel(depth.max(1));
        tokio::spawn(run(rx));
        Self { commands }
    }

    async fn send(&self, command: LockCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| LockError::ManagerStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> LockCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| LockError::ManagerStopped)
    }

    /// Queue an acquire and return without waiting for the grant.
    ///
    /// Requests submitted one after another are granted in that order.
    pub async fn submit_acquire(&self, key: LockKey) -> Result<PendingAcquire> {
        let (sink, rx) = oneshot::channel();
        self.send(LockCommand::Acquire { key: key.clone(), sink }).await?;
        Ok(PendingAcquire {
            key,
            rx: Some(rx),
            commands: self.commands.clone(),
        })
    }

    /// Queue a release and return without waiting for the answer.
    pub async fn submit_release(&self, key: LockKey) -> Result<PendingReply<ReleaseReply>> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::Release { key, reply }).await?;
        Ok(PendingReply { rx })
    }

    /// Wait until `entity` owns `lock_name`.
    pub async fn acquire(&self, lock_name: &str, entity: &str) -> Result<()> {
        self.submit_acquire(LockKey::new(lock_name, entity)).await?.wait().await
    }

    /// Like [`acquire`](Self::acquire), giving up with `LockError::Cancelled`
    /// when `token` fires first.
    pub async fn acquire_with_cancel(&self, lock_name: &str, entity: &str, token: &CancellationToken) -> Result<()> {
        self.submit_acquire(LockKey::new(lock_name, entity))
            .await?
            .wait_or_cancel(token)
            .await
    }

    /// Like [`acquire`](Self::acquire), giving up with `LockError::Timeout`.
    pub async fn acquire_timeout(&self, lock_name: &str, entity: &str, timeout: Duration) -> Result<()> {
        self.submit_acquire(LockKey::new(lock_name, entity))
            .await?
            .wait_timeout(timeout)
            .await
    }

    /// Acquire if free; never queues.
    pub async fn try_acquire(&self, lock_name: &str, entity: &str) -> Result<TryAcquireReply> {
        let key = LockKey::new(lock_name, entity);
        self.request(|reply| LockCommand::TryAcquire { key, reply }).await
    }

    /// Release `lock_name` held by `entity`, handing it to the next waiter.
    pub async fn release(&self, lock_name: &str, entity: &str) -> Result<ReleaseReply> {
        self.submit_release(LockKey::new(lock_name, entity)).await?.wait().await
    }

    /// Current owner and live waiters of `lock_name`, `None` when free.
    pub async fn inspect(&self, lock_name: &str) -> Result<Option<LockSnapshot>> {
        let lock_name = lock_name.to_string();
        self.request(|reply| LockCommand::Inspect { lock_name, reply }).await
    }

    pub async fn stats(&self) -> Result<ManagerStats> {
        self.request(|reply| LockCommand::Stats { reply }).await
    }
}

/// Answer to a submitted command
#[derive(Debug)]
pub struct PendingReply<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> PendingReply<T> {
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| LockError::ManagerStopped)
    }
}

/// A queued acquire.
///
/// Dropping it before the grant withdraws the request. A grant that arrives
/// for a dropped request is released again.
#[derive(Debug)]
#[must_use = "dropping a pending acquire withdraws it"]
pub struct PendingAcquire {
    key: LockKey,
    rx: Option<oneshot::Receiver<()>>,
    commands: mpsc::Sender<LockCommand>,
}

impl PendingAcquire {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Wait for the grant.
    pub async fn wait(self) -> Result<()> {
        match self.wait_or_abort(std::future::pending()).await? {
            true => Ok(()),
            false => Err(LockError::internal("acquire aborted without an abort signal")),
        }
    }

    /// Wait for the grant or for `token`. A grant that raced the cancellation wins.
    pub async fn wait_or_cancel(self, token: &CancellationToken) -> Result<()> {
        let lock_name = self.key.lock_name.clone();
        match self.wait_or_abort(token.cancelled()).await? {
            true => Ok(()),
            false => Err(LockError::cancelled(lock_name)),
        }
    }

    /// Wait for the grant at most `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<()> {
        let lock_name = self.key.lock_name.clone();
        match self.wait_or_abort(tokio::time::sleep(timeout)).await? {
            true => Ok(()),
            false => Err(LockError::timeout(lock_name, timeout)),
        }
    }

    /// `Ok(true)` when granted, `Ok(false)` when `abort` completed first.
    async fn wait_or_abort(mut self, abort: impl Future<Output = ()>) -> Result<bool> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(LockError::internal("pending acquire already consumed"));
        };

        let outcome = tokio::select! {
            biased;
            res = &mut *rx => Some(res.is_ok()),
            _ = abort => None,
        };

        let granted = match outcome {
            Some(true) => true,
            Some(false) => {
                self.rx = None;
                return Err(LockError::ManagerStopped);
            }
            None => {
                // Closing first makes the manager skip this waiter from now on
                rx.close();
                rx.try_recv().is_ok()
            }
        };
        self.rx = None;
        Ok(granted)
    }
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if rx.try_recv().is_ok() {
            let (reply, _) = oneshot::channel();
            let command = LockCommand::Release {
                key: self.key.clone(),
                reply,
            };
            match self.commands.try_send(command) {
                Ok(()) => {}
                Err(TrySendError::Full(command)) => match Handle::try_current() {
                    Ok(handle) => {
                        let commands = self.commands.clone();
                        handle.spawn(async move {
                            if commands.send(command).await.is_err() {
                                debug!("manager stopped before an abandoned grant was released");
                            }
                        });
                    }
                    Err(_) => {
                        warn!(lock_name = %self.key.lock_name, entity = %self.key.entity, "could not release abandoned grant");
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(lock_name = %self.key.lock_name, "manager stopped, abandoned grant dropped with it");
                }
            }
        }
    }
}
