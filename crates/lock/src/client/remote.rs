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

//! Connection multiplexer.
//!
//! One TCP connection carries any number of concurrent lock operations. A
//! writer task owns the pending tables and the write half; a reader task
//! decodes responses and hands them to the writer, which routes each one to
//! the caller waiting on the same `(lock_name, entity)`.

use crate::{
    LockKey,
    client::LockClient,
    config::ClientConfig,
    error::{LockError, Result},
    protocol::{ClientCodec, Command, ProtocolError, Response},
    types::{ReleaseReply, TryAcquireReply},
};
use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{collections::HashMap, future::Future, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, warn};

type CommandSink = SplitSink<Framed<TcpStream, ClientCodec>, Command>;
type ResponseStream = SplitStream<Framed<TcpStream, ClientCodec>>;
type ReplySender = oneshot::Sender<Result<Response>>;

enum ClientRequest {
    Submit { command: Command, reply: ReplySender },
    Close,
}

/// Outstanding requests, at most one per key and table
#[derive(Default)]
struct PendingTables {
    /// acquire and try-acquire
    acquires: HashMap<LockKey, ReplySender>,
    releases: HashMap<LockKey, ReplySender>,
}

/// Remote lock client
#[derive(Debug, Clone)]
pub struct RemoteClient {
    endpoint: String,
    requests: mpsc::Sender<ClientRequest>,
    token: CancellationToken,
}

impl RemoteClient {
    /// Connect to the lock server at `endpoint` (`host:port`).
    pub async fn connect(endpoint: &str, config: &ClientConfig) -> Result<Self> {
        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(LockError::network(format!("Failed to connect to {endpoint}"), e)),
            Err(_) => {
                return Err(LockError::network(
                    format!("Timed out connecting to {endpoint} after {:?}", config.connect_timeout),
                    std::io::Error::from(std::io::ErrorKind::TimedOut),
                ));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(endpoint, error = %e, "set_nodelay failed");
        }

        let (sink, frames) = Framed::new(stream, ClientCodec::new(config.max_line_length)).split();
        let depth = config.request_queue_depth.max(1);
        let (requests, request_rx) = mpsc::channel(depth);
        let (response_tx, response_rx) = mpsc::channel(depth);
        let token = CancellationToken::new();

        tokio::spawn(read_responses(frames, response_tx, token.clone(), endpoint.to_string()));
        tokio::spawn(write_requests(sink, request_rx, response_rx, token.clone(), endpoint.to_string()));

        debug!(endpoint, "connected to lock server");
        Ok(Self {
            endpoint: endpoint.to_string(),
            requests,
            token,
        })
    }

    /// True once the connection has ended
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed() || self.token.is_cancelled()
    }

    async fn submit(&self, command: Command) -> Result<oneshot::Receiver<Result<Response>>> {
        if let Some(key) = command.key() {
            key.validate()?;
        }
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(ClientRequest::Submit { command, reply })
            .await
            .map_err(|_| LockError::connection_closed(&self.endpoint))?;
        Ok(rx)
    }

    async fn round_trip(&self, command: Command) -> Result<Response> {
        let rx = self.submit(command).await?;
        self.receive(rx).await
    }

    async fn receive(&self, rx: oneshot::Receiver<Result<Response>>) -> Result<Response> {
        rx.await.map_err(|_| LockError::connection_closed(&self.endpoint))?
    }

    /// `None` when `abort` fired first. The pending entry then stays until the
    /// server answers, and a grant arriving for it is released.
    async fn receive_or_abort(
        &self,
        mut rx: oneshot::Receiver<Result<Response>>,
        abort: impl Future<Output = ()>,
    ) -> Option<Result<Response>> {
        let outcome = tokio::select! {
            biased;
            res = &mut rx => Some(res),
            _ = abort => None,
        };
        match outcome {
            Some(res) => Some(res.map_err(|_| LockError::connection_closed(&self.endpoint)).and_then(|r| r)),
            None => {
                rx.close();
                rx.try_recv().ok()
            }
        }
    }

    /// Acquire, giving up with `LockError::Cancelled` when `token` fires.
    pub async fn acquire_lock_with_cancel(&self, lock_name: &str, entity: &str, token: &CancellationToken) -> Result<()> {
        let rx = self.submit(Command::AcquireLock(LockKey::new(lock_name, entity))).await?;
        match self.receive_or_abort(rx, token.cancelled()).await {
            Some(res) => expect_acquired(res?),
            None => Err(LockError::cancelled(lock_name)),
        }
    }

    /// Acquire, giving up with `LockError::Timeout` after `timeout`.
    pub async fn acquire_lock_timeout(&self, lock_name: &str, entity: &str, timeout: Duration) -> Result<()> {
        let rx = self.submit(Command::AcquireLock(LockKey::new(lock_name, entity))).await?;
        match self.receive_or_abort(rx, tokio::time::sleep(timeout)).await {
            Some(res) => expect_acquired(res?),
            None => Err(LockError::timeout(lock_name, timeout)),
        }
    }
}

fn unexpected(response: &Response) -> LockError {
    LockError::Protocol(ProtocolError::UnexpectedStatus {
        response: response.name().to_string(),
        status: response.key().map(ToString::to_string).unwrap_or_default(),
    })
}

fn expect_acquired(response: Response) -> Result<()> {
    match response {
        Response::LockAcquired(_) => Ok(()),
        other => Err(unexpected(&other)),
    }
}

#[async_trait]
impl LockClient for RemoteClient {
    async fn acquire_lock(&self, lock_name: &str, entity: &str) -> Result<()> {
        debug!(endpoint = %self.endpoint, lock_name, entity, "remote acquire_lock");
        expect_acquired(self.round_trip(Command::AcquireLock(LockKey::new(lock_name, entity))).await?)
    }

    async fn try_acquire_lock(&self, lock_name: &str, entity: &str) -> Result<TryAcquireReply> {
        debug!(endpoint = %self.endpoint, lock_name, entity, "remote try_acquire_lock");
        let response = self
            .round_trip(Command::TryAcquireLock(LockKey::new(lock_name, entity)))
            .await?;
        match response {
            Response::LockAcquired(_) => Ok(TryAcquireReply::Acquired),
            Response::TryAcquireFailed { .. } => Ok(TryAcquireReply::Held {
                owner: response.owner().unwrap_or_default().to_string(),
            }),
            other => Err(unexpected(&other)),
        }
    }

    async fn release_lock(&self, lock_name: &str, entity: &str) -> Result<ReleaseReply> {
        debug!(endpoint = %self.endpoint, lock_name, entity, "remote release_lock");
        match self.round_trip(Command::ReleaseLock(LockKey::new(lock_name, entity))).await? {
            Response::LockReleased { released: true, .. } => Ok(ReleaseReply::Released),
            Response::LockReleased { released: false, .. } => Ok(ReleaseReply::Denied),
            other => Err(unexpected(&other)),
        }
    }

    async fn close(&self) -> Result<()> {
        // Already closed is fine
        let _ = self.requests.send(ClientRequest::Close).await;
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

async fn read_responses(
    mut frames: ResponseStream,
    responses: mpsc::Sender<Response>,
    token: CancellationToken,
    endpoint: String,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.next() => frame,
        };
        match frame {
            None => {
                debug!(endpoint = %endpoint, "server closed connection");
                break;
            }
            Some(Err(e)) => {
                warn!(endpoint = %endpoint, error = %e, "read failed, dropping connection");
                break;
            }
            Some(Ok(Err(e))) => warn!(endpoint = %endpoint, error = %e, "malformed response dropped"),
            Some(Ok(Ok(response))) => {
                if responses.send(response).await.is_err() {
                    break;
                }
            }
        }
    }
    token.cancel();
}

async fn write_requests(
    mut sink: CommandSink,
    mut requests: mpsc::Receiver<ClientRequest>,
    mut responses: mpsc::Receiver<Response>,
    token: CancellationToken,
    endpoint: String,
) {
    let mut pending = PendingTables::default();

    loop {
        tokio::select! {
            response = responses.recv() => match response {
                Some(response) => {
                    if let Err(e) = pending.deliver(response, &mut sink).await {
                        warn!(endpoint = %endpoint, error = %e, "write failed, dropping connection");
                        break;
                    }
                }
                None => break,
            },
            request = requests.recv() => match request {
                Some(ClientRequest::Submit { command, reply }) => {
                    if let Err(e) = pending.submit(command, reply, &mut sink).await {
                        warn!(endpoint = %endpoint, error = %e, "write failed, dropping connection");
                        break;
                    }
                }
                Some(ClientRequest::Close) => {
                    let _ = sink.send(Command::Close).await;
                    debug!(endpoint = %endpoint, "connection closed by client");
                    break;
                }
                None => break,
            },
            _ = token.cancelled() => break,
        }
    }

    token.cancel();
    requests.close();
    let _ = sink.close().await;
    // Dropping the tables wakes every waiting caller with ConnectionClosed
    debug!(
        endpoint = %endpoint,
        acquires = pending.acquires.len(),
        releases = pending.releases.len(),
        "connection writer stopped"
    );
}

impl PendingTables {
    /// Record and write one request. Only socket failures are returned.
    async fn submit(&mut self, command: Command, reply: ReplySender, sink: &mut CommandSink) -> Result<()> {
        let table = match &command {
            Command::AcquireLock(_) | Command::TryAcquireLock(_) => &mut self.acquires,
            Command::ReleaseLock(_) => &mut self.releases,
            Command::Close => return Ok(()),
        };
        let Some(key) = command.key().cloned() else {
            return Ok(());
        };

        if table.contains_key(&key) {
            let _ = reply.send(Err(LockError::double_request(key.lock_name, key.entity)));
            return Ok(());
        }

        match sink.send(command).await {
            Ok(()) => {
                table.insert(key, reply);
                Ok(())
            }
            Err(LockError::Protocol(e)) => {
                let _ = reply.send(Err(LockError::Protocol(e)));
                Ok(())
            }
            Err(e) => {
                let _ = reply.send(Err(LockError::connection_closed(e.to_string())));
                Err(e)
            }
        }
    }

    async fn deliver(&mut self, response: Response, sink: &mut CommandSink) -> Result<()> {
        let table = match &response {
            Response::LockAcquired(_) | Response::TryAcquireFailed { .. } => &mut self.acquires,
            Response::LockReleased { .. } => &mut self.releases,
            Response::TooFewArguments | Response::UnknownCommand { .. } => {
                warn!(response = response.name(), "server rejected a request");
                return Ok(());
            }
        };
        let Some(key) = response.key().cloned() else {
            return Ok(());
        };
        let Some(reply) = table.remove(&key) else {
            warn!(lock_name = %key.lock_name, entity = %key.entity, response = response.name(), "response was never requested");
            return Ok(());
        };

        let Err(Ok(response)) = reply.send(Ok(response)) else {
            return Ok(());
        };
        // The caller stopped waiting; give back what it was granted
        if matches!(response, Response::LockAcquired(_)) && !self.releases.contains_key(&key) {
            debug!(lock_name = %key.lock_name, entity = %key.entity, "releasing grant nobody waits for");
            let (reply, _) = oneshot::channel();
            self.releases.insert(key.clone(), reply);
            if let Err(e) = sink.send(Command::ReleaseLock(key.clone())).await {
                self.releases.remove(&key);
                return Err(e);
            }
        }
        Ok(())
    }
}
