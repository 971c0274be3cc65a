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

//! TCP front end of a lock manager.
//!
//! Each accepted connection gets a read loop and a writer task. Acquire and
//! release are queued on the manager inline, so the manager sees them in the
//! order they arrived on the wire, and their answers are awaited in spawned
//! tasks so a blocked acquire never stalls the read loop.

use crate::{
    LockKey,
    config::ServerConfig,
    error::{LockError, Result},
    manager::LockManager,
    protocol::{Command, OWNER_PREFIX, Response, ServerCodec},
    types::TryAcquireReply,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, error, info, warn};

type ResponseSink = SplitSink<Framed<TcpStream, ServerCodec>, Response>;

/// Maps wire keys to the identity the manager sees
#[derive(Debug, Clone, Copy)]
struct Identity {
    peer: SocketAddr,
    peer_scoped: bool,
}

impl Identity {
    fn key(&self, key: &LockKey) -> LockKey {
        if self.peer_scoped {
            LockKey::new(key.lock_name.clone(), format!("{}_{}", self.peer, key.entity))
        } else {
            key.clone()
        }
    }
}

/// Shared by the tasks serving one connection
struct ConnectionContext {
    manager: LockManager,
    identity: Identity,
}

impl ConnectionContext {
    /// Give back a lock whose grant never reached the client.
    async fn release_undelivered(&self, response: &Response) {
        let Response::LockAcquired(key) = response else {
            return;
        };
        let key = self.identity.key(key);
        warn!(peer = %self.identity.peer, lock_name = %key.lock_name, entity = %key.entity, "grant undeliverable, releasing");
        if let Err(e) = self.manager.release(&key.lock_name, &key.entity).await {
            error!(lock_name = %key.lock_name, error = %e, "failed to release undelivered grant");
        }
    }

    async fn deliver(&self, outbound: &mpsc::Sender<Response>, response: Response) -> bool {
        match outbound.send(response).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(response)) => {
                self.release_undelivered(&response).await;
                false
            }
        }
    }
}

pub struct LockServer {
    listener: TcpListener,
    manager: LockManager,
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for LockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("config", &self.config)
            .finish()
    }
}

impl LockServer {
    /// Bind the listener described by `config.address`.
    pub async fn bind(config: ServerConfig, manager: LockManager) -> Result<Self> {
        let listener = TcpListener::bind(&config.address)
            .await
            .map_err(|e| LockError::network(format!("Failed to bind {}", config.address), e))?;
        Ok(Self {
            listener,
            manager,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn manager(&self) -> &LockManager {
        &self.manager
    }

    /// Accept connections until `shutdown` fires. Open connections are
    /// cancelled along with it.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!(address = %local_addr, peer_scoped_entities = self.config.peer_scoped_entities, "lock server listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "error accepting connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "set_nodelay failed");
            }
            let context = Arc::new(ConnectionContext {
                manager: self.manager.clone(),
                identity: Identity {
                    peer,
                    peer_scoped: self.config.peer_scoped_entities,
                },
            });
            tokio::spawn(handle_connection(stream, context, self.config.clone(), shutdown.child_token()));
        }

        info!(address = %local_addr, "lock server stopped");
        Ok(())
    }
}

/// Bind `config.address` with a fresh manager and serve it in the background.
pub async fn spawn_server(config: ServerConfig) -> Result<(SocketAddr, CancellationToken, JoinHandle<Result<()>>)> {
    let manager = LockManager::with_queue_depth(config.manager_queue_depth);
    let server = LockServer::bind(config, manager).await?;
    let addr = server.local_addr()?;
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(shutdown.clone()));
    Ok((addr, shutdown, handle))
}

async fn handle_connection(
    stream: TcpStream,
    context: Arc<ConnectionContext>,
    config: Arc<ServerConfig>,
    token: CancellationToken,
) {
    let peer = context.identity.peer;
    debug!(peer = %peer, "connection accepted");

    let (sink, mut frames) = Framed::new(stream, ServerCodec::new(config.max_line_length)).split();
    let (outbound, responses) = mpsc::channel(config.outbound_queue_depth.max(1));
    let writer = tokio::spawn(write_responses(sink, responses, context.clone()));

    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.next() => frame,
        };

        let command = match frame {
            None => {
                debug!(peer = %peer, "peer closed connection");
                break;
            }
            Some(Err(e)) => {
                warn!(peer = %peer, error = %e, "read failed, dropping connection");
                break;
            }
            Some(Ok(Err(e))) => {
                debug!(peer = %peer, error = %e, "malformed request");
                if !context.deliver(&outbound, e.reply()).await {
                    break;
                }
                continue;
            }
            Some(Ok(Ok(command))) => command,
        };

        if !dispatch(command, &context, &outbound, &token).await {
            break;
        }
    }

    // Withdraws this connection's queued acquires
    token.cancel();
    drop(frames);
    drop(outbound);
    if let Err(e) = writer.await {
        error!(peer = %peer, error = %e, "connection writer panicked");
    }
    debug!(peer = %peer, "connection closed");
}

/// Returns false when the connection should end.
async fn dispatch(
    command: Command,
    context: &Arc<ConnectionContext>,
    outbound: &mpsc::Sender<Response>,
    token: &CancellationToken,
) -> bool {
    let peer = context.identity.peer;
    match command {
        Command::Close => {
            debug!(peer = %peer, "close requested");
            false
        }
        Command::TryAcquireLock(key) => {
            let identity = context.identity.key(&key);
            let response = match context.manager.try_acquire(&identity.lock_name, &identity.entity).await {
                Ok(TryAcquireReply::Acquired) => Response::LockAcquired(key),
                Ok(TryAcquireReply::Held { owner }) => Response::TryAcquireFailed {
                    key,
                    reason: format!("{OWNER_PREFIX}{owner}"),
                },
                Err(e) => {
                    error!(peer = %peer, error = %e, "try acquire failed");
                    return false;
                }
            };
            context.deliver(outbound, response).await
        }
        Command::AcquireLock(key) => {
            let pending = match context.manager.submit_acquire(context.identity.key(&key)).await {
                Ok(pending) => pending,
                Err(e) => {
                    error!(peer = %peer, error = %e, "acquire failed");
                    return false;
                }
            };
            let context = context.clone();
            let outbound = outbound.clone();
            let token = token.clone();
            tokio::spawn(async move {
                match pending.wait_or_cancel(&token).await {
                    Ok(()) => {
                        context.deliver(&outbound, Response::LockAcquired(key)).await;
                    }
                    Err(LockError::Cancelled { .. }) => {
                        debug!(peer = %peer, lock_name = %key.lock_name, entity = %key.entity, "queued acquire withdrawn");
                    }
                    Err(e) => error!(peer = %peer, lock_name = %key.lock_name, error = %e, "acquire failed"),
                }
            });
            true
        }
        Command::ReleaseLock(key) => {
            let identity = context.identity.key(&key);
            let pending = match context.manager.submit_release(identity).await {
                Ok(pending) => pending,
                Err(e) => {
                    error!(peer = %peer, error = %e, "release failed");
                    return false;
                }
            };
            let context = context.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                match pending.wait().await {
                    Ok(reply) => {
                        let released = reply.is_released();
                        context.deliver(&outbound, Response::LockReleased { key, released }).await;
                    }
                    Err(e) => error!(peer = %peer, lock_name = %key.lock_name, error = %e, "release failed"),
                }
            });
            true
        }
    }
}

/// Sole writer of a connection. Grants that cannot be written are released.
async fn write_responses(mut sink: ResponseSink, mut responses: mpsc::Receiver<Response>, context: Arc<ConnectionContext>) {
    let peer = context.identity.peer;
    while let Some(response) = responses.recv().await {
        match sink.send(response.clone()).await {
            Ok(()) => {}
            Err(LockError::Protocol(e)) => {
                warn!(peer = %peer, error = %e, "response not encodable");
                context.release_undelivered(&response).await;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "write failed");
                context.release_undelivered(&response).await;
                break;
            }
        }
    }

    responses.close();
    while let Some(response) = responses.recv().await {
        context.release_undelivered(&response).await;
    }
    let _ = sink.close().await;
}
