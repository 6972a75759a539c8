use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use marshrpc_common::protocol::{
    encode_failure, Contract, Declaration, ErrorKind, Marshal, Payload, RemoteError, Request, Result, RpcError,
    Status,
};
use marshrpc_common::transport::{TcpConfig, TcpListener, Transport, DEFAULT_MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::dispatch::{async_slot, run, sync_slot, DispatchTable, Outcome};
use crate::stats::{ServerStats, StatsSnapshot};

/// Pause after a failed accept so a persistent error does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of a [`Server`].
///
/// Transitions only move forward: `Idle → Serving → ShuttingDown → Stopped`,
/// or `Idle → Stopped` when a server is stopped before it ever served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Idle,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Server settings.
///
/// # Default Configuration
///
/// - `max_connections`: unlimited
/// - `max_frame_size`: 100 MB
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Concurrent connections accepted by [`Server::listen`]; further
    /// connections wait in the OS backlog until a slot frees up
    pub max_connections: Option<usize>,
    /// Frame limit used by [`Server::listen_on`]
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Binds handlers to the declarations of a contract.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use marshrpc_common::protocol::{Contract, Declaration, RemoteError};
/// use marshrpc_server::ServerBuilder;
///
/// const ADD: Declaration<(i32, i32), i32> = Declaration::new(1, "add");
/// const FAIL: Declaration<(), i32> = Declaration::new(2, "fail");
///
/// let contract = Arc::new(Contract::builder("calc").declare(&ADD).declare(&FAIL).build().unwrap());
/// let server = ServerBuilder::new(contract)
///     .bind(&ADD, |(a, b)| Ok(a + b))
///     .bind_async(&FAIL, |()| async { Err::<i32, _>(RemoteError::internal("boom")) })
///     .build()
///     .unwrap();
/// ```
pub struct ServerBuilder {
    contract: Arc<Contract>,
    table: DispatchTable,
    config: ServerConfig,
    error: Option<RpcError>,
}

impl ServerBuilder {
    pub fn new(contract: Arc<Contract>) -> Self {
        Self {
            contract,
            table: DispatchTable::default(),
            config: ServerConfig::default(),
            error: None,
        }
    }

    /// Binds a synchronous handler. It runs on the connection's task, so it
    /// should not block for long.
    pub fn bind<A, R, F>(mut self, declaration: &Declaration<A, R>, handler: F) -> Self
    where
        A: Marshal + 'static,
        R: Marshal + 'static,
        F: Fn(A) -> std::result::Result<R, RemoteError> + Send + Sync + 'static,
    {
        if self.accept(declaration) {
            self.table.insert(declaration.id(), sync_slot(handler));
        }
        self
    }

    /// Binds an asynchronous handler.
    pub fn bind_async<A, R, F, Fut>(mut self, declaration: &Declaration<A, R>, handler: F) -> Self
    where
        A: Marshal + 'static,
        R: Marshal + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, RemoteError>> + Send + 'static,
    {
        if self.accept(declaration) {
            self.table.insert(declaration.id(), async_slot(handler));
        }
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Checks a declaration against the contract, keeping the first error.
    fn accept<A: Marshal, R: Marshal>(&mut self, declaration: &Declaration<A, R>) -> bool {
        if self.error.is_some() {
            return false;
        }
        if let Err(e) = self.contract.check(declaration) {
            self.error = Some(e);
            return false;
        }
        if self.table.contains(declaration.id()) {
            self.error = Some(RpcError::BadCall(format!(
                "procedure '{}' (call id {}) is bound twice",
                declaration.name(),
                declaration.id()
            )));
            return false;
        }
        true
    }

    /// Finishes the server.
    ///
    /// # Errors
    ///
    /// - `BadCall` if a bound declaration is not part of the contract or was bound twice
    /// - `UnboundProcedure` for the lowest call id in the contract without a handler
    pub fn build(self) -> Result<Server> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if let Some(info) = self.contract.procedures().find(|info| !self.table.contains(info.id)) {
            return Err(RpcError::UnboundProcedure {
                id: info.id,
                name: info.name,
            });
        }

        let (state, _) = watch::channel(ServerState::Idle);
        let stats = ServerStats::new(&self.contract);

        tracing::debug!(
            "Built server for contract '{}' with {} procedures",
            self.contract.name(),
            self.table.len()
        );

        Ok(Server {
            inner: Arc::new(Inner {
                contract: self.contract,
                table: self.table,
                config: self.config,
                state,
                active: AtomicUsize::new(0),
                stats,
            }),
        })
    }
}

struct Inner {
    contract: Arc<Contract>,
    table: DispatchTable,
    config: ServerConfig,
    state: watch::Sender<ServerState>,
    /// Connections and accept loops currently running
    active: AtomicUsize,
    stats: ServerStats,
}

impl Inner {
    /// Completes a shutdown once nothing is running anymore.
    fn finish_if_drained(&self) {
        if self.active.load(Ordering::SeqCst) == 0 {
            let stopped = self.state.send_if_modified(|state| {
                if *state == ServerState::ShuttingDown {
                    *state = ServerState::Stopped;
                    true
                } else {
                    false
                }
            });
            if stopped {
                tracing::info!("Server stopped");
            }
        }
    }
}

/// Keeps the server from reaching `Stopped` while alive.
struct Activity {
    inner: Arc<Inner>,
    connection: bool,
}

impl Activity {
    fn new(inner: &Arc<Inner>, connection: bool) -> Self {
        inner.active.fetch_add(1, Ordering::SeqCst);
        if connection {
            inner.stats.connection_opened();
        }
        Self {
            inner: inner.clone(),
            connection,
        }
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        if self.connection {
            self.inner.stats.connection_closed();
        }
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.finish_if_drained();
    }
}

/// Contract-bound RPC server.
///
/// A server is cheap to clone; clones share the dispatch table, the state
/// and the statistics. Each connection is served on its own task, and
/// requests on one connection are handled strictly one after another: the
/// response to a request is sent before the next request is read.
///
/// # Per-request Protocol
///
/// 1. Decode the call id (failure: `MalformedPayload` response)
/// 2. Look up the handler (missing: `UnknownProcedure` response)
/// 3. Decode the arguments (failure: `MalformedPayload` response)
/// 4. Run the handler and send its result or error descriptor
///
/// Only transport errors end a connection.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder(contract: Arc<Contract>) -> ServerBuilder {
        ServerBuilder::new(contract)
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.inner.contract
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver that observes every later state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Moves an idle server to `Serving`. Starting a serving server is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ServerStopped` once `stop` has been called.
    pub fn start(&self) -> Result<()> {
        let mut result = Ok(());
        let started = self.inner.state.send_if_modified(|state| match *state {
            ServerState::Idle => {
                *state = ServerState::Serving;
                true
            }
            ServerState::Serving => false,
            ServerState::ShuttingDown | ServerState::Stopped => {
                result = Err(RpcError::ServerStopped);
                false
            }
        });
        if started {
            tracing::info!("Serving contract '{}'", self.inner.contract.name());
        }
        result
    }

    /// Requests a graceful shutdown.
    ///
    /// Connections finish the request they are dispatching, send its
    /// response and close. The accept loop stops accepting. The state moves
    /// to `Stopped` when the last of them is gone.
    pub fn stop(&self) {
        let changed = self.inner.state.send_if_modified(|state| match *state {
            ServerState::Idle => {
                *state = ServerState::Stopped;
                true
            }
            ServerState::Serving => {
                *state = ServerState::ShuttingDown;
                true
            }
            ServerState::ShuttingDown | ServerState::Stopped => false,
        });
        if changed {
            tracing::info!("Server shutting down");
        }
        self.inner.finish_if_drained();
    }

    /// Starts the server, serves a single connection to completion, then stops.
    pub async fn serve<T: Transport>(&self, transport: T) -> Result<()> {
        self.start()?;
        let result = self.serve_connection(transport).await;
        self.stop();
        result
    }

    /// Serves one connection until the peer closes it or the server shuts down.
    ///
    /// Starts an idle server. Many connections may be served concurrently
    /// from separate tasks.
    ///
    /// Once shutdown begins no further request is read: a request being
    /// dispatched still gets its response, while requests queued behind it
    /// are dropped unanswered when the connection closes.
    ///
    /// # Errors
    ///
    /// - `ServerStopped` if the server is shutting down or stopped
    /// - the transport error that ended the connection
    pub async fn serve_connection<T: Transport>(&self, mut transport: T) -> Result<()> {
        self.start()?;
        let _activity = Activity::new(&self.inner, true);
        let peer = transport.peer();
        let mut state = self.inner.state.subscribe();
        tracing::debug!("Serving connection {}", peer);

        let result = loop {
            // Shutdown wins over a request that is already queued
            let received = tokio::select! {
                biased;
                _ = state.wait_for(|s| *s >= ServerState::ShuttingDown) => {
                    tracing::debug!("Closing connection {} for shutdown", peer);
                    break Ok(());
                }
                received = transport.receive() => received,
            };

            let payload = match received {
                Ok(payload) => payload,
                Err(RpcError::TransportClosed) => {
                    tracing::debug!("Connection {} closed by peer", peer);
                    break Ok(());
                }
                Err(e) => {
                    tracing::warn!("Dropping connection {}: {}", peer, e);
                    break Err(e);
                }
            };

            // The dispatch is never interrupted by a shutdown
            let response = self.dispatch(payload).await;

            if let Err(e) = transport.send(response).await {
                tracing::warn!("Failed to send response to {}: {}", peer, e);
                break Err(e);
            }
        };

        if let Err(e) = transport.close().await {
            tracing::debug!("Error closing connection {}: {}", peer, e);
        }
        result
    }

    /// Binds a TCP listener using this server's frame limit, then runs
    /// [`Server::listen`] on it.
    pub async fn listen_on(&self, bind_addr: &str) -> Result<()> {
        let config = TcpConfig::default().with_max_frame_size(self.inner.config.max_frame_size);
        let listener = TcpListener::bind_with_config(bind_addr, config).await?;
        self.listen(listener).await
    }

    /// Accepts connections until the server is stopped, serving each on its
    /// own task.
    ///
    /// Returns after every accepted connection has finished.
    pub async fn listen(&self, listener: TcpListener) -> Result<()> {
        self.start()?;
        let _activity = Activity::new(&self.inner, false);
        let limit = self.inner.config.max_connections.map(|n| Arc::new(Semaphore::new(n)));
        let mut state = self.inner.state.subscribe();
        let mut connections = JoinSet::new();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Listening on {}", addr);
        }

        loop {
            let permit = match &limit {
                Some(semaphore) => tokio::select! {
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    _ = state.wait_for(|s| *s >= ServerState::ShuttingDown) => break,
                },
                None => None,
            };

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = state.wait_for(|s| *s >= ServerState::ShuttingDown) => break,
            };

            match accepted {
                Ok((transport, peer_addr)) => {
                    tracing::debug!("Connection established from {}", peer_addr);
                    let server = self.clone();
                    connections.spawn(async move {
                        let _permit = permit;
                        // Errors are logged by serve_connection
                        let _ = server.serve_connection(transport).await;
                    });
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }

            while let Some(finished) = connections.try_join_next() {
                if let Err(e) = finished {
                    tracing::warn!("Connection task failed: {}", e);
                }
            }
        }

        tracing::info!("Stopped accepting; draining {} connections", connections.len());
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                tracing::warn!("Connection task failed: {}", e);
            }
        }
        Ok(())
    }

    /// Produces exactly one response payload for one request payload.
    async fn dispatch(&self, payload: Payload) -> Payload {
        let start_time = Instant::now();

        let request = match Request::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejecting request without a valid call id: {}", e);
                self.inner.stats.record_malformed();
                return failure_response(&RemoteError::malformed(format!("bad request header: {}", e)));
            }
        };

        let call_id = request.call_id;
        let slot = match self.inner.table.get(call_id) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!("{}", e);
                self.inner.stats.record_unknown_procedure();
                return failure_response(&RemoteError::from(e));
            }
        };

        tracing::debug!("Dispatching call id {} ({} argument bytes)", call_id, request.args.remaining());

        match run(slot, request).await {
            Outcome::Success(response) => {
                self.inner.stats.record_call(call_id, start_time, true);
                response
            }
            Outcome::Failed(error) => {
                tracing::debug!("Call id {} failed: {}", call_id, error);
                self.inner.stats.record_call(call_id, start_time, false);
                failure_response(&error)
            }
            Outcome::Rejected(error) => {
                tracing::warn!("Call id {} rejected: {}", call_id, error);
                self.inner.stats.record_malformed();
                self.inner.stats.record_call(call_id, start_time, false);
                failure_response(&error)
            }
        }
    }
}

/// Encodes a failure response, falling back to an empty `Internal` descriptor
/// if the message cannot be encoded.
fn failure_response(error: &RemoteError) -> Payload {
    match encode_failure(error) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to encode error response: {}", e);
            let mut payload = Payload::with_capacity(7);
            payload.write_raw(&[Status::Failure as u8]);
            payload.write_raw(&(ErrorKind::Internal as u16).to_be_bytes());
            payload.write_raw(&0u32.to_be_bytes());
            payload
        }
    }
}
