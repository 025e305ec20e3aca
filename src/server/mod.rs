//! # Server
//!
//! Accepts TCP connections and drives them through a [`Protocol`] and a
//! [`Callback`].
//!
//! ## Lifecycle
//! ```text
//! accept -> on_connect -> Open (read / dispatch / write) -> Closing -> Closed -> on_close
//! ```
//!
//! [`Server::start`] runs until [`Server::stop`] is called or the listener
//! fails for good. Stopping refuses new connections, closes the live ones,
//! waits up to the grace period for them to finish and then force-closes
//! whatever is still running, including connections still waiting on
//! `on_connect`. Sessions whose `on_close` outlives a short extra wait are
//! aborted.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use frame_server::config::ServerConfig;
//! use frame_server::core::packet::FramedPacket;
//! use frame_server::protocol::LengthPrefixedProtocol;
//! use frame_server::server::{Callback, Connection, Server};
//!
//! struct Echo;
//!
//! impl Callback<FramedPacket> for Echo {
//!     async fn on_message(&self, conn: &Arc<Connection>, packet: FramedPacket) -> bool {
//!         conn.try_write(packet).is_ok()
//!     }
//! }
//!
//! # async fn run() -> frame_server::error::Result<()> {
//! let server = Arc::new(Server::new(
//!     ServerConfig::default(),
//!     Echo,
//!     LengthPrefixedProtocol::default(),
//! ));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:6868").await?;
//!
//! let handle = {
//!     let server = server.clone();
//!     tokio::spawn(async move { server.start(listener, Duration::from_secs(1)).await })
//! };
//! server.stop().await;
//! # let _ = handle.await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::Protocol;
use crate::utils::metrics::Metrics;

pub mod callback;
pub mod connection;
mod session;

pub use callback::Callback;
pub use connection::{ConnState, Connection};

use session::{Registry, Session};

/// TCP server generic over the application callback `C` and protocol `P`.
pub struct Server<C, P> {
    config: ServerConfig,
    callback: Arc<C>,
    protocol: Arc<P>,
    connections: Registry,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    connection_limit: Arc<Semaphore>,
    next_id: AtomicU64,
    running: AtomicBool,
    finished: watch::Sender<bool>,
}

impl<C, P> Server<C, P>
where
    P: Protocol,
    C: Callback<P::Packet>,
{
    pub fn new(config: ServerConfig, callback: C, protocol: P) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            connection_limit: Arc::new(Semaphore::new(config.max_connections.max(1))),
            config,
            callback: Arc::new(callback),
            protocol: Arc::new(protocol),
            connections: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            finished,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn callback(&self) -> &Arc<C> {
        &self.callback
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// True once [`stop`](Self::stop) was called.
    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Bind the configured address and serve with the configured grace period.
    pub async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(ProtocolError::Listener)?;
        self.start(listener, self.config.shutdown_timeout).await
    }

    /// Accept connections from `listener` until stopped.
    ///
    /// Returns `Ok(())` after a requested stop once every connection has
    /// finished, or [`ProtocolError::Listener`] when accepting fails with a
    /// non-transient error. A server runs at most once.
    #[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
    pub async fn start(&self, listener: TcpListener, grace: Duration) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::Custom(constants::ERR_SERVER_RUNNING.to_string()));
        }
        info!(
            max_connections = self.config.max_connections,
            send_queue_limit = self.config.send_queue_limit,
            receive_queue_limit = self.config.receive_queue_limit,
            "Server listening"
        );

        let mut sessions = JoinSet::new();
        let outcome = self.accept_loop(&listener, &mut sessions).await;

        drop(listener);
        self.shutdown.cancel();
        self.drain(&mut sessions, grace).await;

        self.metrics.log_metrics();
        info!("Server stopped");
        self.finished.send_replace(true);
        outcome
    }

    /// Refuse new connections and close the live ones.
    ///
    /// Waits until [`start`](Self::start) has returned. Returns immediately
    /// when the server was never started; calling it again is harmless.
    pub async fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Stop requested");
        }
        self.shutdown.cancel();
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    async fn accept_loop(&self, listener: &TcpListener, sessions: &mut JoinSet<()>) -> Result<()> {
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Ok(()),
                },
            };

            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_session(sessions, stream, peer, permit),
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Transient accept error");
                }
                Err(e) => {
                    error!(error = %e, "Accept failed, stopping server");
                    return Err(ProtocolError::Listener(e));
                }
            }

            // reap finished sessions so the set does not grow unbounded
            while let Some(done) = sessions.try_join_next() {
                if let Err(e) = done {
                    error!(error = %e, "Connection session failed");
                }
            }
        }
    }

    fn spawn_session(
        &self,
        sessions: &mut JoinSet<()>,
        stream: TcpStream,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (conn, outbound) = Connection::new(
            id,
            peer,
            self.config.send_queue_limit,
            self.shutdown.child_token(),
            self.metrics.clone(),
        );
        session::register(&self.connections, &conn);
        debug!(conn_id = id, %peer, "Accepted connection");

        let session = Session {
            conn,
            callback: self.callback.clone(),
            protocol: self.protocol.clone(),
            registry: self.connections.clone(),
            metrics: self.metrics.clone(),
            receive_queue_limit: self.config.receive_queue_limit,
        };
        sessions.spawn(async move {
            session.run(stream, outbound).await;
            drop(permit);
        });
    }

    /// Wait for sessions to finish, forcing them after `grace`.
    async fn drain(&self, sessions: &mut JoinSet<()>, grace: Duration) {
        let open = sessions.len();
        if open == 0 {
            return;
        }
        info!(open, grace_ms = grace.as_millis() as u64, "Waiting for connections to close");

        let all_done = async {
            while sessions.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, all_done).await.is_ok() {
            info!("All connections closed");
            return;
        }

        let remaining = self.connections();
        warn!(remaining = remaining.len(), "Shutdown grace period elapsed, forcing close");
        for conn in remaining {
            conn.force_close();
        }

        let forced_done = async {
            while sessions.join_next().await.is_some() {}
        };
        if tokio::time::timeout(FORCED_CLOSE_WAIT, forced_done).await.is_err() {
            // only callbacks that ignore the forced close get here, e.g. a stuck on_close
            error!(remaining = sessions.len(), "Sessions still running after forced close, aborting");
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }
    }
}

/// How long force-closed sessions get to run `on_close` before they are aborted.
const FORCED_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// Accept errors that concern a single pending connection, not the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }
}
