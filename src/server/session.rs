//! Per-connection tasks.
//!
//! Every open connection runs three loops:
//! - **reader**: protocol -> receive queue
//! - **dispatcher**: receive queue -> `on_message`, strictly in order
//! - **writer**: send queue -> socket
//!
//! The session finishes once all three have stopped, then releases the
//! socket and runs `on_close` exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::core::packet::Packet;
use crate::error::ProtocolError;
use crate::protocol::Protocol;
use crate::server::callback::Callback;
use crate::server::connection::{Connection, SendQueue};
use crate::utils::metrics::Metrics;

/// Live connections keyed by id.
pub(crate) type Registry = Arc<Mutex<HashMap<u64, Arc<Connection>>>>;

pub(crate) fn register(registry: &Registry, conn: &Arc<Connection>) {
    registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(conn.id(), conn.clone());
}

fn unregister(registry: &Registry, id: u64) {
    registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
}

pub(crate) struct Session<C, P> {
    pub(crate) conn: Arc<Connection>,
    pub(crate) callback: Arc<C>,
    pub(crate) protocol: Arc<P>,
    pub(crate) registry: Registry,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) receive_queue_limit: usize,
}

impl<C, P> Session<C, P>
where
    P: Protocol,
    C: Callback<P::Packet>,
{
    #[instrument(name = "connection", skip_all, fields(conn_id = self.conn.id(), peer = %self.conn.peer_addr()))]
    pub(crate) async fn run(self, stream: TcpStream, outbound: SendQueue) {
        let conn = self.conn.clone();
        self.metrics.connection_established();

        let accepted = tokio::select! {
            accepted = self.callback.on_connect(&conn) => Some(accepted),
            _ = conn.forced() => None,
        };
        match accepted {
            Some(true) if conn.mark_open() => {
                info!("Connection open");
                self.serve(stream, outbound).await;
            }
            Some(_) => {
                info!("Connection rejected");
                self.metrics.connection_rejected();
                drop(stream);
                drop(outbound);
            }
            None => {
                warn!("on_connect abandoned by forced close");
                drop(stream);
                drop(outbound);
            }
        }

        conn.close();
        unregister(&self.registry, conn.id());
        conn.mark_closed();
        self.callback.on_close(&conn).await;
        self.metrics.connection_closed();
        info!("Connection closed");
    }

    async fn serve(&self, stream: TcpStream, outbound: SendQueue) {
        let conn = &self.conn;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.receive_queue_limit.max(1));

        let mut loops = JoinSet::new();
        conn.attach_task(loops.spawn(read_loop(
            conn.clone(),
            self.protocol.clone(),
            reader,
            inbound_tx,
            self.metrics.clone(),
        )));
        conn.attach_task(loops.spawn(dispatch_loop(
            conn.clone(),
            self.callback.clone(),
            inbound_rx,
        )));
        conn.attach_task(loops.spawn(write_loop(
            conn.clone(),
            writer,
            outbound,
            self.metrics.clone(),
        )));

        while let Some(finished) = loops.join_next().await {
            if let Err(e) = finished {
                if e.is_panic() {
                    error!(error = %e, "Connection task panicked");
                }
                conn.close();
            }
        }
    }
}

/// Decode packets until the peer goes away or sends something unreadable.
///
/// Leaving the loop drops the receive queue sender, so the dispatcher still
/// delivers whatever was already read before closing the connection.
async fn read_loop<P: Protocol>(
    conn: Arc<Connection>,
    protocol: Arc<P>,
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<P::Packet>,
    metrics: Arc<Metrics>,
) {
    loop {
        let read = tokio::select! {
            _ = conn.closed() => break,
            read = protocol.read_packet(&mut reader) => read,
        };

        let packet = match read {
            Ok(packet) => packet,
            Err(e) if e.is_disconnect() => {
                debug!("Peer closed the connection");
                break;
            }
            Err(e) => {
                match &e {
                    ProtocolError::OversizedPacket { .. } => metrics.oversized_packet(),
                    ProtocolError::Framing(_) => metrics.framing_error(),
                    _ => metrics.connection_error(),
                }
                warn!(error = %e, "Read failed");
                break;
            }
        };
        metrics.packet_received(packet.wire_len() as u64);

        // a full receive queue stalls reading, which backs up the peer
        tokio::select! {
            _ = conn.closed() => break,
            queued = inbound.send(packet) => if queued.is_err() { break },
        }
    }
}

async fn dispatch_loop<C, T>(conn: Arc<Connection>, callback: Arc<C>, mut inbound: mpsc::Receiver<T>)
where
    C: Callback<T>,
    T: Send + 'static,
{
    loop {
        let packet = tokio::select! {
            biased;
            _ = conn.closed() => break,
            next = inbound.recv() => match next {
                Some(packet) => packet,
                None => break,
            },
        };

        if !callback.on_message(&conn, packet).await {
            debug!("on_message asked to close");
            break;
        }
    }
    conn.close();
}

async fn write_loop(
    conn: Arc<Connection>,
    mut writer: OwnedWriteHalf,
    mut outbound: SendQueue,
    metrics: Arc<Metrics>,
) {
    loop {
        let packet = tokio::select! {
            biased;
            _ = conn.closed() => break,
            next = outbound.recv() => match next {
                Some(packet) => packet,
                None => break,
            },
        };

        let wire = packet.serialize();
        let written = tokio::select! {
            _ = conn.closed() => break,
            written = writer.write_all(&wire) => written,
        };
        if let Err(e) = written {
            metrics.write_error();
            warn!(error = %e, "Write failed");
            break;
        }
        metrics.packet_sent(wire.len() as u64);
    }
    conn.close();
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Socket shutdown failed");
    }
}
