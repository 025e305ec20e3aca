//! Echo application: every packet goes straight back to its sender.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::packet::FramedPacket;
use crate::error::ProtocolError;
use crate::server::{Callback, Connection};

/// Writes each received packet back on the same connection.
///
/// The peer address is stored as the connection's extra data on connect.
#[derive(Debug, Clone, Default)]
pub struct EchoCallback {
    write_timeout: Option<Duration>,
}

impl EchoCallback {
    /// Wait up to `timeout` for send queue room instead of failing at once.
    pub fn with_write_timeout(timeout: Duration) -> Self {
        Self {
            write_timeout: Some(timeout),
        }
    }
}

impl Callback<FramedPacket> for EchoCallback {
    async fn on_connect(&self, conn: &Arc<Connection>) -> bool {
        let peer = conn.peer_addr();
        info!(conn_id = conn.id(), %peer, "Echo client connected");
        conn.put_extra_data(peer).is_ok()
    }

    async fn on_message(&self, conn: &Arc<Connection>, packet: FramedPacket) -> bool {
        match conn.async_write(packet, self.write_timeout).await {
            Ok(()) => true,
            Err(ProtocolError::QueueFull) => {
                warn!(conn_id = conn.id(), "Send queue full, dropping echo");
                true
            }
            Err(_) => false,
        }
    }

    async fn on_close(&self, conn: &Arc<Connection>) {
        info!(
            conn_id = conn.id(),
            peer = ?conn.extra_data::<SocketAddr>(),
            "Echo client disconnected"
        );
    }
}
