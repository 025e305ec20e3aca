//! A single accepted client connection.
//!
//! The server owns the socket; applications only see the [`Connection`]
//! handle, which queues outbound packets, carries per-connection data and
//! can be closed from any task.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::Metrics;

/// Outbound packets waiting for the writer.
pub(crate) type SendQueue = mpsc::Receiver<Box<dyn Packet>>;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnState {
    /// Accepted, `on_connect` not yet answered
    Connecting = 0,
    /// Reading, dispatching and writing
    Open = 1,
    /// Close requested, loops winding down
    Closing = 2,
    /// Socket released and `on_close` due or done
    Closed = 3,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Connecting,
            1 => ConnState::Open,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Connecting => "connecting",
            ConnState::Open => "open",
            ConnState::Closing => "closing",
            ConnState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Handle to one client connection.
pub struct Connection {
    id: u64,
    peer_addr: SocketAddr,
    state: AtomicU8,
    extra: OnceLock<Box<dyn Any + Send + Sync>>,
    outbound: mpsc::Sender<Box<dyn Packet>>,
    shutdown: CancellationToken,
    forced: CancellationToken,
    tasks: Mutex<Vec<AbortHandle>>,
    metrics: Arc<Metrics>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        peer_addr: SocketAddr,
        send_queue_limit: usize,
        shutdown: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, SendQueue) {
        let (outbound, queue) = mpsc::channel(send_queue_limit.max(1));
        let conn = Arc::new(Self {
            id,
            peer_addr,
            state: AtomicU8::new(ConnState::Connecting as u8),
            extra: OnceLock::new(),
            outbound,
            shutdown,
            forced: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            metrics,
        });
        (conn, queue)
    }

    /// Server-unique identifier, assigned in accept order.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once a close was requested, even if teardown is still running.
    pub fn is_closed(&self) -> bool {
        self.state() >= ConnState::Closing || self.shutdown.is_cancelled()
    }

    /// Attach application data. Only the first call succeeds.
    pub fn put_extra_data<T>(&self, data: T) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        self.extra
            .set(Box::new(data))
            .map_err(|_| ProtocolError::Custom(constants::ERR_EXTRA_DATA_SET.to_string()))
    }

    /// Application data, if set and of type `T`.
    pub fn extra_data<T: Any>(&self) -> Option<&T> {
        self.extra.get().and_then(|data| data.downcast_ref::<T>())
    }

    /// Packets queued but not yet picked up by the writer.
    pub fn pending_writes(&self) -> usize {
        self.outbound.max_capacity() - self.outbound.capacity()
    }

    /// Queue a packet without waiting.
    ///
    /// Fails with [`ProtocolError::QueueFull`] when the send queue is
    /// saturated; the connection stays open.
    pub fn try_write<T: Packet>(&self, packet: T) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        match self.outbound.try_send(Box::new(packet)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.metrics.queue_full();
                Err(ProtocolError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Queue a packet, waiting at most `timeout` for room.
    ///
    /// `None` or a zero timeout behaves like [`try_write`](Self::try_write).
    /// Success means the packet was queued, not that the peer received it.
    pub async fn async_write<T: Packet>(&self, packet: T, timeout: Option<Duration>) -> Result<()> {
        let timeout = match timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => return self.try_write(packet),
        };
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let packet: Box<dyn Packet> = Box::new(packet);
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
            sent = self.outbound.send_timeout(packet, timeout) => match sent {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {
                    self.metrics.queue_full();
                    Err(ProtocolError::QueueFull)
                }
                Err(SendTimeoutError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
            },
        }
    }

    /// Queue a packet, waiting as long as it takes for room.
    pub async fn write<T: Packet>(&self, packet: T) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let packet: Box<dyn Packet> = Box::new(packet);
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
            sent = self.outbound.send(packet) => sent.map_err(|_| ProtocolError::ConnectionClosed),
        }
    }

    /// Request the connection to close. Idempotent and safe from any task.
    ///
    /// Queued outbound packets that were not written yet are discarded.
    pub fn close(&self) {
        let advanced = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < ConnState::Closing as u8).then_some(ConnState::Closing as u8)
            })
            .is_ok();
        if advanced {
            debug!(conn_id = self.id, "closing connection");
        }
        self.shutdown.cancel();
    }

    /// Resolves once the connection starts closing.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// `Connecting -> Open`; false when a close already won the race.
    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnState::Connecting as u8,
                ConnState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.state.store(ConnState::Closed as u8, Ordering::Release);
    }

    pub(crate) fn attach_task(&self, handle: AbortHandle) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Resolves once the server gave up waiting for a graceful close.
    pub(crate) async fn forced(&self) {
        self.forced.cancelled().await
    }

    /// Abort the connection's loops wherever they are suspended.
    ///
    /// A pending `on_connect` is abandoned as well; the session then
    /// finishes through the regular close path.
    pub(crate) fn force_close(&self) {
        self.close();
        self.forced.cancel();
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.iter() {
            task.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::FramedPacket;

    fn connection(limit: usize) -> (Arc<Connection>, SendQueue) {
        Connection::new(
            7,
            "127.0.0.1:4000".parse().unwrap(),
            limit,
            CancellationToken::new(),
            Arc::new(Metrics::new()),
        )
    }

    fn packet(body: &[u8]) -> FramedPacket {
        FramedPacket::from_body(body).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let (conn, _queue) = connection(4);
        assert_eq!(conn.state(), ConnState::Connecting);
        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        assert_eq!(conn.state(), ConnState::Open);

        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnState::Closing);
        assert!(conn.is_closed());

        conn.mark_closed();
        conn.close();
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[test]
    fn test_close_before_open_wins() {
        let (conn, _queue) = connection(4);
        conn.close();
        assert!(!conn.mark_open());
    }

    #[test]
    fn test_extra_data_set_once() {
        let (conn, _queue) = connection(4);
        assert!(conn.extra_data::<String>().is_none());

        conn.put_extra_data(String::from("sensor-1")).unwrap();
        assert_eq!(conn.extra_data::<String>().map(String::as_str), Some("sensor-1"));
        assert!(conn.extra_data::<u32>().is_none());

        let err = conn.put_extra_data(5u32).unwrap_err();
        assert!(matches!(err, ProtocolError::Custom(ref msg) if msg == constants::ERR_EXTRA_DATA_SET));
    }

    #[tokio::test]
    async fn test_queue_full_keeps_connection_open() {
        let (conn, mut queue) = connection(2);
        conn.mark_open();

        conn.try_write(packet(b"a")).unwrap();
        conn.async_write(packet(b"b"), None).await.unwrap();
        assert_eq!(conn.pending_writes(), 2);

        let err = conn.try_write(packet(b"c")).unwrap_err();
        assert!(matches!(err, ProtocolError::QueueFull));
        assert!(!conn.is_closed());

        // draining one slot makes room again
        assert!(queue.recv().await.is_some());
        conn.try_write(packet(b"d")).unwrap();
    }

    #[tokio::test]
    async fn test_async_write_times_out() {
        let (conn, _queue) = connection(1);
        conn.mark_open();
        conn.try_write(packet(b"a")).unwrap();

        let started = std::time::Instant::now();
        let err = conn
            .async_write(packet(b"b"), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(matches!(err, ProtocolError::QueueFull));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (conn, _queue) = connection(4);
        conn.mark_open();
        conn.close();

        assert!(matches!(
            conn.try_write(packet(b"x")),
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(matches!(
            conn.write(packet(b"x")).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_force_close_releases_forced_waiters() {
        let (conn, _queue) = connection(4);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.forced().await })
        };

        // a plain close is not a forced one
        conn.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        conn.force_close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_blocked_write_released_by_close() {
        let (conn, _queue) = connection(1);
        conn.mark_open();
        conn.try_write(packet(b"a")).unwrap();

        let writer = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.write(packet(b"b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close();

        let result = writer.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
