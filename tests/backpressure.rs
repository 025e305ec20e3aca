#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Send queue backpressure against a peer that stops reading

use frame_server::config::ServerConfig;
use frame_server::core::packet::FramedPacket;
use frame_server::error::ProtocolError;
use frame_server::protocol::LengthPrefixedProtocol;
use frame_server::server::{Callback, Connection, Server};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};

struct Silent;

impl Callback<FramedPacket> for Silent {
    async fn on_message(&self, _conn: &Arc<Connection>, _packet: FramedPacket) -> bool {
        true
    }
}

const SEND_QUEUE_LIMIT: usize = 4;

/// A large body so kernel buffers fill after a handful of packets.
fn big_packet() -> FramedPacket {
    FramedPacket::from_body(vec![0xA5u8; 256 * 1024]).unwrap()
}

/// Queue packets until the queue stays full for a while, i.e. the writer is
/// stuck on a socket the peer is not draining.
async fn saturate(conn: &Connection) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut consecutive_full = 0;
    while consecutive_full < 5 {
        assert!(Instant::now() < deadline, "send queue never saturated");
        match conn.try_write(big_packet()) {
            Ok(()) => consecutive_full = 0,
            Err(ProtocolError::QueueFull) => {
                consecutive_full += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("unexpected write error: {e}"),
        }
    }
}

async fn setup() -> (
    Arc<Server<Silent, LengthPrefixedProtocol>>,
    Arc<Connection>,
    TcpStream,
    tokio::task::JoinHandle<frame_server::Result<()>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        send_queue_limit: SEND_QUEUE_LIMIT,
        ..ServerConfig::default()
    };
    let server = Arc::new(Server::new(config, Silent, LengthPrefixedProtocol::default()));
    let handle = {
        let server = server.clone();
        tokio::spawn(async move { server.start(listener, Duration::from_millis(200)).await })
    };

    // the client never reads
    let peer = TcpStream::connect(addr).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let conn = loop {
        if let Some(conn) = server.connections().pop() {
            break conn;
        }
        assert!(Instant::now() < deadline, "connection never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    (server, conn, peer, handle)
}

#[tokio::test]
async fn test_queue_full_without_timeout() {
    let (server, conn, _peer, handle) = setup().await;
    saturate(&conn).await;

    let err = conn.async_write(big_packet(), None).await.unwrap_err();
    assert!(matches!(err, ProtocolError::QueueFull));
    let err = conn
        .async_write(big_packet(), Some(Duration::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::QueueFull));

    // backpressure is not a reason to drop the connection
    assert!(!conn.is_closed());
    assert_eq!(conn.pending_writes(), SEND_QUEUE_LIMIT);
    assert!(server.metrics().snapshot().queue_full >= 2);

    server.stop().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_queue_full_after_timeout() {
    let (server, conn, _peer, handle) = setup().await;
    saturate(&conn).await;

    let timeout = Duration::from_millis(150);
    let started = Instant::now();
    let err = conn
        .async_write(big_packet(), Some(timeout))
        .await
        .unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, ProtocolError::QueueFull));
    assert!(waited >= timeout, "returned early after {waited:?}");
    assert!(waited < timeout + Duration::from_secs(2), "overshot: {waited:?}");
    assert!(!conn.is_closed());

    server.stop().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_releases_blocked_writer() {
    let (server, conn, _peer, handle) = setup().await;
    saturate(&conn).await;

    let blocked = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.write(big_packet()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    server.stop().await;
    handle.await.unwrap().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    assert!(conn.is_closed());
}
