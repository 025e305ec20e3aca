#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Framing edge cases at stream level
//! Tests boundary sizes, truncated streams and codec/protocol agreement

use bytes::Bytes;
use frame_server::core::codec::FrameCodec;
use frame_server::core::packet::{BlockPacket, FramedPacket, Packet};
use frame_server::error::{FramingError, ProtocolError};
use frame_server::protocol::{BlockProtocol, LengthPrefixedProtocol, Protocol};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::Framed;

// ============================================================================
// PACKET EDGE CASES
// ============================================================================

#[test]
fn test_new_with_and_without_prefix_agree() {
    let wrapped = FramedPacket::new(b"payload".to_vec(), false).unwrap();
    let reparsed = FramedPacket::new(wrapped.serialize(), true).unwrap();
    assert_eq!(wrapped, reparsed);
}

#[test]
fn test_prefix_only_buffer_is_empty_packet() {
    let packet = FramedPacket::new(Bytes::from_static(&[0, 0, 0, 0]), true).unwrap();
    assert_eq!(packet.length(), 0);
    assert!(packet.body().is_empty());
}

#[test]
fn test_short_buffer_is_rejected_not_truncated() {
    for len in 0..4 {
        let err = FramedPacket::new(vec![0u8; len], true).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing(FramingError::MissingLengthField(n)) if n == len
        ));
    }
}

#[test]
fn test_body_bytes_shares_buffer() {
    let packet = FramedPacket::from_body(b"shared").unwrap();
    let body = packet.body_bytes();
    assert_eq!(&body[..], b"shared");
    assert_eq!(packet.wire_len(), 4 + body.len());
}

#[test]
fn test_block_metadata_fills_body() {
    // 4 + m == len: no trailing block
    let packet = BlockPacket::new(vec![0u8, 0, 0, 3, b'a', b'b', b'c']).unwrap();
    assert_eq!(packet.trailing(), None);

    // 4 + m < len: one trailing byte
    let packet = BlockPacket::new(vec![0u8, 0, 0, 2, b'a', b'b', b'c']).unwrap();
    assert_eq!(packet.metadata(), b"ab");
    assert_eq!(packet.trailing(), Some(&b"c"[..]));
}

// ============================================================================
// STREAM EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_stream_closing_mid_prefix_is_framing_error() {
    let (mut client, mut server) = tokio::io::duplex(64);
    client.write_all(&[0, 0]).await.unwrap();
    drop(client);

    let err = LengthPrefixedProtocol::default()
        .read_packet(&mut server)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Framing(FramingError::ShortRead { expected: 4, read: 2 })
    ));
}

#[tokio::test]
async fn test_oversize_leaves_stream_after_prefix() {
    let protocol = LengthPrefixedProtocol::new(8);
    let mut wire = 9u32.to_be_bytes().to_vec();
    wire.extend_from_slice(b"123456789");
    wire.extend_from_slice(&FramedPacket::from_body(b"next").unwrap().serialize());

    let mut stream: &[u8] = &wire;
    let err = protocol.read_packet(&mut stream).await.unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedPacket { size: 9, max: 8 }));
    assert_eq!(stream.len(), wire.len() - 4);
    assert!(stream.starts_with(b"123456789"));
}

#[tokio::test]
async fn test_block_protocol_rejects_body_without_meta_length() {
    let mut stream: &[u8] = &[0, 0, 0, 2, 0xFF, 0xFF];
    let err = BlockProtocol::default()
        .read_packet(&mut stream)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Framing(FramingError::MissingLengthField(2))
    ));
}

#[tokio::test]
async fn test_codec_and_protocol_agree() {
    let (client, mut server) = tokio::io::duplex(1024);
    let mut framed = Framed::new(client, FrameCodec::default());

    framed.send(FramedPacket::from_body(b"plain").unwrap()).await.unwrap();
    framed
        .send(BlockPacket::from_blocks(b"{}", Some(&b"tail"[..])).unwrap())
        .await
        .unwrap();

    let plain = LengthPrefixedProtocol::default()
        .read_packet(&mut server)
        .await
        .unwrap();
    assert_eq!(plain.body(), b"plain");

    let block = BlockProtocol::default()
        .read_packet(&mut server)
        .await
        .unwrap();
    assert_eq!(block.metadata(), b"{}");
    assert_eq!(block.trailing(), Some(&b"tail"[..]));
}

#[tokio::test]
async fn test_codec_reports_truncated_stream() {
    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(&[0, 0, 0, 10, 1, 2, 3]).await.unwrap();
    drop(client);

    let mut framed = Framed::new(server, FrameCodec::default());
    let next = framed.next().await.unwrap();
    assert!(matches!(
        next,
        Err(ProtocolError::Framing(FramingError::ShortRead { expected: 14, read: 7 }))
    ));
}
