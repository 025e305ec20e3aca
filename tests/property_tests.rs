//! Property-based tests using proptest
//!
//! These tests validate framing invariants across a wide range of randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use frame_server::core::codec::FrameCodec;
use frame_server::core::packet::{BlockPacket, FramedPacket, Packet, LENGTH_FIELD_SIZE};
use frame_server::error::ProtocolError;
use frame_server::protocol::{LengthPrefixedProtocol, Protocol};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(future)
}

// Property: wrapping a body never alters it
proptest! {
    #[test]
    fn prop_body_round_trip(body in prop::collection::vec(any::<u8>(), 0..4096)) {
        let packet = FramedPacket::new(body.clone(), false).unwrap();

        prop_assert_eq!(packet.body(), body.as_slice());
        prop_assert_eq!(packet.length() as usize, body.len());
        prop_assert_eq!(packet.serialize().len(), LENGTH_FIELD_SIZE + body.len());
    }
}

// Property: a serialized packet reads back as the same body
proptest! {
    #[test]
    fn prop_serialize_then_read(body in prop::collection::vec(any::<u8>(), 0..4096)) {
        let wire = FramedPacket::from_body(&body).unwrap().serialize();
        let protocol = LengthPrefixedProtocol::new(4096);

        let mut stream: &[u8] = &wire;
        let packet = block_on(protocol.read_packet(&mut stream)).unwrap();

        prop_assert_eq!(packet.body(), body.as_slice());
        prop_assert!(stream.is_empty());
    }
}

// Property: frames survive arbitrary chunking of the byte stream
proptest! {
    #[test]
    fn prop_codec_chunking(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..16),
        chunk in 1usize..64,
    ) {
        let mut codec = FrameCodec::new(256);
        let mut wire = BytesMut::new();
        for body in &bodies {
            codec.encode(FramedPacket::from_body(body).unwrap(), &mut wire).unwrap();
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(packet) = codec.decode(&mut buf).unwrap() {
                decoded.push(packet.body().to_vec());
            }
        }

        prop_assert_eq!(decoded, bodies);
        prop_assert!(buf.is_empty());
    }
}

// Property: a pre-framed buffer is accepted exactly when its prefix is honest
proptest! {
    #[test]
    fn prop_prefixed_buffer_validation(raw in prop::collection::vec(any::<u8>(), 0..64)) {
        let honest = raw.len() >= LENGTH_FIELD_SIZE
            && u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
                == raw.len() - LENGTH_FIELD_SIZE;

        match FramedPacket::new(raw.clone(), true) {
            Ok(packet) => {
                prop_assert!(honest);
                prop_assert_eq!(&packet.serialize()[..], raw.as_slice());
            }
            Err(ProtocolError::Framing(_)) => prop_assert!(!honest),
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}

// Property: block bodies split back into the blocks they were built from
proptest! {
    #[test]
    fn prop_block_split(
        metadata in prop::collection::vec(any::<u8>(), 0..128),
        trailing in prop::option::of(prop::collection::vec(any::<u8>(), 1..128)),
    ) {
        let built = BlockPacket::from_blocks(&metadata, trailing.as_deref()).unwrap();
        let reparsed = BlockPacket::new(built.body().to_vec()).unwrap();

        prop_assert_eq!(reparsed.declared_len() as usize, metadata.len());
        prop_assert_eq!(reparsed.metadata(), metadata.as_slice());
        prop_assert_eq!(reparsed.trailing(), trailing.as_deref());
        prop_assert_eq!(reparsed.wire_len(), reparsed.serialize().len());
    }
}
