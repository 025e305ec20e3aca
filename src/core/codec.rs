//! # Frame Codec
//!
//! Tokio codec for length-prefixed frames, for clients and tools that want a
//! `Framed` stream/sink instead of the server's callback model.
//!
//! ```rust,no_run
//! use frame_server::core::codec::FrameCodec;
//! use frame_server::core::packet::FramedPacket;
//! use futures::{SinkExt, StreamExt};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn demo() -> frame_server::error::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:6868").await?;
//! let mut framed = Framed::new(stream, FrameCodec::default());
//! framed.send(FramedPacket::from_body(b"ping")?).await?;
//! if let Some(reply) = framed.next().await {
//!     println!("{} bytes back", reply?.length());
//! }
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_PACKET_SIZE;
use crate::core::packet::{read_length, FramedPacket, Packet, LENGTH_FIELD_SIZE};
use crate::error::{FramingError, ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_packet_size: usize,
}

impl FrameCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = FramedPacket;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(declared) = read_length(src) else {
            return Ok(None);
        };

        let declared = declared as usize;
        if declared > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket {
                size: declared,
                max: self.max_packet_size,
            });
        }

        let frame_len = LENGTH_FIELD_SIZE + declared;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len).freeze();
        FramedPacket::new(frame, true).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => {
                let expected = read_length(src)
                    .map(|len| LENGTH_FIELD_SIZE + len as usize)
                    .unwrap_or(LENGTH_FIELD_SIZE);
                let read = src.len();
                src.advance(read);
                Err(FramingError::ShortRead { expected, read }.into())
            }
        }
    }
}

impl<P: Packet> Encoder<P> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: P, dst: &mut BytesMut) -> Result<()> {
        let wire = item.serialize();
        let body_len = wire.len().saturating_sub(LENGTH_FIELD_SIZE);
        if body_len > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket {
                size: body_len,
                max: self.max_packet_size,
            });
        }

        dst.extend_from_slice(&wire);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 3, 1, 2][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[3]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.body(), &[1u8, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(FramedPacket::from_body(b"a").unwrap(), &mut buf).unwrap();
        codec.encode(FramedPacket::from_body(b"bc").unwrap(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().body(), b"a");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().body(), b"bc");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_oversized() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&9u32.to_be_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket { size: 9, max: 8 })
        ));
    }

    #[test]
    fn test_decode_eof_partial_prefix() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::Framing(FramingError::ShortRead {
                expected: 4,
                read: 2
            }))
        ));
    }

    #[test]
    fn test_encode_respects_limit() {
        let mut codec = FrameCodec::new(2);
        let mut buf = BytesMut::new();
        let result = codec.encode(FramedPacket::from_body(b"abc").unwrap(), &mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::OversizedPacket { size: 3, max: 2 })
        ));
        assert!(buf.is_empty());
    }
}
