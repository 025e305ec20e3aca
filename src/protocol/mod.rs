//! # Protocol Layer
//!
//! Pluggable framing strategies.
//!
//! A [`Protocol`] reads exactly one complete packet from a byte stream. The
//! server calls it in a loop for every connection and never looks inside the
//! packets it returns; the packet type is the protocol's associated type, so
//! callbacks receive an already-typed value.
//!
//! ## Framing discipline
//! 1. read exactly 4 bytes (zero bytes then EOF is a clean close, 1–3 bytes
//!    then EOF is a short read)
//! 2. decode the big-endian body length
//! 3. reject lengths above the protocol's maximum before reading any body
//!    byte
//! 4. read exactly that many body bytes
//!
//! A partial frame is never handed out as a packet.
//!
//! ## Components
//! - **LengthPrefixedProtocol**: plain frames, yields [`FramedPacket`]
//! - **BlockProtocol**: frames whose body is a metadata block plus an
//!   optional trailing block, yields [`BlockPacket`]
//!
//! [`FramedPacket`]: crate::core::packet::FramedPacket
//! [`BlockPacket`]: crate::core::packet::BlockPacket

use std::future::Future;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::packet::{Packet, LENGTH_FIELD_SIZE};
use crate::error::{FramingError, ProtocolError, Result};

pub mod block;
pub mod length_prefixed;

pub use block::BlockProtocol;
pub use length_prefixed::LengthPrefixedProtocol;

/// Strategy for turning a byte stream into packets.
pub trait Protocol: Send + Sync + 'static {
    /// The packet kind this protocol produces.
    type Packet: Packet;

    /// Read one complete packet, waiting until all of its bytes arrive.
    fn read_packet<R>(&self, reader: &mut R) -> impl Future<Output = Result<Self::Packet>> + Send
    where
        R: AsyncRead + Unpin + Send;
}

/// Read one `[length][body]` frame, prefix included, enforcing `max_body`.
///
/// Oversized frames fail right after the prefix; the body is left unread.
pub async fn read_frame<R>(reader: &mut R, max_body: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin + Send,
{
    let mut prefix = [0u8; LENGTH_FIELD_SIZE];
    match read_full(reader, &mut prefix).await? {
        0 => return Err(ProtocolError::ConnectionClosed),
        LENGTH_FIELD_SIZE => {}
        read => {
            return Err(FramingError::ShortRead {
                expected: LENGTH_FIELD_SIZE,
                read,
            }
            .into())
        }
    }

    let declared = u32::from_be_bytes(prefix) as usize;
    if declared > max_body {
        return Err(ProtocolError::OversizedPacket {
            size: declared,
            max: max_body,
        });
    }

    let mut frame = BytesMut::with_capacity(LENGTH_FIELD_SIZE + declared);
    frame.put_slice(&prefix);
    frame.resize(LENGTH_FIELD_SIZE + declared, 0);

    let read = read_full(reader, &mut frame[LENGTH_FIELD_SIZE..]).await?;
    if read < declared {
        return Err(FramingError::ShortRead {
            expected: declared,
            read,
        }
        .into());
    }

    Ok(frame.freeze())
}

/// Fill `buf` unless the stream ends first; returns how many bytes landed.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + Send,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
