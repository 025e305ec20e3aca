//! # Packets
//!
//! Length-prefixed packet types.
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Body(Length)]
//! ```
//!
//! A block-structured body further splits into a metadata block and an
//! optional trailing block:
//! ```text
//! [MetaLength(4, big-endian)] [Metadata(MetaLength)] [Trailing(rest)]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FramingError, ProtocolError, Result};

/// Size of the big-endian length prefix
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Anything that can be written to the wire as one length-prefixed frame.
///
/// `serialize()` must return the 4-byte big-endian body length followed by
/// exactly that many body bytes.
pub trait Packet: Send + Sync + 'static {
    fn serialize(&self) -> Bytes;

    /// Number of bytes `serialize()` produces.
    fn wire_len(&self) -> usize {
        self.serialize().len()
    }
}

/// Read the big-endian length prefix at the start of `buf`.
#[inline]
pub fn read_length(buf: &[u8]) -> Option<u32> {
    let field: [u8; LENGTH_FIELD_SIZE] = buf.get(..LENGTH_FIELD_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(field))
}

/// Prefix `body` with its big-endian length.
pub fn frame_body(body: &[u8]) -> Result<Bytes> {
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::OversizedPacket {
        size: body.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(LENGTH_FIELD_SIZE + body.len());
    buf.put_u32(len);
    buf.extend_from_slice(body);
    Ok(buf.freeze())
}

/// A complete frame: length prefix plus body, stored contiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedPacket {
    buf: Bytes,
}

impl FramedPacket {
    /// Build a packet from `buffer`.
    ///
    /// With `has_length_field` the buffer must already start with its prefix
    /// and the prefix must match the remaining size exactly. Without it, a
    /// prefix is allocated in front of a copy of `buffer`.
    pub fn new(buffer: impl Into<Bytes>, has_length_field: bool) -> Result<Self> {
        let buffer = buffer.into();
        if !has_length_field {
            return Ok(Self {
                buf: frame_body(&buffer)?,
            });
        }

        let declared =
            read_length(&buffer).ok_or(FramingError::MissingLengthField(buffer.len()))?;
        let actual = buffer.len() - LENGTH_FIELD_SIZE;
        if declared as usize != actual {
            return Err(FramingError::LengthMismatch { declared, actual }.into());
        }

        Ok(Self { buf: buffer })
    }

    /// Wrap a body in a fresh frame.
    pub fn from_body(body: impl AsRef<[u8]>) -> Result<Self> {
        Ok(Self {
            buf: frame_body(body.as_ref())?,
        })
    }

    /// Body size, not counting the 4-byte prefix.
    #[inline]
    pub fn length(&self) -> u32 {
        // construction guarantees the prefix is present
        read_length(&self.buf).unwrap_or_default()
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.buf[LENGTH_FIELD_SIZE..]
    }

    /// Body as a cheap reference-counted slice.
    pub fn body_bytes(&self) -> Bytes {
        self.buf.slice(LENGTH_FIELD_SIZE..)
    }
}

impl Packet for FramedPacket {
    fn serialize(&self) -> Bytes {
        self.buf.clone()
    }

    fn wire_len(&self) -> usize {
        self.buf.len()
    }
}

/// A packet whose body is a metadata block optionally followed by a
/// trailing binary block.
///
/// The body's own first four bytes carry the metadata length `m`; the split
/// point is `4 + m`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPacket {
    body: Bytes,
}

impl BlockPacket {
    /// Validate a block-structured body (without the outer frame prefix).
    pub fn new(body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        let declared = read_length(&body).ok_or(FramingError::MissingLengthField(body.len()))?;
        let available = body.len() - LENGTH_FIELD_SIZE;
        if declared as usize > available {
            return Err(FramingError::BlockOverrun {
                declared,
                available,
            }
            .into());
        }

        Ok(Self { body })
    }

    /// Assemble a body from its two blocks.
    pub fn from_blocks(metadata: &[u8], trailing: Option<&[u8]>) -> Result<Self> {
        let trailing = trailing.unwrap_or_default();
        let meta_len = u32::try_from(metadata.len()).map_err(|_| ProtocolError::OversizedPacket {
            size: metadata.len(),
            max: u32::MAX as usize,
        })?;

        let mut body =
            BytesMut::with_capacity(LENGTH_FIELD_SIZE + metadata.len() + trailing.len());
        body.put_u32(meta_len);
        body.extend_from_slice(metadata);
        body.extend_from_slice(trailing);
        Ok(Self {
            body: body.freeze(),
        })
    }

    /// Declared metadata length.
    #[inline]
    pub fn declared_len(&self) -> u32 {
        read_length(&self.body).unwrap_or_default()
    }

    #[inline]
    fn split_point(&self) -> usize {
        LENGTH_FIELD_SIZE + self.declared_len() as usize
    }

    pub fn metadata(&self) -> &[u8] {
        &self.body[LENGTH_FIELD_SIZE..self.split_point()]
    }

    /// The trailing block, or `None` when the metadata fills the body.
    pub fn trailing(&self) -> Option<&[u8]> {
        let split = self.split_point();
        if split == self.body.len() {
            None
        } else {
            Some(&self.body[split..])
        }
    }

    /// `(declared_len, metadata, trailing)` in one call.
    pub fn blocks(&self) -> (u32, &[u8], Option<&[u8]>) {
        (self.declared_len(), self.metadata(), self.trailing())
    }

    /// The block-structured body, inner length field included.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Packet for BlockPacket {
    fn serialize(&self) -> Bytes {
        // bodies built by `new`/`from_blocks` come from frames or checked lengths
        frame_body(&self.body).unwrap_or_default()
    }

    fn wire_len(&self) -> usize {
        LENGTH_FIELD_SIZE + self.body.len()
    }
}
