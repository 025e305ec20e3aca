//! # Error Types
//!
//! Error handling for the framing layer, the connection lifecycle and the
//! server accept loop.
//!
//! ## Error Categories
//! - **Framing Errors**: truncated prefix or body, length fields that disagree
//!   with the buffer they describe
//! - **Size Violations**: declared lengths above the protocol's maximum
//! - **Connection Errors**: peer closed, socket I/O failures
//! - **Backpressure**: saturated send queues
//! - **Listener Errors**: bind/accept failures, fatal to [`Server::start`]
//!
//! Per-connection errors close only the offending connection. Listener errors
//! are the only ones surfaced out of the server.
//!
//! [`Server::start`]: crate::server::Server::start
//!
//! ## Example Usage
//! ```rust
//! use frame_server::core::packet::FramedPacket;
//! use frame_server::error::{FramingError, ProtocolError};
//!
//! // Declares 10 body bytes but carries 3.
//! let bad = vec![0u8, 0, 0, 10, 1, 2, 3];
//! match FramedPacket::new(bad, true) {
//!     Err(ProtocolError::Framing(FramingError::LengthMismatch { declared, actual })) => {
//!         assert_eq!((declared, actual), (10, 3));
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    pub const ERR_EXTRA_DATA_SET: &str = "Connection extra data already set";
    pub const ERR_SERVER_RUNNING: &str = "Server already started";
}

/// Ways a frame can be malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The stream ended before a complete field could be read.
    #[error("short read: expected {expected} bytes, got {read}")]
    ShortRead { expected: usize, read: usize },

    /// A buffer tagged as carrying its length field is too short to hold one.
    #[error("missing length field: buffer has {0} bytes")]
    MissingLengthField(usize),

    /// The length prefix disagrees with the bytes that follow it.
    #[error("length mismatch: declared {declared} bytes, buffer holds {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    /// A metadata block claims more bytes than the body contains.
    #[error("block overrun: metadata declares {declared} bytes, {available} available")]
    BlockOverrun { declared: u32, available: usize },
}

// ProtocolError is the primary error type for all framework operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Packet too large: {size} bytes (max {max})")]
    OversizedPacket { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send queue is full")]
    QueueFull,

    #[error("Listener error: {0}")]
    Listener(#[source] io::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
