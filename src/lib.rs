//! # frame-server
//!
//! Callback-driven TCP server framework for length-prefixed binary packet
//! protocols.
//!
//! ## Layers
//! - [`core`](crate::core): packet types and the client-side [`FrameCodec`]
//! - [`protocol`]: pluggable strategies that read one packet from a stream
//! - [`server`]: accept loop, per-connection tasks, bounded queues and
//!   graceful shutdown
//! - [`apps`]: the echo and image ingest applications
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and
//!   metrics
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Body(Length)]
//! ```
//!
//! [`FrameCodec`]: crate::core::codec::FrameCodec

pub mod apps;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod utils;

pub use crate::core::packet::{BlockPacket, FramedPacket, Packet};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{BlockProtocol, LengthPrefixedProtocol, Protocol};
pub use crate::server::{Callback, ConnState, Connection, Server};
