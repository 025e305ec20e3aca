//! # Applications
//!
//! Ready-made [`Callback`](crate::server::Callback) implementations served by
//! the `frame-server` binary.
//!
//! - **echo**: writes every packet back over [`LengthPrefixedProtocol`]
//! - **ingest**: stores images sent over [`BlockProtocol`]
//!
//! [`LengthPrefixedProtocol`]: crate::protocol::LengthPrefixedProtocol
//! [`BlockProtocol`]: crate::protocol::BlockProtocol

pub mod echo;
pub mod ingest;

pub use echo::EchoCallback;
pub use ingest::IngestCallback;
