//! # Core Framing Components
//!
//! Packet types and the codec for the length-prefixed wire format.
//!
//! ## Components
//! - **Packet**: the serialization contract plus the framed and
//!   block-structured packet types
//! - **Codec**: Tokio codec for framing over byte streams (client side)
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Body(Length)]
//! ```
//!
//! ## Security
//! - Length validation before allocation
//! - Size limits are a protocol setting, never a framework constant

pub mod codec;
pub mod packet;
