//! Client side of the wire format.
//!
//! A connected stream wrapped in [`FrameCodec`], so packets can be sent with
//! `futures::SinkExt::send` and read with `futures::StreamExt::next`.

use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::core::codec::FrameCodec;
use crate::error::Result;

/// Connect to `addr` and frame the stream, refusing bodies over `max_packet_size`.
#[instrument(skip(addr))]
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    max_packet_size: usize,
) -> Result<Framed<TcpStream, FrameCodec>> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "Connected");
    Ok(Framed::new(stream, FrameCodec::new(max_packet_size)))
}
