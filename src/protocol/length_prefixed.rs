use tokio::io::AsyncRead;

use crate::config::MAX_PACKET_SIZE;
use crate::core::packet::FramedPacket;
use crate::error::Result;
use crate::protocol::{read_frame, Protocol};

/// Plain `[length][body]` framing with a configurable body limit.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedProtocol {
    max_packet_size: usize,
}

impl LengthPrefixedProtocol {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for LengthPrefixedProtocol {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl Protocol for LengthPrefixedProtocol {
    type Packet = FramedPacket;

    async fn read_packet<R>(&self, reader: &mut R) -> Result<FramedPacket>
    where
        R: AsyncRead + Unpin + Send,
    {
        let frame = read_frame(reader, self.max_packet_size).await?;
        FramedPacket::new(frame, true)
    }
}
