//! Frames carrying a metadata block and an optional trailing block.
//!
//! ```text
//! [Length(4)] [MetaLength(4)] [Metadata(MetaLength)] [Trailing(Length - 4 - MetaLength)]
//! ```

use tokio::io::AsyncRead;

use crate::config::MAX_PACKET_SIZE;
use crate::core::packet::{BlockPacket, LENGTH_FIELD_SIZE};
use crate::error::Result;
use crate::protocol::{read_frame, Protocol};

#[derive(Debug, Clone, Copy)]
pub struct BlockProtocol {
    max_packet_size: usize,
}

impl BlockProtocol {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for BlockProtocol {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl Protocol for BlockProtocol {
    type Packet = BlockPacket;

    async fn read_packet<R>(&self, reader: &mut R) -> Result<BlockPacket>
    where
        R: AsyncRead + Unpin + Send,
    {
        let frame = read_frame(reader, self.max_packet_size).await?;
        BlockPacket::new(frame.slice(LENGTH_FIELD_SIZE..))
    }
}
