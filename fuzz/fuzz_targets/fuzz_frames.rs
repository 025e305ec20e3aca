#![no_main]

use bytes::BytesMut;
use frame_server::core::codec::FrameCodec;
use frame_server::core::packet::{BlockPacket, FramedPacket};
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // pre-framed buffers and block bodies must be rejected, never truncated or panicked on
    let _ = FramedPacket::new(data.to_vec(), true);
    if let Ok(block) = BlockPacket::new(data.to_vec()) {
        let _ = block.blocks();
    }

    // stream decoding with a small limit
    let mut codec = FrameCodec::new(4096);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
    let _ = codec.decode_eof(&mut buf);
});
