#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use rcon_bridge::PacketCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed the stream in uneven pieces; decoding must terminate without error
    let mut codec = PacketCodec::new();
    let mut buf = BytesMut::new();
    let step = data.first().map_or(1, |b| usize::from(*b % 17) + 1);
    for chunk in data.chunks(step) {
        buf.extend_from_slice(chunk);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
    }
    let _ = codec.decode_eof(&mut buf);
});
