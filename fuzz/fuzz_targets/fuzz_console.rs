#![no_main]

use libfuzzer_sys::fuzz_target;
use rcon_bridge::service::console::{MarkerProtocol, ResponseAssembler};

fuzz_target!(|data: &[u8]| {
    let Ok(protocol) = MarkerProtocol::new("192.0.2.0", "\n") else {
        return;
    };
    let mut assembler = ResponseAssembler::new(protocol);
    for line in String::from_utf8_lossy(data).split('\n') {
        if let Some(packet) = assembler.push_line(line) {
            assert!(packet.payload.is_ascii());
        }
    }
});
