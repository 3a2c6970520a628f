#![no_main]

use libfuzzer_sys::fuzz_target;
use rcon_bridge::Packet;

fuzz_target!(|data: &[u8]| {
    // Single-packet decode must never panic
    if let Ok(packet) = Packet::from_bytes(data) {
        // Lossy payloads may no longer be ASCII, so re-encoding can fail but not panic
        let _ = packet.to_bytes();
    }
});
