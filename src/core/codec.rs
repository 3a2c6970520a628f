//! Framing for RCON byte streams.
//!
//! [`PacketCodec`] accumulates raw chunks (socket reads, process output)
//! and yields complete [`Packet`]s. Partial packets stay buffered until the
//! rest arrives. A chunk may carry several packets or a single byte.
//!
//! Malformed input never ends the stream: an impossible length field or a
//! packet that fails validation drops one byte and the scan restarts at the
//! next offset.

use crate::core::packet::{
    read_i32, Packet, LENGTH_FIELD_SIZE, MAX_PAYLOAD_SIZE, PACKET_OVERHEAD,
};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

const MIN_DECLARED: i32 = PACKET_OVERHEAD as i32;
const MAX_DECLARED: i32 = (PACKET_OVERHEAD + MAX_PAYLOAD_SIZE) as i32;

#[derive(Debug, Default)]
pub struct PacketCodec {
    /// Bytes dropped since the last good packet
    discarded: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently being skipped while looking for the next boundary
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn skip_byte(&mut self, src: &mut BytesMut) {
        src.advance(1);
        self.discarded += 1;
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            if src.len() < LENGTH_FIELD_SIZE {
                return Ok(None);
            }

            let declared = read_i32(src, 0);
            if !(MIN_DECLARED..=MAX_DECLARED).contains(&declared) {
                self.skip_byte(src);
                continue;
            }

            let total = declared as usize + LENGTH_FIELD_SIZE;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            match Packet::from_bytes(&src[..total]) {
                Ok(packet) => {
                    src.advance(total);
                    if self.discarded > 0 {
                        warn!(discarded = self.discarded, "Resynchronised packet stream");
                        self.discarded = 0;
                    }
                    return Ok(Some(packet));
                }
                Err(e) => {
                    debug!(error = %e, "Dropping byte at invalid packet boundary");
                    self.skip_byte(src);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None => {
                if !buf.is_empty() {
                    debug!(bytes = buf.len(), "Discarding partial packet at end of stream");
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        if !item.payload.is_ascii() {
            return Err(ProtocolError::NonAsciiPayload);
        }
        if item.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::OversizedPacket(item.payload.len()));
        }

        dst.reserve(item.wire_size());
        dst.put_i32_le(item.declared_length() as i32);
        dst.put_i32_le(item.id);
        dst.put_i32_le(item.packet_type);
        dst.put_slice(item.payload.as_bytes());
        dst.put_slice(&[0, 0]);
        Ok(())
    }
}
