use crate::error::{constants, ProtocolError, Result};
use rand::Rng;

/// Bytes taken by the length prefix itself
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Id + type + the two null padding bytes, all covered by the length field
pub const PACKET_OVERHEAD: usize = 10;

/// Smallest valid packet on the wire (empty payload)
pub const MIN_PACKET_SIZE: usize = LENGTH_FIELD_SIZE + PACKET_OVERHEAD;

/// Max allowed payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 32767;

/// Id the server answers with when authentication is rejected
pub const AUTH_FAILED_ID: i32 = -1;

/// Packet types used on the wire.
///
/// `COMMAND` and `AUTH_RESPONSE` share the value 2; the direction of the
/// packet decides which one is meant.
pub mod packet_type {
    /// Client login request carrying the password
    pub const AUTH: i32 = 3;
    /// Server answer to `AUTH`
    pub const AUTH_RESPONSE: i32 = 2;
    /// Client command request
    pub const COMMAND: i32 = 2;
    /// Server answer to `COMMAND` and to any type it does not understand
    pub const COMMAND_RESPONSE: i32 = 0;
    /// Sentinel sent after a request so the end of a multi-packet reply can be
    /// detected from the server's "unknown request" echo
    pub const END: i32 = 255;
}

/// Response type a server sends back for a given request type.
pub fn response_type_for(request_type: i32) -> i32 {
    match request_type {
        packet_type::AUTH => packet_type::AUTH_RESPONSE,
        _ => packet_type::COMMAND_RESPONSE,
    }
}

/// Payload a server sends for a request type it does not understand.
pub fn unknown_request_payload(request_type: i32) -> String {
    if request_type < 0 {
        format!("Unknown request -{:x}", request_type.unsigned_abs())
    } else {
        format!("Unknown request {request_type:x}")
    }
}

/// Replace every non-ASCII character so the text can be encoded.
pub fn ascii_lossy(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// Random request id in `1..=i32::MAX`.
///
/// Ids are positive so they can never collide with [`AUTH_FAILED_ID`].
/// Uniqueness among outstanding requests is the caller's job; see
/// `CorrelationQueue::allocate_id`.
pub fn random_id() -> i32 {
    rand::rng().random_range(1..=i32::MAX)
}

/// A single RCON packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub packet_type: i32,
    pub payload: String,
}

impl Packet {
    /// Build a packet, rejecting payloads that cannot go on the wire.
    pub fn new(id: i32, packet_type: i32, payload: impl Into<String>) -> Result<Self> {
        let payload = payload.into();
        validate_payload(&payload)?;
        Ok(Self {
            id,
            packet_type,
            payload,
        })
    }

    /// The END sentinel that follows a request with the same id
    pub fn end(id: i32) -> Self {
        Self {
            id,
            packet_type: packet_type::END,
            payload: String::new(),
        }
    }

    /// Whether this packet is a server's echo of the END sentinel
    pub fn is_end_echo(&self) -> bool {
        self.payload == unknown_request_payload(packet_type::END)
    }

    /// Length field value: id + type + payload + padding
    pub fn declared_length(&self) -> usize {
        PACKET_OVERHEAD + self.payload.len()
    }

    /// Total bytes this packet occupies on the wire
    pub fn wire_size(&self) -> usize {
        LENGTH_FIELD_SIZE + self.declared_length()
    }

    /// Encode into a caller-owned buffer.
    pub fn write_to(&self, dst: &mut Vec<u8>) -> Result<()> {
        validate_payload(&self.payload)?;
        dst.reserve(self.wire_size());
        dst.extend_from_slice(&(self.declared_length() as i32).to_le_bytes());
        dst.extend_from_slice(&self.id.to_le_bytes());
        dst.extend_from_slice(&self.packet_type.to_le_bytes());
        dst.extend_from_slice(self.payload.as_bytes());
        dst.extend_from_slice(&[0, 0]);
        Ok(())
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.wire_size());
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Encode `(id, type, payload)` straight to wire bytes.
    pub fn create(id: i32, packet_type: i32, payload: &str) -> Result<Vec<u8>> {
        Packet::new(id, packet_type, payload)?.to_bytes()
    }

    /// Decode exactly one packet.
    ///
    /// Fails with [`ProtocolError::Decode`] when the declared length does not
    /// match the buffer size or the two trailing bytes are not zero.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_PACKET_SIZE {
            return Err(ProtocolError::Decode(constants::ERR_SHORT_PACKET.into()));
        }

        let declared = read_i32(data, 0);
        if declared < 0 || declared as usize + LENGTH_FIELD_SIZE != data.len() {
            return Err(ProtocolError::Decode(format!(
                "{}: declared {declared}, have {}",
                constants::ERR_LENGTH_MISMATCH,
                data.len() - LENGTH_FIELD_SIZE
            )));
        }

        let end = data.len();
        if data[end - 2..] != [0, 0] {
            return Err(ProtocolError::Decode(constants::ERR_BAD_TRAILER.into()));
        }

        let payload_bytes = &data[12..end - 2];
        if payload_bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::OversizedPacket(payload_bytes.len()));
        }

        Ok(Self {
            id: read_i32(data, 4),
            packet_type: read_i32(data, 8),
            payload: String::from_utf8_lossy(payload_bytes).into_owned(),
        })
    }
}

fn validate_payload(payload: &str) -> Result<()> {
    if !payload.is_ascii() {
        return Err(ProtocolError::NonAsciiPayload);
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::OversizedPacket(payload.len()));
    }
    Ok(())
}

#[inline]
pub(crate) fn read_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_documented_layout() {
        let bytes = Packet::create(7, packet_type::COMMAND, "list").unwrap();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[0..4], &14i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2i32.to_le_bytes());
        assert_eq!(&bytes[12..16], b"list");
        assert_eq!(&bytes[16..], &[0, 0]);
    }

    #[test]
    fn empty_payload_is_minimum_size() {
        let bytes = Packet::end(1).to_bytes().unwrap();
        assert_eq!(bytes.len(), MIN_PACKET_SIZE);
        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, Packet::end(1));
    }

    #[test]
    fn negative_id_survives() {
        let bytes = Packet::create(AUTH_FAILED_ID, packet_type::AUTH_RESPONSE, "").unwrap();
        assert_eq!(Packet::from_bytes(&bytes).unwrap().id, -1);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = Packet::create(1, packet_type::COMMAND, "help").unwrap();
        bytes.push(0);
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn rejects_bad_trailer() {
        let mut bytes = Packet::create(1, packet_type::COMMAND, "help").unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'x';
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn rejects_negative_length() {
        let mut bytes = Packet::create(1, packet_type::COMMAND, "").unwrap();
        bytes[0..4].copy_from_slice(&(-10i32).to_le_bytes());
        assert!(Packet::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_non_ascii_and_oversized_payloads() {
        assert!(matches!(
            Packet::new(1, packet_type::COMMAND, "say héllo"),
            Err(ProtocolError::NonAsciiPayload)
        ));
        let big = "a".repeat(MAX_PAYLOAD_SIZE + 1);
        assert!(matches!(
            Packet::new(1, packet_type::COMMAND, big),
            Err(ProtocolError::OversizedPacket(_))
        ));
        assert!(Packet::new(1, packet_type::COMMAND, "a".repeat(MAX_PAYLOAD_SIZE)).is_ok());
    }

    #[test]
    fn response_types() {
        assert_eq!(response_type_for(packet_type::AUTH), packet_type::AUTH_RESPONSE);
        assert_eq!(response_type_for(packet_type::COMMAND), packet_type::COMMAND_RESPONSE);
        assert_eq!(response_type_for(packet_type::END), packet_type::COMMAND_RESPONSE);
        assert_eq!(response_type_for(42), packet_type::COMMAND_RESPONSE);
    }

    #[test]
    fn unknown_payloads_use_lowercase_hex() {
        assert_eq!(unknown_request_payload(packet_type::END), "Unknown request ff");
        assert_eq!(unknown_request_payload(2), "Unknown request 2");
        assert_eq!(unknown_request_payload(-26), "Unknown request -1a");
    }

    #[test]
    fn end_echo_detection() {
        let echo = Packet::new(9, packet_type::COMMAND_RESPONSE, "Unknown request ff").unwrap();
        assert!(echo.is_end_echo());
        let other = Packet::new(9, packet_type::COMMAND_RESPONSE, "Unknown request 2").unwrap();
        assert!(!other.is_end_echo());
    }

    #[test]
    fn ascii_lossy_replaces() {
        assert_eq!(ascii_lossy("§aHello ☃"), "?aHello ?");
        assert_eq!(ascii_lossy("plain"), "plain");
    }

    #[test]
    fn random_ids_are_positive() {
        for _ in 0..1000 {
            assert!(random_id() > 0);
        }
    }
}
