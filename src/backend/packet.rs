//! Hub packet codec
//!
//! Every packet exchanged with the hub starts with an 8-byte little-endian
//! header:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | device uid (`0` for broadcast) |
//! | 4 | 1 | total packet length, header included |
//! | 5 | 1 | function id |
//! | 6 | 1 | sequence number (bits 4-7), response expected (bit 3) |
//! | 7 | 1 | error code (bits 6-7) |
//!
//! Sequence number `0` marks an unsolicited callback; requests use 1..=15.
//!
//! Device uids travel as 32-bit integers in headers and as base58 strings in
//! enumeration payloads. [`Uid`] converts between the two.

use crate::error::{Result, StationError};
use crate::types::{DeviceAnnouncement, EnumerationType};
use std::fmt;
use std::str::FromStr;

/// Size of the packet header in bytes
pub const HEADER_LEN: usize = 8;

/// Largest packet the hub accepts
pub const MAX_PACKET_LEN: usize = 80;

/// Uid used for broadcast requests
pub const BROADCAST_UID: u32 = 0;

/// Broadcast request asking every device to announce itself
pub const FUNCTION_ENUMERATE: u8 = 254;

/// Callback carrying one device announcement
pub const CALLBACK_ENUMERATE: u8 = 253;

/// Length of the enumerate callback payload
pub const ENUMERATE_PAYLOAD_LEN: usize = 26;

const BASE58_ALPHABET: &[u8; 58] = b"123456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

/// 32-bit device uid, shown and parsed in the hub's base58 notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u32);

impl Uid {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Fold a 64-bit uid of newer devices into the 32 bits used on the wire
fn compress_uid64(uid64: u64) -> u32 {
    let low = (uid64 & 0xFFFF_FFFF) as u32;
    let high = ((uid64 >> 32) & 0xFFFF_FFFF) as u32;

    (low & 0x0000_0FFF)
        | ((low & 0x0F00_0000) >> 12)
        | ((high & 0x0000_003F) << 16)
        | ((high & 0x000F_0000) << 6)
        | ((high & 0x3F00_0000) << 2)
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        let mut digits = Vec::with_capacity(6);
        while value >= 58 {
            digits.push(BASE58_ALPHABET[(value % 58) as usize]);
            value /= 58;
        }
        digits.push(BASE58_ALPHABET[value as usize]);
        digits.reverse();
        // Alphabet is pure ASCII
        f.write_str(&String::from_utf8_lossy(&digits))
    }
}

impl FromStr for Uid {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(StationError::Protocol("empty uid".to_string()));
        }

        let mut value: u64 = 0;
        for c in s.bytes() {
            let digit = BASE58_ALPHABET
                .iter()
                .position(|&a| a == c)
                .ok_or_else(|| StationError::Protocol(format!("invalid uid '{}'", s)))?;
            value = value
                .checked_mul(58)
                .and_then(|v| v.checked_add(digit as u64))
                .ok_or_else(|| StationError::Protocol(format!("uid '{}' out of range", s)))?;
        }

        if value > u64::from(u32::MAX) {
            Ok(Uid(compress_uid64(value)))
        } else {
            Ok(Uid(value as u32))
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub uid: u32,
    pub length: u8,
    pub function_id: u8,
    pub sequence: u8,
    pub response_expected: bool,
    pub error_code: u8,
}

impl PacketHeader {
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            uid: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: bytes[4],
            function_id: bytes[5],
            sequence: bytes[6] >> 4,
            response_expected: bytes[6] & 0x08 != 0,
            error_code: bytes[7] >> 6,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let uid = self.uid.to_le_bytes();
        let mut options = (self.sequence & 0x0F) << 4;
        if self.response_expected {
            options |= 0x08;
        }
        [
            uid[0],
            uid[1],
            uid[2],
            uid[3],
            self.length,
            self.function_id,
            options,
            (self.error_code & 0x03) << 6,
        ]
    }

    /// Unsolicited packets carry sequence number zero
    pub fn is_callback(&self) -> bool {
        self.sequence == 0
    }

    /// Payload bytes that follow this header
    pub fn payload_len(&self) -> usize {
        usize::from(self.length).saturating_sub(HEADER_LEN)
    }
}

/// A complete hub packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a request packet
    pub fn request(
        uid: u32,
        function_id: u8,
        sequence: u8,
        response_expected: bool,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let length = HEADER_LEN + payload.len();
        if length > MAX_PACKET_LEN {
            return Err(StationError::Protocol(format!(
                "packet of {} bytes exceeds {} byte limit",
                length, MAX_PACKET_LEN
            )));
        }
        Ok(Self {
            header: PacketHeader {
                uid,
                length: length as u8,
                function_id,
                sequence,
                response_expected,
                error_code: 0,
            },
            payload,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.header.encode());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode a full packet; the buffer must hold exactly `length` bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header_bytes: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| StationError::Protocol(format!("short packet ({} bytes)", bytes.len())))?;
        let header = PacketHeader::decode(header_bytes);

        if usize::from(header.length) != bytes.len() || usize::from(header.length) < HEADER_LEN {
            return Err(StationError::Protocol(format!(
                "length field {} does not match {} received bytes",
                header.length,
                bytes.len()
            )));
        }

        Ok(Self {
            header,
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

/// Read a zero-padded fixed-width string field
pub fn read_fixed_str(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

/// Write a string into a zero-padded fixed-width field, truncating if needed
pub fn write_fixed_str(out: &mut Vec<u8>, text: &str, width: usize) {
    let mut field: Vec<u8> = text.bytes().take(width).collect();
    field.resize(width, 0);
    out.extend_from_slice(&field);
}

/// Parse the payload of an enumerate callback
pub fn parse_enumerate_payload(payload: &[u8]) -> Result<DeviceAnnouncement> {
    if payload.len() < ENUMERATE_PAYLOAD_LEN {
        return Err(StationError::Protocol(format!(
            "enumerate payload has {} bytes, expected {}",
            payload.len(),
            ENUMERATE_PAYLOAD_LEN
        )));
    }

    let uid: Uid = read_fixed_str(&payload[0..8]).parse()?;
    let connected_uid = read_fixed_str(&payload[8..16]);
    let position = char::from(payload[16]);
    let hardware_version = [payload[17], payload[18], payload[19]];
    let firmware_version = [payload[20], payload[21], payload[22]];
    let device_identifier = u16::from_le_bytes([payload[23], payload[24]]);
    let enumeration_type = EnumerationType::from_u8(payload[25]);

    Ok(DeviceAnnouncement {
        uid,
        connected_uid,
        position,
        hardware_version,
        firmware_version,
        device_identifier,
        enumeration_type,
    })
}

/// Encode an announcement as an enumerate callback payload
pub fn encode_enumerate_payload(announcement: &DeviceAnnouncement) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENUMERATE_PAYLOAD_LEN);
    write_fixed_str(&mut out, &announcement.uid.to_string(), 8);
    write_fixed_str(&mut out, &announcement.connected_uid, 8);
    out.push(u8::try_from(announcement.position).unwrap_or(b'?'));
    out.extend_from_slice(&announcement.hardware_version);
    out.extend_from_slice(&announcement.firmware_version);
    out.extend_from_slice(&announcement.device_identifier.to_le_bytes());
    out.push(announcement.enumeration_type.as_u8());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_known_values() {
        assert_eq!(Uid(0).to_string(), "1");
        assert_eq!(Uid(57).to_string(), "Z");
        assert_eq!(Uid(58).to_string(), "21");
        assert_eq!("21".parse::<Uid>().unwrap(), Uid(58));
    }

    #[test]
    fn test_uid_rejects_invalid_characters() {
        // '0', 'O', 'I' and 'l' are not part of the alphabet
        assert!("a0b".parse::<Uid>().is_err());
        assert!("IO".parse::<Uid>().is_err());
        assert!("".parse::<Uid>().is_err());
    }

    #[test]
    fn test_uid64_is_compressed() {
        // 2^32 does not fit and must be folded
        let uid64: u64 = 1 << 32;
        let mut digits = Vec::new();
        let mut v = uid64;
        while v >= 58 {
            digits.push(BASE58_ALPHABET[(v % 58) as usize]);
            v /= 58;
        }
        digits.push(BASE58_ALPHABET[v as usize]);
        digits.reverse();
        let text = String::from_utf8(digits).unwrap();

        let uid: Uid = text.parse().unwrap();
        assert_eq!(uid, Uid(compress_uid64(uid64)));
        assert_eq!(uid, Uid(1 << 16));
    }

    #[test]
    fn test_header_bit_layout() {
        let header = PacketHeader {
            uid: 0x0403_0201,
            length: 10,
            function_id: 3,
            sequence: 5,
            response_expected: true,
            error_code: 2,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04, 10, 3, 0x58, 0x80]);
        assert_eq!(PacketHeader::decode(&bytes), header);
    }

    #[test]
    fn test_enumerate_request_shape() {
        let packet = Packet::request(BROADCAST_UID, FUNCTION_ENUMERATE, 1, false, Vec::new()).unwrap();
        let bytes = packet.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes[4], 8);
        assert_eq!(bytes[5], 254);
        assert_eq!(bytes[6], 0x10);
    }

    #[test]
    fn test_packet_decode_checks_length() {
        let mut bytes = Packet::request(7, 1, 1, true, vec![1, 2, 3]).unwrap().encode();
        assert!(Packet::decode(&bytes).is_ok());
        bytes.pop();
        assert!(Packet::decode(&bytes).is_err());
        assert!(Packet::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_oversized_request_rejected() {
        assert!(Packet::request(7, 1, 1, true, vec![0; 73]).is_err());
        assert!(Packet::request(7, 1, 1, true, vec![0; 72]).is_ok());
    }

    #[test]
    fn test_enumerate_payload() {
        let announcement = DeviceAnnouncement {
            uid: "SCD".parse().unwrap(),
            connected_uid: "6QHvJ1".to_string(),
            position: 'c',
            hardware_version: [1, 2, 0],
            firmware_version: [2, 0, 3],
            device_identifier: 227,
            enumeration_type: EnumerationType::Connected,
        };
        let payload = encode_enumerate_payload(&announcement);
        assert_eq!(payload.len(), ENUMERATE_PAYLOAD_LEN);
        assert_eq!(parse_enumerate_payload(&payload).unwrap(), announcement);
        assert!(parse_enumerate_payload(&payload[..20]).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_uid_text_roundtrip(raw in any::<u32>()) {
            let uid = Uid(raw);
            prop_assert_eq!(uid.to_string().parse::<Uid>().unwrap(), uid);
        }

        #[test]
        fn test_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..96)) {
            let _ = Packet::decode(&bytes);
        }
    }
}
