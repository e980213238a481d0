//! ## FRAME CODEC
//!
//! The wire unit of the danmaku protocol: a 16-byte big-endian header
//! followed by an optional body. Mirrors the header/body split of
//! [HSMS]-style framed protocols — one contiguous buffer per frame so a
//! single `send` call puts it on the wire with zero extra copies at the
//! transport seam.
//!
//! [HSMS]: https://store-us.semi.org/products/e03700

use crate::error::{DanmakuError, Result};

/// Size of the fixed header, in bytes. The wire format calls this field
/// `header_length` and always sets it to 16; it is a magic constant, not a
/// negotiated value.
pub const HEADER_LEN: usize = 16;

/// Default cap on body length enforced by the receive loop (§4.4.3, §8
/// boundary tests).
pub const DEFAULT_MAX_BODY_LEN: usize = 65535;

/// Action: heartbeat, sent by the client on a fixed cadence.
pub const ACTION_HEARTBEAT: u32 = 2;
/// Action: popularity count, pushed by the server.
pub const ACTION_POPULARITY: u32 = 3;
/// Action: regular (JSON or compressed sub-frame) message, pushed by the server.
pub const ACTION_MESSAGE: u32 = 5;
/// Action: join-room request, sent by the client once per connection.
pub const ACTION_JOIN_ROOM: u32 = 7;
/// Action: connect acknowledgment, sent by the server in reply to join-room.
pub const ACTION_CONNECT_ACK: u32 = 8;

/// The literal 16-byte heartbeat frame — no body, `parameter` fixed at 1.
///
/// `[00 00 00 10][00 10][00 02][00 00 00 02][00 00 00 01]`
pub const HEARTBEAT_FRAME: [u8; HEADER_LEN] = [
    0x00, 0x00, 0x00, 0x10, // packet_length = 16
    0x00, 0x10, // header_length = 16
    0x00, 0x02, // protocol_version = 2
    0x00, 0x00, 0x00, 0x02, // action = 2 (heartbeat)
    0x00, 0x00, 0x00, 0x01, // parameter = 1
];

/// Decoded frame header (§3 Data Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub packet_length: u32,
    pub header_length: u16,
    pub protocol_version: u16,
    pub action: u32,
    pub parameter: u32,
}

impl Header {
    /// `packet_length - HEADER_LEN`, i.e. how many body bytes follow.
    pub fn body_length(&self) -> usize {
        self.packet_length as usize - HEADER_LEN
    }
}

/// Encodes a frame with no body — used for the heartbeat and for any
/// control action that carries nothing beyond the header.
pub fn encode_control(action: u32) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    write_header(&mut buf, HEADER_LEN as u32, 2, 1, action);
    buf
}

/// Encodes a frame carrying `body`, returning one contiguous buffer
/// (header followed by body) so the transport needs a single `send` call.
pub fn encode_with_body(action: u32, protocol_version: u16, body: &[u8]) -> Vec<u8> {
    let packet_length = (HEADER_LEN + body.len()) as u32;
    let mut buf = Vec::with_capacity(packet_length as usize);
    buf.resize(HEADER_LEN, 0);
    write_header(&mut buf[..HEADER_LEN], packet_length, protocol_version, 1, action);
    buf.extend_from_slice(body);
    buf
}

fn write_header(buf: &mut [u8], packet_length: u32, protocol_version: u16, parameter: u32, action: u32) {
    buf[0..4].copy_from_slice(&packet_length.to_be_bytes());
    buf[4..6].copy_from_slice(&(HEADER_LEN as u16).to_be_bytes());
    buf[6..8].copy_from_slice(&protocol_version.to_be_bytes());
    buf[8..12].copy_from_slice(&action.to_be_bytes());
    buf[12..16].copy_from_slice(&parameter.to_be_bytes());
}

/// Decodes a 16-byte header, validating the `header_length` magic.
pub fn decode_header(buf: &[u8; HEADER_LEN]) -> Result<Header> {
    let packet_length = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let header_length = u16::from_be_bytes(buf[4..6].try_into().unwrap());
    let protocol_version = u16::from_be_bytes(buf[6..8].try_into().unwrap());
    let action = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    let parameter = u32::from_be_bytes(buf[12..16].try_into().unwrap());

    if header_length as usize != HEADER_LEN {
        return Err(DanmakuError::DecodeError(format!(
            "header_length {header_length} != {HEADER_LEN}"
        )));
    }
    if (packet_length as usize) < HEADER_LEN {
        return Err(DanmakuError::DecodeError(format!(
            "packet_length {packet_length} < header length {HEADER_LEN}"
        )));
    }

    Ok(Header {
        packet_length,
        header_length,
        protocol_version,
        action,
        parameter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_control_frame_matches_literal_constant() {
        assert_eq!(encode_control(ACTION_HEARTBEAT), HEARTBEAT_FRAME);
    }

    #[test]
    fn round_trips_header_fields() {
        let body = br#"{"uid":999,"roomid":12345}"#;
        let encoded = encode_with_body(ACTION_JOIN_ROOM, 2, body);
        assert_eq!(encoded.len(), encoded.len());

        let mut header_buf = [0u8; HEADER_LEN];
        header_buf.copy_from_slice(&encoded[..HEADER_LEN]);
        let header = decode_header(&header_buf).unwrap();

        assert_eq!(header.packet_length as usize, encoded.len());
        assert_eq!(header.header_length as usize, HEADER_LEN);
        assert_eq!(header.protocol_version, 2);
        assert_eq!(header.action, ACTION_JOIN_ROOM);
        assert_eq!(header.parameter, 1);
        assert_eq!(&encoded[HEADER_LEN..], body);
    }

    #[test]
    fn join_emission_matches_exact_bytes() {
        let body = br#"{"uid":999,"roomid":12345,"protover":2,"platform":"web","clientver":"1.13.4","type":2,"key":"abc"}"#;
        let encoded = encode_with_body(ACTION_JOIN_ROOM, 2, body);

        let mut header_buf = [0u8; HEADER_LEN];
        header_buf.copy_from_slice(&encoded[..HEADER_LEN]);
        let header = decode_header(&header_buf).unwrap();

        assert_eq!(header.action, 7);
        assert_eq!(header.packet_length as usize, HEADER_LEN + body.len());
        assert_eq!(&encoded[HEADER_LEN..], &body[..]);
    }

    #[test]
    fn rejects_wrong_header_length_magic() {
        let mut buf = [0u8; HEADER_LEN];
        buf[4..6].copy_from_slice(&20u16.to_be_bytes());
        assert!(decode_header(&buf).is_err());
    }

    #[test]
    fn decodes_connect_ack_literal() {
        let bytes: [u8; HEADER_LEN] = [
            0x00, 0x00, 0x00, 0x10, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00,
            0x00, 0x01,
        ];
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.action, ACTION_CONNECT_ACK);
        assert_eq!(header.body_length(), 0);
    }

    #[test]
    fn decodes_popularity_body_length() {
        // action=3, packet_length=20 -> body_length=4
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&20u32.to_be_bytes());
        buf[4..6].copy_from_slice(&16u16.to_be_bytes());
        buf[8..12].copy_from_slice(&ACTION_POPULARITY.to_be_bytes());
        let header = decode_header(&buf).unwrap();
        assert_eq!(header.body_length(), 4);
    }
}
