//! ## MESSAGE CLASSIFIER (C5)
//!
//! Turns a decoded `(Header, body)` pair into zero or more [`crate::dispatch::Event`]s.
//! A `protocol_version == 2` body is itself a concatenation of inner frames
//! compressed with zlib/deflate; this module inflates it and recurses once
//! over the inner frames. `protocol_version == 3` (brotli) bodies are
//! recognized but never decompressed — logged at debug and dropped, per the
//! wire-compatible-only contract.
//!
//! A malformed inner frame or a JSON body that fails to parse is isolated to
//! that single frame: it is logged and skipped, never propagated to the
//! caller (§4.5).

use std::io::Read;
use std::time::SystemTime;

use flate2::read::ZlibDecoder;
use tracing::{debug, warn};

use crate::dispatch::Event;
use crate::frame::{self, Header, ACTION_MESSAGE, ACTION_POPULARITY, HEADER_LEN};

/// Classifies one top-level frame into the events it produces.
///
/// `connect_ack` (action 8) and `heartbeat` (action 2, inbound echo) are not
/// handled here — the receive loop intercepts those before reaching the
/// classifier, since they drive connection lifecycle rather than emitting
/// user-visible events.
pub fn classify(header: &Header, body: &[u8]) -> Vec<Event> {
    match header.action {
        ACTION_POPULARITY => classify_popularity(body),
        ACTION_MESSAGE => classify_message(header.protocol_version, body),
        other => {
            debug!(action = other, "ignoring frame with unrecognized action");
            Vec::new()
        }
    }
}

fn classify_popularity(body: &[u8]) -> Vec<Event> {
    if body.len() < 4 {
        warn!(len = body.len(), "popularity body shorter than 4 bytes, dropping");
        return Vec::new();
    }
    let value = u32::from_be_bytes(body[..4].try_into().unwrap());
    vec![Event::Popularity { value, time: SystemTime::now() }]
}

fn classify_message(protocol_version: u16, body: &[u8]) -> Vec<Event> {
    match protocol_version {
        0 | 1 => decode_json_event(body).into_iter().collect(),
        2 => decode_deflate_subframes(body),
        3 => {
            debug!(len = body.len(), "brotli sub-frame recognized but not decompressed");
            Vec::new()
        }
        other => {
            warn!(protocol_version = other, "unknown protocol_version on message frame, dropping");
            Vec::new()
        }
    }
}

fn decode_deflate_subframes(body: &[u8]) -> Vec<Event> {
    let mut inflated = Vec::new();
    if let Err(e) = ZlibDecoder::new(body).read_to_end(&mut inflated) {
        warn!(err = %e, "failed to inflate protocol_version=2 body, dropping");
        return Vec::new();
    }

    let mut events = Vec::new();
    let mut offset = 0usize;
    while offset + HEADER_LEN <= inflated.len() {
        let mut header_buf = [0u8; HEADER_LEN];
        header_buf.copy_from_slice(&inflated[offset..offset + HEADER_LEN]);

        let header = match frame::decode_header(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                warn!(err = %e, offset, "malformed inner frame inside deflate sub-message, stopping");
                break;
            }
        };

        let body_len = header.body_length();
        let body_start = offset + HEADER_LEN;
        let body_end = body_start + body_len;
        if body_end > inflated.len() {
            warn!(offset, body_len, "inner frame body runs past inflated buffer, stopping");
            break;
        }

        events.extend(classify(&header, &inflated[body_start..body_end]));
        offset = body_end;
    }
    events
}

fn decode_json_event(body: &[u8]) -> Option<Event> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(json) => Some(Event::Raw { json }),
        Err(e) => {
            warn!(err = %e, len = body.len(), "malformed JSON body, dropping this frame only");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn header(action: u32, protocol_version: u16, packet_length: u32) -> Header {
        Header {
            packet_length,
            header_length: HEADER_LEN as u16,
            protocol_version,
            action,
            parameter: 1,
        }
    }

    #[test]
    fn popularity_body_parses_big_endian_u32() {
        let events = classify_popularity(&250u32.to_be_bytes());
        match &events[..] {
            [Event::Popularity { value, .. }] => assert_eq!(*value, 250),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn short_popularity_body_is_dropped_without_panic() {
        assert!(classify_popularity(&[0x00, 0x01]).is_empty());
    }

    #[test]
    fn v0_message_with_valid_json_becomes_raw_event() {
        let body = br#"{"cmd":"DANMU_MSG"}"#;
        let events = classify_message(0, body);
        match &events[..] {
            [Event::Raw { json }] => assert_eq!(json["cmd"], "DANMU_MSG"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn v0_message_with_malformed_json_is_dropped_not_panicked() {
        let events = classify_message(0, b"{not json");
        assert!(events.is_empty());
    }

    #[test]
    fn v3_brotli_message_is_recognized_and_dropped() {
        let events = classify_message(3, b"\x1b\x01\x02\x03garbage-brotli-bytes");
        assert!(events.is_empty());
    }

    #[test]
    fn v2_deflate_inflates_and_recurses_into_inner_popularity_frame() {
        let inner_body = 42u32.to_be_bytes();
        let inner_frame = frame::encode_with_body(ACTION_POPULARITY, 0, &inner_body);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&inner_frame).unwrap();
        let compressed = encoder.finish().unwrap();

        let outer = header(ACTION_MESSAGE, 2, (HEADER_LEN + compressed.len()) as u32);
        let events = classify(&outer, &compressed);
        match &events[..] {
            [Event::Popularity { value, .. }] => assert_eq!(*value, 42),
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
