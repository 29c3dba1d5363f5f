//! Codec for encoding and decoding Relay events.
//!
//! This module provides MessagePack-based serialization with length-prefixed
//! framing. Field names are preserved on the wire so the tagged event shapes
//! survive encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum event size (64 KiB). Chat payloads are small; anything larger
/// indicates a misbehaving peer.
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// Not enough data to decode an event.
    #[error("Incomplete event: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode an event to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded event
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode<T: Serialize>(event: &T) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Decode an event from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let event = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(event)
}

/// Try to decode an event from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(event))` if a complete event was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the event is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let event = rmp_serde::from_slice(&payload)?;

    Ok(Some(event))
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_into<T: Serialize>(event: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, ServerEvent};

    #[test]
    fn test_encode_decode_roundtrip() {
        let events = vec![
            ServerEvent::clients_updated(vec!["conn-1".into(), "conn-2".into()]),
            ServerEvent::message_from_server("Ada Lovelace", "Hello, world!"),
        ];

        for event in events {
            let encoded = encode(&event).unwrap();
            let decoded: ServerEvent = decode(&encoded).unwrap();
            assert_eq!(event, decoded);
        }

        let inbound = ClientEvent::message_from_client("hi");
        let encoded = encode(&inbound).unwrap();
        let decoded: ClientEvent = decode(&encoded).unwrap();
        assert_eq!(inbound, decoded);
    }

    #[test]
    fn test_decode_incomplete() {
        let event = ClientEvent::message_from_client("hello");
        let encoded = encode(&event).unwrap();

        let partial = &encoded[..3];
        match decode::<ClientEvent>(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_event_too_large() {
        let big = "x".repeat(MAX_EVENT_SIZE + 1);
        let event = ClientEvent::message_from_client(big);

        match encode(&event) {
            Err(ProtocolError::EventTooLarge(_)) => {}
            other => panic!("Expected EventTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let event1 = ClientEvent::message_from_client("first");
        let event2 = ClientEvent::message_from_client("second");

        let mut buf = BytesMut::new();
        encode_into(&event1, &mut buf).unwrap();
        encode_into(&event2, &mut buf).unwrap();

        let decoded1: ClientEvent = decode_from(&mut buf).unwrap().unwrap();
        let decoded2: ClientEvent = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(event1, decoded1);
        assert_eq!(event2, decoded2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_streaming_decode_partial() {
        let event = ClientEvent::message_from_client("split across reads");
        let encoded = encode(&event).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..5]);
        assert!(decode_from::<ClientEvent>(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[5..]);
        let decoded: ClientEvent = decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(event, decoded);
    }
}
