//! Relay wire codec
//!
//! Binary layout of the relay protocol. All integers are big-endian.
//!
//! Outer frame:
//! ```text
//! u64  sequence id
//! u16  header count
//!      per header: u16-len key, u16-len value (UTF-8)
//! u32  payload length, payload bytes
//! ```
//!
//! Envelope (payload of a `data` frame):
//! ```text
//! u16  sub-message count
//!      per message: u16-len type tag (UTF-8), u32-len payload bytes
//! u16-len cursor token (may be empty)
//! u32  heartbeat interval in milliseconds (0 = unspecified)
//! ```
//!
//! The cursor token and heartbeat interval are session keepalive metadata:
//! the connection layer must periodically echo the latest cursor back to the
//! relay in an `ack` frame. Frame boundaries on the stream are handled by
//! the transport (u32 length prefix per frame); this module is pure and does
//! no I/O.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Frame type header value: client handshake/subscription
pub const FRAME_TYPE_HELLO: &str = "hello";
/// Frame type header value: multiplexed event envelope
pub const FRAME_TYPE_DATA: &str = "data";
/// Frame type header value: cursor acknowledgement
pub const FRAME_TYPE_ACK: &str = "ack";
/// Frame type header value: relay liveness probe
pub const FRAME_TYPE_PING: &str = "ping";

/// Header key carrying the frame type
pub const HEADER_TYPE: &str = "type";
/// Header key carrying the external room id of a `data` frame
pub const HEADER_ROOM: &str = "room";
/// Header key carrying the broadcaster's external handle
pub const HEADER_HOST: &str = "host";
/// Header key carrying the auth token of a `hello` frame
pub const HEADER_TOKEN: &str = "token";
/// Header key carrying the echoed cursor of an `ack` frame
pub const HEADER_CURSOR: &str = "cursor";

/// Longest accepted string field (tag, header key/value, cursor)
const MAX_STRING_LEN: usize = 16 * 1024;
/// Longest accepted byte field (frame payload, sub-message payload)
const MAX_BYTES_LEN: usize = 16 * 1024 * 1024;

/// One binary unit received from or sent to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Relay-assigned sequence id
    pub sequence: u64,
    /// Ordered header list
    pub headers: Vec<(String, String)>,
    /// Opaque payload (an encoded envelope for `data` frames)
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with explicit headers
    pub fn new(sequence: u64, headers: Vec<(String, String)>, payload: Bytes) -> Self {
        Self {
            sequence,
            headers,
            payload,
        }
    }

    /// Create a `hello` frame carrying the auth token
    pub fn hello(sequence: u64, token: &str) -> Self {
        Self::new(
            sequence,
            vec![
                (HEADER_TYPE.to_string(), FRAME_TYPE_HELLO.to_string()),
                (HEADER_TOKEN.to_string(), token.to_string()),
            ],
            Bytes::new(),
        )
    }

    /// Create a `data` frame for a room
    pub fn data(sequence: u64, room: &str, payload: Bytes) -> Self {
        Self::new(
            sequence,
            vec![
                (HEADER_TYPE.to_string(), FRAME_TYPE_DATA.to_string()),
                (HEADER_ROOM.to_string(), room.to_string()),
            ],
            payload,
        )
    }

    /// Create an `ack` frame echoing a cursor token
    pub fn ack(sequence: u64, cursor: &str) -> Self {
        Self::new(
            sequence,
            vec![
                (HEADER_TYPE.to_string(), FRAME_TYPE_ACK.to_string()),
                (HEADER_CURSOR.to_string(), cursor.to_string()),
            ],
            Bytes::new(),
        )
    }

    /// Look up the first header with the given key
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The frame type, if the `type` header is present
    pub fn frame_type(&self) -> Option<&str> {
        self.header(HEADER_TYPE)
    }

    /// The room id, if the `room` header is present
    pub fn room(&self) -> Option<&str> {
        self.header(HEADER_ROOM)
    }

    /// Encode the frame to bytes (without the transport length prefix)
    ///
    /// Fails when a header string or the payload exceeds the wire bounds,
    /// rather than emitting a frame with truncated length prefixes.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        for (key, value) in &self.headers {
            check_string16(key)?;
            check_string16(value)?;
        }
        if self.payload.len() > MAX_BYTES_LEN {
            return Err(WireError::LengthExceeded(self.payload.len(), MAX_BYTES_LEN));
        }

        let mut buf = BytesMut::with_capacity(32 + self.payload.len());
        buf.put_u64(self.sequence);
        buf.put_u16(self.headers.len() as u16);
        for (key, value) in &self.headers {
            put_string16(&mut buf, key);
            put_string16(&mut buf, value);
        }
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a frame from a buffer
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 8 {
            return Err(WireError::UnexpectedEof);
        }
        let sequence = buf.get_u64();

        if buf.remaining() < 2 {
            return Err(WireError::UnexpectedEof);
        }
        let header_count = buf.get_u16() as usize;
        let mut headers = Vec::with_capacity(header_count);
        for _ in 0..header_count {
            let key = read_string16(buf)?;
            let value = read_string16(buf)?;
            headers.push((key, value));
        }

        let payload = read_bytes32(buf)?;

        Ok(Self {
            sequence,
            headers,
            payload,
        })
    }
}

/// One typed sub-message inside an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMessage {
    /// Opaque type tag
    pub tag: String,
    /// Opaque payload, decoded against the tag's expected shape
    pub payload: Bytes,
}

impl SubMessage {
    /// Create a sub-message
    pub fn new(tag: impl Into<String>, payload: Bytes) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }
}

/// Decoded envelope structure: ordered sub-messages plus session metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sub-messages in relay order
    pub messages: Vec<SubMessage>,
    /// Cursor token to echo back in acks (empty = none supplied)
    pub cursor: String,
    /// Requested ack cadence in milliseconds (0 = unspecified)
    pub heartbeat_ms: u32,
}

impl Envelope {
    /// Create an envelope
    pub fn new(messages: Vec<SubMessage>, cursor: impl Into<String>, heartbeat_ms: u32) -> Self {
        Self {
            messages,
            cursor: cursor.into(),
            heartbeat_ms,
        }
    }

    /// Encode the envelope to bytes
    ///
    /// Fails when a tag, the cursor, or a sub-message payload exceeds the
    /// wire bounds.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        for msg in &self.messages {
            check_string16(&msg.tag)?;
            if msg.payload.len() > MAX_BYTES_LEN {
                return Err(WireError::LengthExceeded(msg.payload.len(), MAX_BYTES_LEN));
            }
        }
        check_string16(&self.cursor)?;

        let mut buf = BytesMut::new();
        buf.put_u16(self.messages.len() as u16);
        for msg in &self.messages {
            put_string16(&mut buf, &msg.tag);
            buf.put_u32(msg.payload.len() as u32);
            buf.put_slice(&msg.payload);
        }
        put_string16(&mut buf, &self.cursor);
        buf.put_u32(self.heartbeat_ms);
        Ok(buf.freeze())
    }

    /// Decode an envelope from a buffer
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 2 {
            return Err(WireError::UnexpectedEof);
        }
        let count = buf.get_u16() as usize;
        let mut messages = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let tag = read_string16(buf)?;
            let payload = read_bytes32(buf)?;
            messages.push(SubMessage { tag, payload });
        }

        let cursor = read_string16(buf)?;
        if buf.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let heartbeat_ms = buf.get_u32();

        Ok(Self {
            messages,
            cursor,
            heartbeat_ms,
        })
    }
}

/// Check that a string fits a u16 length prefix within the wire bound
pub(crate) fn check_string16(s: &str) -> Result<(), WireError> {
    if s.len() > MAX_STRING_LEN {
        return Err(WireError::LengthExceeded(s.len(), MAX_STRING_LEN));
    }
    Ok(())
}

/// Write a u16-length-prefixed UTF-8 string
///
/// The caller validates the bound first; see [`check_string16`].
pub(crate) fn put_string16(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

/// Read a u16-length-prefixed UTF-8 string
pub(crate) fn read_string16(buf: &mut Bytes) -> Result<String, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if len > MAX_STRING_LEN {
        return Err(WireError::LengthExceeded(len, MAX_STRING_LEN));
    }
    if buf.remaining() < len {
        return Err(WireError::UnexpectedEof);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

/// Read a u32-length-prefixed byte field
pub(crate) fn read_bytes32(buf: &mut Bytes) -> Result<Bytes, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    if len > MAX_BYTES_LEN {
        return Err(WireError::LengthExceeded(len, MAX_BYTES_LEN));
    }
    if buf.remaining() < len {
        return Err(WireError::UnexpectedEof);
    }
    Ok(buf.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::data(42, "room_7", Bytes::from_static(b"\x01\x02\x03"));
        let mut encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&mut encoded).unwrap();

        assert_eq!(decoded, frame);
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.frame_type(), Some(FRAME_TYPE_DATA));
        assert_eq!(decoded.room(), Some("room_7"));
    }

    #[test]
    fn test_hello_frame_headers() {
        let frame = Frame::hello(1, "tok_abc");

        assert_eq!(frame.frame_type(), Some(FRAME_TYPE_HELLO));
        assert_eq!(frame.header(HEADER_TOKEN), Some("tok_abc"));
        assert_eq!(frame.room(), None);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_ack_frame_roundtrip() {
        let frame = Frame::ack(9, "cursor-xyz");
        let mut encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&mut encoded).unwrap();

        assert_eq!(decoded.frame_type(), Some(FRAME_TYPE_ACK));
        assert_eq!(decoded.header(HEADER_CURSOR), Some("cursor-xyz"));
    }

    #[test]
    fn test_frame_truncated() {
        let frame = Frame::data(1, "room", Bytes::from_static(b"payload"));
        let encoded = frame.encode().unwrap();

        // Chop the buffer at every possible point; none may panic, and all
        // but the full buffer must fail cleanly.
        for cut in 0..encoded.len() {
            let mut partial = encoded.slice(0..cut);
            assert!(Frame::decode(&mut partial).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_encode_rejects_oversized_header() {
        let token = "t".repeat(64 * 1024);
        let frame = Frame::hello(1, &token);

        assert!(matches!(
            frame.encode(),
            Err(WireError::LengthExceeded(_, _))
        ));
    }

    #[test]
    fn test_envelope_encode_rejects_oversized_cursor() {
        let cursor = "c".repeat(20 * 1024);
        let envelope = Envelope::new(Vec::new(), cursor, 0);

        assert!(matches!(
            envelope.encode(),
            Err(WireError::LengthExceeded(_, _))
        ));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::new(
            vec![
                SubMessage::new("chat", Bytes::from_static(b"abc")),
                SubMessage::new("like", Bytes::from_static(b"")),
            ],
            "cur_1",
            15_000,
        );
        let mut encoded = envelope.encode().unwrap();
        let decoded = Envelope::decode(&mut encoded).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[0].tag, "chat");
        assert_eq!(decoded.heartbeat_ms, 15_000);
    }

    #[test]
    fn test_envelope_empty() {
        let envelope = Envelope::new(Vec::new(), "", 0);
        let mut encoded = envelope.encode().unwrap();
        let decoded = Envelope::decode(&mut encoded).unwrap();

        assert!(decoded.messages.is_empty());
        assert!(decoded.cursor.is_empty());
        assert_eq!(decoded.heartbeat_ms, 0);
    }

    #[test]
    fn test_envelope_truncated() {
        let envelope = Envelope::new(
            vec![SubMessage::new("gift", Bytes::from_static(b"\xFF\xFF"))],
            "c",
            1000,
        );
        let encoded = envelope.encode().unwrap();

        for cut in 0..encoded.len() {
            let mut partial = encoded.slice(0..cut);
            assert!(Envelope::decode(&mut partial).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u16(2);
        buf.put_slice(&[0xFF, 0xFE]);
        let mut bytes = buf.freeze();

        assert_eq!(read_string16(&mut bytes), Err(WireError::InvalidUtf8));
    }

    #[test]
    fn test_bytes_length_limit() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        let mut bytes = buf.freeze();

        assert!(matches!(
            read_bytes32(&mut bytes),
            Err(WireError::LengthExceeded(_, _))
        ));
    }
}
