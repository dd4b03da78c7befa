//! Sub-message payload codecs
//!
//! One encode/decode pair per known type tag. All payloads start with the
//! source timestamp; user-bearing payloads follow with a common user block:
//!
//! ```text
//! i64  source timestamp in milliseconds (<= 0 = absent)
//! [user block]
//!   u64     external user id (0 = absent)
//!   str16   handle ("" = absent)
//!   str16   nickname ("" = absent)
//! [variant fields]
//! ```
//!
//! Variant fields:
//! ```text
//! chat     str16 text
//! gift     u64 gift id, str16 gift name, u32 repeat count
//! like     u32 count
//! join     (none)
//! viewers  u64 count            (no user block)
//! follow   (none)
//! share    (none)
//! product  u64 product id, str16 title, str16 price, str16 image url
//!                               (no user block)
//! control  u32 action code      (no user block)
//! ```
//!
//! Decoders are strict: a payload that does not match its tag's shape fails
//! with a [`DecodeError`] and the caller drops that one message. Encoders
//! exist for the connection's outbound frames and for test fixtures; string
//! fields passed to them must fit the wire's string bound (the length prefix
//! is u16).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::error::{DecodeError, WireError};

use super::event::{event_time, NormalizedEvent, UserRef};
use super::wire::{put_string16, read_string16};

/// Type tag: viewer comment
pub const TAG_CHAT: &str = "chat";
/// Type tag: gift
pub const TAG_GIFT: &str = "gift";
/// Type tag: likes
pub const TAG_LIKE: &str = "like";
/// Type tag: room join
pub const TAG_JOIN: &str = "join";
/// Type tag: concurrent viewer count
pub const TAG_VIEWERS: &str = "viewers";
/// Type tag: follow
pub const TAG_FOLLOW: &str = "follow";
/// Type tag: share
pub const TAG_SHARE: &str = "share";
/// Type tag: product showcase
pub const TAG_PRODUCT: &str = "product";
/// Type tag: control action
pub const TAG_CONTROL: &str = "control";

/// Control action code signalling the end of the stream
pub const CONTROL_ACTION_STREAM_ENDED: u32 = 3;

fn wire_err(tag: &'static str) -> impl Fn(WireError) -> DecodeError {
    move |source| match source {
        WireError::InvalidUtf8 => DecodeError::InvalidUtf8(tag),
        WireError::UnexpectedEof => DecodeError::Truncated(tag),
        other => DecodeError::Wire { tag, source: other },
    }
}

fn need(buf: &Bytes, n: usize, tag: &'static str) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::Truncated(tag));
    }
    Ok(())
}

fn put_user(buf: &mut BytesMut, user_id: u64, handle: &str, nickname: &str) {
    buf.put_u64(user_id);
    put_string16(buf, handle);
    put_string16(buf, nickname);
}

fn read_user(buf: &mut Bytes, tag: &'static str) -> Result<UserRef, DecodeError> {
    need(buf, 8, tag)?;
    let user_id = buf.get_u64();
    let handle = read_string16(buf).map_err(wire_err(tag))?;
    let nickname = read_string16(buf).map_err(wire_err(tag))?;
    Ok(UserRef::resolve(user_id, &handle, &nickname))
}

fn read_timestamp(
    buf: &mut Bytes,
    tag: &'static str,
    fallback: DateTime<Utc>,
) -> Result<DateTime<Utc>, DecodeError> {
    need(buf, 8, tag)?;
    Ok(event_time(buf.get_i64(), fallback))
}

/// Encode a chat payload
pub fn encode_chat(ts_ms: i64, user_id: u64, handle: &str, nickname: &str, text: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(ts_ms);
    put_user(&mut buf, user_id, handle, nickname);
    put_string16(&mut buf, text);
    buf.freeze()
}

/// Decode a chat payload
pub fn decode_chat(buf: &mut Bytes, fallback: DateTime<Utc>) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_CHAT, fallback)?;
    let user = read_user(buf, TAG_CHAT)?;
    let text = read_string16(buf).map_err(wire_err(TAG_CHAT))?;
    Ok(NormalizedEvent::Comment { user, text, at })
}

/// Encode a gift payload
pub fn encode_gift(
    ts_ms: i64,
    user_id: u64,
    handle: &str,
    nickname: &str,
    gift_id: u64,
    gift_name: &str,
    repeat_count: u32,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(ts_ms);
    put_user(&mut buf, user_id, handle, nickname);
    buf.put_u64(gift_id);
    put_string16(&mut buf, gift_name);
    buf.put_u32(repeat_count);
    buf.freeze()
}

/// Decode a gift payload
pub fn decode_gift(buf: &mut Bytes, fallback: DateTime<Utc>) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_GIFT, fallback)?;
    let user = read_user(buf, TAG_GIFT)?;
    need(buf, 8, TAG_GIFT)?;
    let gift_id = buf.get_u64();
    let gift_name = read_string16(buf).map_err(wire_err(TAG_GIFT))?;
    need(buf, 4, TAG_GIFT)?;
    let repeat_count = buf.get_u32();
    Ok(NormalizedEvent::Gift {
        user,
        gift_id,
        gift_name,
        repeat_count,
        at,
    })
}

/// Encode a like payload
pub fn encode_like(ts_ms: i64, user_id: u64, handle: &str, nickname: &str, count: u32) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(ts_ms);
    put_user(&mut buf, user_id, handle, nickname);
    buf.put_u32(count);
    buf.freeze()
}

/// Decode a like payload
pub fn decode_like(buf: &mut Bytes, fallback: DateTime<Utc>) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_LIKE, fallback)?;
    let user = read_user(buf, TAG_LIKE)?;
    need(buf, 4, TAG_LIKE)?;
    let count = buf.get_u32();
    Ok(NormalizedEvent::Like { user, count, at })
}

/// Encode a join payload
pub fn encode_join(ts_ms: i64, user_id: u64, handle: &str, nickname: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(ts_ms);
    put_user(&mut buf, user_id, handle, nickname);
    buf.freeze()
}

/// Decode a join payload
pub fn decode_join(buf: &mut Bytes, fallback: DateTime<Utc>) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_JOIN, fallback)?;
    let user = read_user(buf, TAG_JOIN)?;
    Ok(NormalizedEvent::Join { user, at })
}

/// Encode a viewer count payload
pub fn encode_viewers(ts_ms: i64, count: u64) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(ts_ms);
    buf.put_u64(count);
    buf.freeze()
}

/// Decode a viewer count payload
pub fn decode_viewers(
    buf: &mut Bytes,
    fallback: DateTime<Utc>,
) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_VIEWERS, fallback)?;
    need(buf, 8, TAG_VIEWERS)?;
    let count = buf.get_u64();
    Ok(NormalizedEvent::ViewerCount { count, at })
}

/// Encode a follow payload
pub fn encode_follow(ts_ms: i64, user_id: u64, handle: &str, nickname: &str) -> Bytes {
    encode_join(ts_ms, user_id, handle, nickname)
}

/// Decode a follow payload
pub fn decode_follow(
    buf: &mut Bytes,
    fallback: DateTime<Utc>,
) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_FOLLOW, fallback)?;
    let user = read_user(buf, TAG_FOLLOW)?;
    Ok(NormalizedEvent::Follow { user, at })
}

/// Encode a share payload
pub fn encode_share(ts_ms: i64, user_id: u64, handle: &str, nickname: &str) -> Bytes {
    encode_join(ts_ms, user_id, handle, nickname)
}

/// Decode a share payload
pub fn decode_share(buf: &mut Bytes, fallback: DateTime<Utc>) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_SHARE, fallback)?;
    let user = read_user(buf, TAG_SHARE)?;
    Ok(NormalizedEvent::Share { user, at })
}

/// Encode a product showcase payload
pub fn encode_product(
    ts_ms: i64,
    product_id: u64,
    title: &str,
    price: &str,
    image_url: &str,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(ts_ms);
    buf.put_u64(product_id);
    put_string16(&mut buf, title);
    put_string16(&mut buf, price);
    put_string16(&mut buf, image_url);
    buf.freeze()
}

/// Decode a product showcase payload
pub fn decode_product(
    buf: &mut Bytes,
    fallback: DateTime<Utc>,
) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_PRODUCT, fallback)?;
    need(buf, 8, TAG_PRODUCT)?;
    let product_id = buf.get_u64();
    let title = read_string16(buf).map_err(wire_err(TAG_PRODUCT))?;
    let price = read_string16(buf).map_err(wire_err(TAG_PRODUCT))?;
    let image_url = read_string16(buf).map_err(wire_err(TAG_PRODUCT))?;
    Ok(NormalizedEvent::ProductShowcase {
        product_id,
        title,
        price,
        image_url,
        at,
    })
}

/// Encode a control payload
pub fn encode_control(ts_ms: i64, action: u32) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(ts_ms);
    buf.put_u32(action);
    buf.freeze()
}

/// Decode a control payload
///
/// The stream-end action maps to its own variant; every other action maps
/// to the generic control variant.
pub fn decode_control(
    buf: &mut Bytes,
    fallback: DateTime<Utc>,
) -> Result<NormalizedEvent, DecodeError> {
    let at = read_timestamp(buf, TAG_CONTROL, fallback)?;
    need(buf, 4, TAG_CONTROL)?;
    let action = buf.get_u32();
    if action == CONTROL_ACTION_STREAM_ENDED {
        Ok(NormalizedEvent::StreamEnded { at })
    } else {
        Ok(NormalizedEvent::Control { action, at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_roundtrip() {
        let mut payload = encode_chat(1_700_000_000_000, 42, "@bob", "Bob", "hello there");
        let event = decode_chat(&mut payload, Utc::now()).unwrap();

        match event {
            NormalizedEvent::Comment { user, text, at } => {
                assert_eq!(user.handle.as_deref(), Some("@bob"));
                assert_eq!(user.external_id.as_deref(), Some("42"));
                assert_eq!(user.nickname.as_deref(), Some("Bob"));
                assert_eq!(text, "hello there");
                assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_gift_roundtrip() {
        let mut payload = encode_gift(1_700_000_000_500, 7, "@eve", "Eve", 900, "Rose", 5);
        let event = decode_gift(&mut payload, Utc::now()).unwrap();

        match event {
            NormalizedEvent::Gift {
                user,
                gift_id,
                gift_name,
                repeat_count,
                ..
            } => {
                assert_eq!(user.handle.as_deref(), Some("@eve"));
                assert_eq!(gift_id, 900);
                assert_eq!(gift_name, "Rose");
                assert_eq!(repeat_count, 5);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_viewers_roundtrip() {
        let mut payload = encode_viewers(1_700_000_001_000, 1234);
        let event = decode_viewers(&mut payload, Utc::now()).unwrap();

        assert!(matches!(
            event,
            NormalizedEvent::ViewerCount { count: 1234, .. }
        ));
    }

    #[test]
    fn test_product_roundtrip() {
        let mut payload = encode_product(0, 55, "Mug", "12.99", "https://img.example/mug.jpg");
        let fallback = Utc::now();
        let event = decode_product(&mut payload, fallback).unwrap();

        match event {
            NormalizedEvent::ProductShowcase {
                product_id,
                title,
                price,
                image_url,
                at,
            } => {
                assert_eq!(product_id, 55);
                assert_eq!(title, "Mug");
                assert_eq!(price, "12.99");
                assert_eq!(image_url, "https://img.example/mug.jpg");
                // No source timestamp: decode-time fallback applies.
                assert_eq!(at, fallback);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_control_stream_ended() {
        let mut payload = encode_control(1_700_000_002_000, CONTROL_ACTION_STREAM_ENDED);
        let event = decode_control(&mut payload, Utc::now()).unwrap();

        assert!(matches!(event, NormalizedEvent::StreamEnded { .. }));
    }

    #[test]
    fn test_control_other_action() {
        let mut payload = encode_control(1_700_000_002_000, 1);
        let event = decode_control(&mut payload, Utc::now()).unwrap();

        assert!(matches!(event, NormalizedEvent::Control { action: 1, .. }));
    }

    #[test]
    fn test_truncated_payload() {
        let payload = encode_like(1_700_000_000_000, 9, "@a", "A", 3);

        for cut in 0..payload.len() {
            let mut partial = payload.slice(0..cut);
            assert!(
                decode_like(&mut partial, Utc::now()).is_err(),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_follow_and_share_roundtrip() {
        let mut follow = encode_follow(1_700_000_003_000, 11, "@f", "F");
        let mut share = encode_share(1_700_000_003_000, 12, "@s", "S");

        assert!(matches!(
            decode_follow(&mut follow, Utc::now()).unwrap(),
            NormalizedEvent::Follow { .. }
        ));
        assert!(matches!(
            decode_share(&mut share, Utc::now()).unwrap(),
            NormalizedEvent::Share { .. }
        ));
    }
}
