//! Envelope decoder
//!
//! Pure function from an encoded envelope to an ordered list of normalized
//! events. Each sub-message is decoded independently against the closed set
//! of known type tags; one malformed or unknown message never discards its
//! siblings and never fails the batch. Only an unparsable outer structure is
//! an [`EnvelopeError`].

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{DecodeError, EnvelopeError};

use super::event::NormalizedEvent;
use super::payload;
use super::wire::Envelope;

/// Result of decoding one envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEnvelope {
    /// Successfully decoded events, in sub-message order
    pub events: Vec<NormalizedEvent>,
    /// Cursor token to acknowledge back to the relay
    pub cursor: Option<String>,
    /// Relay-requested ack cadence
    pub heartbeat: Option<Duration>,
    /// Sub-messages dropped as malformed or unknown
    pub dropped: usize,
}

/// Decode an envelope into normalized events
///
/// Per-message fault isolation: unknown tags and malformed payloads are
/// dropped with a diagnostic, decoding continues with the remaining
/// sub-messages, and the ordering of the survivors matches the input. No
/// deduplication happens at this layer. Session keepalive metadata (cursor
/// token and heartbeat interval) is surfaced for the connection layer's ack
/// duty.
pub fn decode(payload: Bytes) -> Result<DecodedEnvelope, EnvelopeError> {
    let mut buf = payload;
    let envelope = Envelope::decode(&mut buf)?;
    let decoded_at = Utc::now();

    let mut events = Vec::with_capacity(envelope.messages.len());
    let mut dropped = 0usize;

    for msg in &envelope.messages {
        let mut body = msg.payload.clone();
        match decode_message(&msg.tag, &mut body, decoded_at) {
            Some(Ok(event)) => events.push(event),
            Some(Err(e)) => {
                dropped += 1;
                tracing::warn!(tag = %msg.tag, error = %e, "Dropping malformed sub-message");
            }
            None => {
                dropped += 1;
                tracing::debug!(tag = %msg.tag, "Dropping sub-message with unknown tag");
            }
        }
    }

    let cursor = (!envelope.cursor.is_empty()).then(|| envelope.cursor.clone());
    let heartbeat = (envelope.heartbeat_ms > 0)
        .then(|| Duration::from_millis(u64::from(envelope.heartbeat_ms)));

    Ok(DecodedEnvelope {
        events,
        cursor,
        heartbeat,
        dropped,
    })
}

/// Dispatch one sub-message to its tag's decode function
///
/// `None` means the tag is not in the known set.
fn decode_message(
    tag: &str,
    body: &mut Bytes,
    fallback: DateTime<Utc>,
) -> Option<Result<NormalizedEvent, DecodeError>> {
    match tag {
        payload::TAG_CHAT => Some(payload::decode_chat(body, fallback)),
        payload::TAG_GIFT => Some(payload::decode_gift(body, fallback)),
        payload::TAG_LIKE => Some(payload::decode_like(body, fallback)),
        payload::TAG_JOIN => Some(payload::decode_join(body, fallback)),
        payload::TAG_VIEWERS => Some(payload::decode_viewers(body, fallback)),
        payload::TAG_FOLLOW => Some(payload::decode_follow(body, fallback)),
        payload::TAG_SHARE => Some(payload::decode_share(body, fallback)),
        payload::TAG_PRODUCT => Some(payload::decode_product(body, fallback)),
        payload::TAG_CONTROL => Some(payload::decode_control(body, fallback)),
        _ => None,
    }
}
