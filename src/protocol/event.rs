//! Normalized event types
//!
//! Transient output of the protocol decoder. Events are never persisted as
//! such; capture workers turn them into rows and counters.

use chrono::{DateTime, TimeZone, Utc};

/// Resolved identity of the user behind an event
///
/// The relay does not always supply every field, so resolution follows a
/// fallback chain: prefer the stable unique handle, else the display id,
/// else nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRef {
    /// External numeric user id, stringified (None if the relay sent 0)
    pub external_id: Option<String>,
    /// Resolved handle: stable handle, else the display id, else None
    pub handle: Option<String>,
    /// Display nickname
    pub nickname: Option<String>,
}

impl UserRef {
    /// Resolve an identity from raw wire fields
    ///
    /// `user_id == 0` and empty strings mean "absent".
    pub fn resolve(user_id: u64, handle: &str, nickname: &str) -> Self {
        let external_id = (user_id != 0).then(|| user_id.to_string());
        let handle = if !handle.is_empty() {
            Some(handle.to_string())
        } else {
            external_id.clone()
        };
        let nickname = (!nickname.is_empty()).then(|| nickname.to_string());

        Self {
            external_id,
            handle,
            nickname,
        }
    }

    /// Whether any identity could be resolved
    pub fn is_anonymous(&self) -> bool {
        self.handle.is_none() && self.external_id.is_none()
    }
}

/// One normalized event decoded from a relay envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    /// A viewer comment
    Comment {
        /// Commenting user
        user: UserRef,
        /// Comment text
        text: String,
        /// Event time
        at: DateTime<Utc>,
    },
    /// A gift sent to the broadcaster
    Gift {
        /// Gifting user
        user: UserRef,
        /// External gift id
        gift_id: u64,
        /// Gift display name
        gift_name: String,
        /// Repeat count within the gift combo (>= 1)
        repeat_count: u32,
        /// Event time
        at: DateTime<Utc>,
    },
    /// One or more likes
    Like {
        /// Liking user
        user: UserRef,
        /// Number of likes in this event
        count: u32,
        /// Event time
        at: DateTime<Utc>,
    },
    /// A viewer joined the room
    Join {
        /// Joining user
        user: UserRef,
        /// Event time
        at: DateTime<Utc>,
    },
    /// Current concurrent viewer count
    ViewerCount {
        /// Viewers in the room right now
        count: u64,
        /// Event time
        at: DateTime<Utc>,
    },
    /// A viewer followed the broadcaster
    Follow {
        /// Following user
        user: UserRef,
        /// Event time
        at: DateTime<Utc>,
    },
    /// A viewer shared the broadcast
    Share {
        /// Sharing user
        user: UserRef,
        /// Event time
        at: DateTime<Utc>,
    },
    /// A product was showcased
    ProductShowcase {
        /// External product id
        product_id: u64,
        /// Product title
        title: String,
        /// Display price
        price: String,
        /// Product image URL
        image_url: String,
        /// Event time
        at: DateTime<Utc>,
    },
    /// The stream ended (control action)
    StreamEnded {
        /// Event time
        at: DateTime<Utc>,
    },
    /// A control action other than stream end
    Control {
        /// Raw action code
        action: u32,
        /// Event time
        at: DateTime<Utc>,
    },
    /// A message the decoder could not classify
    Unrecognized {
        /// The unknown type tag
        tag: String,
        /// Event time
        at: DateTime<Utc>,
    },
}

impl NormalizedEvent {
    /// Event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            NormalizedEvent::Comment { at, .. }
            | NormalizedEvent::Gift { at, .. }
            | NormalizedEvent::Like { at, .. }
            | NormalizedEvent::Join { at, .. }
            | NormalizedEvent::ViewerCount { at, .. }
            | NormalizedEvent::Follow { at, .. }
            | NormalizedEvent::Share { at, .. }
            | NormalizedEvent::ProductShowcase { at, .. }
            | NormalizedEvent::StreamEnded { at }
            | NormalizedEvent::Control { at, .. }
            | NormalizedEvent::Unrecognized { at, .. } => *at,
        }
    }

    /// Whether this event is evidence that the broadcast is live
    ///
    /// Activity events justify spawning a capture worker for an unknown
    /// room. Terminal, control and unrecognized events do not: without a
    /// registered worker they are post-termination stragglers.
    pub fn is_start_evidence(&self) -> bool {
        !matches!(
            self,
            NormalizedEvent::StreamEnded { .. }
                | NormalizedEvent::Control { .. }
                | NormalizedEvent::Unrecognized { .. }
        )
    }

    /// Whether this event terminates the broadcast
    pub fn is_terminal(&self) -> bool {
        matches!(self, NormalizedEvent::StreamEnded { .. })
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedEvent::Comment { .. } => "comment",
            NormalizedEvent::Gift { .. } => "gift",
            NormalizedEvent::Like { .. } => "like",
            NormalizedEvent::Join { .. } => "join",
            NormalizedEvent::ViewerCount { .. } => "viewer_count",
            NormalizedEvent::Follow { .. } => "follow",
            NormalizedEvent::Share { .. } => "share",
            NormalizedEvent::ProductShowcase { .. } => "product_showcase",
            NormalizedEvent::StreamEnded { .. } => "stream_ended",
            NormalizedEvent::Control { .. } => "control",
            NormalizedEvent::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Resolve an event timestamp from a source-supplied value
///
/// The source timestamp is used when it is a plausible positive millisecond
/// value; otherwise the decode-time fallback applies. The result is never
/// absent.
pub fn event_time(source_ms: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    if source_ms > 0 {
        if let Some(ts) = Utc.timestamp_millis_opt(source_ms).single() {
            return ts;
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_resolution_prefers_handle() {
        let user = UserRef::resolve(77, "@alice", "Alice");

        assert_eq!(user.handle.as_deref(), Some("@alice"));
        assert_eq!(user.external_id.as_deref(), Some("77"));
        assert_eq!(user.nickname.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_user_resolution_falls_back_to_id() {
        let user = UserRef::resolve(77, "", "Alice");

        assert_eq!(user.handle.as_deref(), Some("77"));
        assert_eq!(user.external_id.as_deref(), Some("77"));
    }

    #[test]
    fn test_user_resolution_anonymous() {
        let user = UserRef::resolve(0, "", "");

        assert!(user.is_anonymous());
        assert!(user.handle.is_none());
        assert!(user.nickname.is_none());
    }

    #[test]
    fn test_event_time_source() {
        let fallback = Utc::now();
        let ts = event_time(1_700_000_000_000, fallback);

        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_event_time_fallback() {
        let fallback = Utc::now();

        assert_eq!(event_time(0, fallback), fallback);
        assert_eq!(event_time(-5, fallback), fallback);
    }

    #[test]
    fn test_start_evidence() {
        let at = Utc::now();
        let comment = NormalizedEvent::Comment {
            user: UserRef::default(),
            text: "hi".into(),
            at,
        };
        let ended = NormalizedEvent::StreamEnded { at };
        let control = NormalizedEvent::Control { action: 9, at };
        let unknown = NormalizedEvent::Unrecognized {
            tag: "x".into(),
            at,
        };

        assert!(comment.is_start_evidence());
        assert!(!ended.is_start_evidence());
        assert!(!control.is_start_evidence());
        assert!(!unknown.is_start_evidence());

        assert!(ended.is_terminal());
        assert!(!control.is_terminal());
        assert!(!comment.is_terminal());
    }
}
