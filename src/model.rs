//! Persisted records for captured broadcasts
//!
//! A `Broadcast` row is created when a capture worker spawns and finalized
//! exactly once when the worker reaches a terminal state (or when the
//! reconciler repairs an orphan). `Comment` rows are immutable once written.
//! `ShowcasedProduct` rows are unique per (broadcast, product id); repeat
//! sightings increment `showcase_count` instead of inserting a new row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External identifier of a broadcast room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Create a new room id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    /// A live worker owns this broadcast and is persisting events
    Capturing,
    /// The stream ended normally
    Ended,
    /// The worker gave up after unrecoverable errors
    Failed,
}

impl BroadcastStatus {
    /// Whether this status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, BroadcastStatus::Ended | BroadcastStatus::Failed)
    }

    /// Stable string form, as stored in the database
    pub fn as_str(self) -> &'static str {
        match self {
            BroadcastStatus::Capturing => "capturing",
            BroadcastStatus::Ended => "ended",
            BroadcastStatus::Failed => "failed",
        }
    }

    /// Parse the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capturing" => Some(BroadcastStatus::Capturing),
            "ended" => Some(BroadcastStatus::Ended),
            "failed" => Some(BroadcastStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flushed aggregate counters for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounters {
    /// Total likes
    pub likes: i64,
    /// Total comments
    pub comments: i64,
    /// Total shares
    pub shares: i64,
    /// Total new follows
    pub follows: i64,
    /// Total gifts (repeat counts included)
    pub gifts: i64,
    /// Highest observed concurrent viewer count
    pub peak_viewers: i64,
}

/// One captured broadcast
///
/// Invariant: `ended_at` is set iff `status` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    /// External room id
    pub room_id: RoomId,
    /// External handle of the broadcaster (may be empty if unknown)
    pub host_handle: String,
    /// Lifecycle status
    pub status: BroadcastStatus,
    /// When capture started
    pub started_at: DateTime<Utc>,
    /// When the broadcast reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
    /// Aggregate counters, flushed periodically and on finalization
    pub counters: AggregateCounters,
    /// When the post-broadcast report was sent (owned by the reporting layer)
    pub report_sent_at: Option<DateTime<Utc>>,
}

impl Broadcast {
    /// Create a broadcast row in the capturing state
    pub fn begin(room_id: RoomId, host_handle: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            room_id,
            host_handle: host_handle.into(),
            status: BroadcastStatus::Capturing,
            started_at,
            ended_at: None,
            counters: AggregateCounters::default(),
            report_sent_at: None,
        }
    }
}

/// One viewer comment, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Owning broadcast
    pub room_id: RoomId,
    /// External user id, when the relay supplied one
    pub user_external_id: Option<String>,
    /// Resolved handle (stable handle, else display id)
    pub handle: Option<String>,
    /// Display nickname
    pub nickname: Option<String>,
    /// Comment text
    pub text: String,
    /// When the comment was made
    pub commented_at: DateTime<Utc>,
}

/// One product showcased during a broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowcasedProduct {
    /// Owning broadcast
    pub room_id: RoomId,
    /// External product id, unique within the broadcast
    pub product_id: u64,
    /// Product title
    pub title: String,
    /// Display price as supplied by the relay
    pub price: String,
    /// Product image URL
    pub image_url: String,
    /// First time this product was seen in the broadcast
    pub first_seen_at: DateTime<Utc>,
    /// Number of times the product was showcased (>= 1)
    pub showcase_count: u32,
}

/// One observed product showcase, fed to the store's upsert
#[derive(Debug, Clone)]
pub struct ProductSighting {
    /// External product id
    pub product_id: u64,
    /// Product title
    pub title: String,
    /// Display price
    pub price: String,
    /// Product image URL
    pub image_url: String,
    /// When the showcase was observed
    pub seen_at: DateTime<Utc>,
}
