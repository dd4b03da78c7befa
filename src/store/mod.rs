//! Persistence seam
//!
//! Capture workers and the reconciler talk to storage through the [`Store`]
//! trait. Two backends are provided: an in-memory store (tests, local runs)
//! and a Postgres store. Each worker serializes its own writes, so backends
//! only need to be safe across broadcasts, not within one.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{AggregateCounters, Broadcast, BroadcastStatus, Comment, ProductSighting, RoomId};

/// Storage operations needed by the capture core
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new broadcast row
    ///
    /// Fails with [`StoreError::BroadcastExists`] if a row for the room is
    /// already present, which protects the one-worker-per-broadcast
    /// invariant at the persistence layer too.
    async fn insert_broadcast(&self, broadcast: Broadcast) -> Result<(), StoreError>;

    /// Flush aggregate counters for a capturing broadcast
    async fn update_aggregates(
        &self,
        room: &RoomId,
        counters: &AggregateCounters,
    ) -> Result<(), StoreError>;

    /// Move a broadcast to a terminal status and set `ended_at`
    async fn finalize_broadcast(
        &self,
        room: &RoomId,
        status: BroadcastStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Insert one comment row
    async fn insert_comment(&self, comment: Comment) -> Result<(), StoreError>;

    /// Record a product showcase
    ///
    /// First sighting inserts a row with `showcase_count = 1`; a repeat
    /// sighting of the same (room, product id) increments the counter
    /// instead of inserting.
    async fn upsert_product(&self, room: &RoomId, sighting: ProductSighting)
        -> Result<(), StoreError>;

    /// Rooms whose persisted status is still `capturing`
    ///
    /// This is the reconciler's candidate set.
    async fn capturing_rooms(&self) -> Result<Vec<RoomId>, StoreError>;

    /// Fetch a broadcast row
    async fn get_broadcast(&self, room: &RoomId) -> Result<Option<Broadcast>, StoreError>;
}

pub use memory::MemoryStore;
pub use postgres::PgStore;
