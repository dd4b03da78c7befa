//! In-memory store backend
//!
//! Keeps everything in maps behind async locks. Used by the test suite and
//! by local runs that do not need durability. Supports fault injection so
//! worker failure paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{
    AggregateCounters, Broadcast, BroadcastStatus, Comment, ProductSighting, RoomId,
    ShowcasedProduct,
};

use super::Store;

/// In-memory [`Store`] implementation
#[derive(Default)]
pub struct MemoryStore {
    broadcasts: RwLock<HashMap<RoomId, Broadcast>>,
    comments: RwLock<Vec<Comment>>,
    products: RwLock<HashMap<(RoomId, u64), ShowcasedProduct>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle write fault injection
    ///
    /// While enabled, every write returns [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    /// All comments recorded for a room, in insertion order
    pub async fn comments_for(&self, room: &RoomId) -> Vec<Comment> {
        self.comments
            .read()
            .await
            .iter()
            .filter(|c| &c.room_id == room)
            .cloned()
            .collect()
    }

    /// All showcased products recorded for a room
    pub async fn products_for(&self, room: &RoomId) -> Vec<ShowcasedProduct> {
        let mut products: Vec<ShowcasedProduct> = self
            .products
            .read()
            .await
            .values()
            .filter(|p| &p.room_id == room)
            .cloned()
            .collect();
        products.sort_by_key(|p| p.product_id);
        products
    }

    /// Number of broadcast rows
    pub async fn broadcast_count(&self) -> usize {
        self.broadcasts.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_broadcast(&self, broadcast: Broadcast) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut broadcasts = self.broadcasts.write().await;
        if broadcasts.contains_key(&broadcast.room_id) {
            return Err(StoreError::BroadcastExists(broadcast.room_id.to_string()));
        }
        broadcasts.insert(broadcast.room_id.clone(), broadcast);
        Ok(())
    }

    async fn update_aggregates(
        &self,
        room: &RoomId,
        counters: &AggregateCounters,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut broadcasts = self.broadcasts.write().await;
        let broadcast = broadcasts
            .get_mut(room)
            .ok_or_else(|| StoreError::BroadcastNotFound(room.to_string()))?;
        broadcast.counters = *counters;
        Ok(())
    }

    async fn finalize_broadcast(
        &self,
        room: &RoomId,
        status: BroadcastStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut broadcasts = self.broadcasts.write().await;
        let broadcast = broadcasts
            .get_mut(room)
            .ok_or_else(|| StoreError::BroadcastNotFound(room.to_string()))?;
        broadcast.status = status;
        broadcast.ended_at = Some(ended_at);
        Ok(())
    }

    async fn insert_comment(&self, comment: Comment) -> Result<(), StoreError> {
        self.check_writable()?;
        self.comments.write().await.push(comment);
        Ok(())
    }

    async fn upsert_product(
        &self,
        room: &RoomId,
        sighting: ProductSighting,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut products = self.products.write().await;
        let key = (room.clone(), sighting.product_id);
        match products.get_mut(&key) {
            Some(existing) => {
                existing.showcase_count += 1;
            }
            None => {
                products.insert(
                    key,
                    ShowcasedProduct {
                        room_id: room.clone(),
                        product_id: sighting.product_id,
                        title: sighting.title,
                        price: sighting.price,
                        image_url: sighting.image_url,
                        first_seen_at: sighting.seen_at,
                        showcase_count: 1,
                    },
                );
            }
        }
        Ok(())
    }

    async fn capturing_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        Ok(self
            .broadcasts
            .read()
            .await
            .values()
            .filter(|b| b.status == BroadcastStatus::Capturing)
            .map(|b| b.room_id.clone())
            .collect())
    }

    async fn get_broadcast(&self, room: &RoomId) -> Result<Option<Broadcast>, StoreError> {
        Ok(self.broadcasts.read().await.get(room).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(product_id: u64) -> ProductSighting {
        ProductSighting {
            product_id,
            title: "Mug".to_string(),
            price: "12.99".to_string(),
            image_url: "https://img.example/mug.jpg".to_string(),
            seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_finalize() {
        let store = MemoryStore::new();
        let room = RoomId::new("room_1");

        store
            .insert_broadcast(Broadcast::begin(room.clone(), "@host", Utc::now()))
            .await
            .unwrap();
        assert_eq!(store.capturing_rooms().await.unwrap(), vec![room.clone()]);

        let ended_at = Utc::now();
        store
            .finalize_broadcast(&room, BroadcastStatus::Ended, ended_at)
            .await
            .unwrap();

        let broadcast = store.get_broadcast(&room).await.unwrap().unwrap();
        assert_eq!(broadcast.status, BroadcastStatus::Ended);
        assert_eq!(broadcast.ended_at, Some(ended_at));
        assert!(store.capturing_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_rejected() {
        let store = MemoryStore::new();
        let room = RoomId::new("room_1");

        store
            .insert_broadcast(Broadcast::begin(room.clone(), "@host", Utc::now()))
            .await
            .unwrap();
        let result = store
            .insert_broadcast(Broadcast::begin(room, "@host", Utc::now()))
            .await;

        assert!(matches!(result, Err(StoreError::BroadcastExists(_))));
    }

    #[tokio::test]
    async fn test_product_upsert_increments() {
        let store = MemoryStore::new();
        let room = RoomId::new("room_1");

        store.upsert_product(&room, sighting(55)).await.unwrap();
        store.upsert_product(&room, sighting(55)).await.unwrap();
        store.upsert_product(&room, sighting(56)).await.unwrap();

        let products = store.products_for(&room).await;
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].product_id, 55);
        assert_eq!(products[0].showcase_count, 2);
        assert_eq!(products[1].showcase_count, 1);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryStore::new();
        let room = RoomId::new("room_1");

        store.fail_writes(true);
        let result = store
            .insert_broadcast(Broadcast::begin(room.clone(), "@host", Utc::now()))
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable)));

        store.fail_writes(false);
        store
            .insert_broadcast(Broadcast::begin(room, "@host", Utc::now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_aggregates_requires_row() {
        let store = MemoryStore::new();
        let room = RoomId::new("missing");
        let counters = AggregateCounters::default();

        let result = store.update_aggregates(&room, &counters).await;
        assert!(matches!(result, Err(StoreError::BroadcastNotFound(_))));
    }
}
