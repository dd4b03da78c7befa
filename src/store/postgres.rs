//! Postgres store backend
//!
//! Expects the following schema (migrations are owned by the embedding
//! application):
//!
//! ```sql
//! CREATE TABLE broadcasts (
//!     room_id        TEXT PRIMARY KEY,
//!     host_handle    TEXT NOT NULL DEFAULT '',
//!     status         TEXT NOT NULL,
//!     started_at     TIMESTAMPTZ NOT NULL,
//!     ended_at       TIMESTAMPTZ,
//!     likes          BIGINT NOT NULL DEFAULT 0,
//!     comments       BIGINT NOT NULL DEFAULT 0,
//!     shares         BIGINT NOT NULL DEFAULT 0,
//!     follows        BIGINT NOT NULL DEFAULT 0,
//!     gifts          BIGINT NOT NULL DEFAULT 0,
//!     peak_viewers   BIGINT NOT NULL DEFAULT 0,
//!     report_sent_at TIMESTAMPTZ
//! );
//!
//! CREATE TABLE comments (
//!     id               BIGSERIAL PRIMARY KEY,
//!     room_id          TEXT NOT NULL REFERENCES broadcasts (room_id),
//!     user_external_id TEXT,
//!     handle           TEXT,
//!     nickname         TEXT,
//!     body             TEXT NOT NULL,
//!     commented_at     TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE showcased_products (
//!     room_id        TEXT NOT NULL REFERENCES broadcasts (room_id),
//!     product_id     BIGINT NOT NULL,
//!     title          TEXT NOT NULL,
//!     price          TEXT NOT NULL,
//!     image_url      TEXT NOT NULL,
//!     first_seen_at  TIMESTAMPTZ NOT NULL,
//!     showcase_count INTEGER NOT NULL DEFAULT 1,
//!     PRIMARY KEY (room_id, product_id)
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::StoreError;
use crate::model::{
    AggregateCounters, Broadcast, BroadcastStatus, Comment, ProductSighting, RoomId,
};

use super::Store;

/// Postgres-backed [`Store`] implementation
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_broadcast(&self, broadcast: Broadcast) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO broadcasts (room_id, host_handle, status, started_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (room_id) DO NOTHING",
        )
        .bind(broadcast.room_id.as_str())
        .bind(&broadcast.host_handle)
        .bind(broadcast.status.as_str())
        .bind(broadcast.started_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::BroadcastExists(broadcast.room_id.to_string()));
        }
        Ok(())
    }

    async fn update_aggregates(
        &self,
        room: &RoomId,
        counters: &AggregateCounters,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE broadcasts SET likes = $2, comments = $3, shares = $4, \
             follows = $5, gifts = $6, peak_viewers = $7 WHERE room_id = $1",
        )
        .bind(room.as_str())
        .bind(counters.likes)
        .bind(counters.comments)
        .bind(counters.shares)
        .bind(counters.follows)
        .bind(counters.gifts)
        .bind(counters.peak_viewers)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::BroadcastNotFound(room.to_string()));
        }
        Ok(())
    }

    async fn finalize_broadcast(
        &self,
        room: &RoomId,
        status: BroadcastStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE broadcasts SET status = $2, ended_at = $3 WHERE room_id = $1",
        )
        .bind(room.as_str())
        .bind(status.as_str())
        .bind(ended_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::BroadcastNotFound(room.to_string()));
        }
        Ok(())
    }

    async fn insert_comment(&self, comment: Comment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO comments (room_id, user_external_id, handle, nickname, body, commented_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(comment.room_id.as_str())
        .bind(&comment.user_external_id)
        .bind(&comment.handle)
        .bind(&comment.nickname)
        .bind(&comment.text)
        .bind(comment.commented_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_product(
        &self,
        room: &RoomId,
        sighting: ProductSighting,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO showcased_products \
             (room_id, product_id, title, price, image_url, first_seen_at, showcase_count) \
             VALUES ($1, $2, $3, $4, $5, $6, 1) \
             ON CONFLICT (room_id, product_id) DO UPDATE \
             SET showcase_count = showcased_products.showcase_count + 1",
        )
        .bind(room.as_str())
        .bind(sighting.product_id as i64)
        .bind(&sighting.title)
        .bind(&sighting.price)
        .bind(&sighting.image_url)
        .bind(sighting.seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn capturing_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT room_id FROM broadcasts WHERE status = 'capturing'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(RoomId::new).collect())
    }

    async fn get_broadcast(&self, room: &RoomId) -> Result<Option<Broadcast>, StoreError> {
        let row = sqlx::query(
            "SELECT room_id, host_handle, status, started_at, ended_at, likes, comments, \
             shares, follows, gifts, peak_viewers, report_sent_at \
             FROM broadcasts WHERE room_id = $1",
        )
        .bind(room.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_raw: String = row.try_get("status")?;
        let status = BroadcastStatus::parse(&status_raw).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown status '{}' for room {}", status_raw, room))
        })?;

        Ok(Some(Broadcast {
            room_id: RoomId::new(row.try_get::<String, _>("room_id")?),
            host_handle: row.try_get("host_handle")?,
            status,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            counters: AggregateCounters {
                likes: row.try_get("likes")?,
                comments: row.try_get("comments")?,
                shares: row.try_get("shares")?,
                follows: row.try_get("follows")?,
                gifts: row.try_get("gifts")?,
                peak_viewers: row.try_get("peak_viewers")?,
            },
            report_sent_at: row.try_get("report_sent_at")?,
        }))
    }
}
