//! Per-broadcast capture worker
//!
//! Each active broadcast is owned by exactly one worker task, fed through
//! an mpsc channel by the dispatcher. The worker is the only writer for its
//! broadcast's rows, so persistence never races within one broadcast while
//! different broadcasts write concurrently.
//!
//! Lifecycle: `capturing` (initial) → `ended` | `failed` (terminal). The
//! worker never retries a transition; transient persistence failures are
//! the surrounding job layer's concern, and the worker only gives up
//! (→ `failed`) after its consecutive-failure budget is spent.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::CaptureConfig;
use crate::error::StoreError;
use crate::model::{Broadcast, BroadcastStatus, Comment, ProductSighting, RoomId};
use crate::protocol::NormalizedEvent;
use crate::store::Store;

use super::aggregates::Aggregates;

/// Lifecycle state of a capture worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Accepting events and persisting
    Capturing,
    /// Stream ended normally
    Ended,
    /// Gave up after unrecoverable persistence errors
    Failed,
}

impl CaptureState {
    /// The persisted status corresponding to this state
    pub fn status(self) -> BroadcastStatus {
        match self {
            CaptureState::Capturing => BroadcastStatus::Capturing,
            CaptureState::Ended => BroadcastStatus::Ended,
            CaptureState::Failed => BroadcastStatus::Failed,
        }
    }
}

/// Messages accepted by a worker
#[derive(Debug)]
pub enum WorkerMessage {
    /// A batch of events for this worker's broadcast
    Events(Vec<NormalizedEvent>),
    /// External stop signal; the worker finalizes as `ended`
    Stop,
}

/// Reason a forward to a worker did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    /// The worker finished (or failed) and its channel is closed
    Closed,
    /// The worker's channel is full; the batch was dropped
    Full,
}

/// Handle to a running capture worker
#[derive(Debug)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
    join: JoinHandle<CaptureState>,
}

impl WorkerHandle {
    /// Forward a batch of events without blocking
    pub fn forward(&self, events: Vec<NormalizedEvent>) -> Result<(), ForwardError> {
        self.tx
            .try_send(WorkerMessage::Events(events))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Closed(_) => ForwardError::Closed,
                mpsc::error::TrySendError::Full(_) => ForwardError::Full,
            })
    }

    /// Signal an external stop and wait for the worker to finish
    pub async fn stop(self) -> CaptureState {
        let _ = self.tx.send(WorkerMessage::Stop).await;
        self.join.await.unwrap_or(CaptureState::Failed)
    }

    /// Whether the worker task has returned
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// The worker task's state
pub struct CaptureWorker {
    room: RoomId,
    host_handle: String,
    store: Arc<dyn Store>,
    aggregates: Aggregates,
    state: CaptureState,
    write_failures: u32,
    max_write_failures: u32,
    flush_interval: std::time::Duration,
}

impl CaptureWorker {
    /// Spawn a worker for a broadcast, creating its persisted row
    pub fn spawn(
        room: RoomId,
        host_handle: impl Into<String>,
        store: Arc<dyn Store>,
        config: &CaptureConfig,
    ) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(config.worker_channel_capacity);
        let worker = Self {
            room,
            host_handle: host_handle.into(),
            store,
            aggregates: Aggregates::new(),
            state: CaptureState::Capturing,
            write_failures: 0,
            max_write_failures: config.max_write_failures,
            flush_interval: config.flush_interval,
        };
        let join = tokio::spawn(worker.run(rx));
        WorkerHandle { tx, join }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) -> CaptureState {
        let started_at = Utc::now();
        let broadcast = Broadcast::begin(self.room.clone(), self.host_handle.clone(), started_at);
        match self.store.insert_broadcast(broadcast).await {
            Ok(()) => {
                tracing::info!(room = %self.room, host = %self.host_handle, "Capture started");
            }
            Err(StoreError::BroadcastExists(_)) => {
                // A capturing row survived a crash for this room; keep
                // writing into it rather than failing the fresh worker.
                // Counters continue from the row so a flush never zeroes
                // what was already persisted.
                tracing::warn!(room = %self.room, "Resuming capture into existing broadcast row");
                match self.store.get_broadcast(&self.room).await {
                    Ok(Some(existing)) => {
                        self.aggregates = Aggregates::resume(existing.counters);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            room = %self.room,
                            error = %e,
                            "Could not recover existing counters"
                        );
                    }
                }
            }
            Err(e) => self.note_write_failure(e, "insert broadcast").await,
        }

        let mut flush = tokio::time::interval(self.flush_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        flush.tick().await; // the first tick fires immediately

        while self.state == CaptureState::Capturing {
            tokio::select! {
                _ = flush.tick() => {
                    self.flush().await;
                }
                msg = rx.recv() => match msg {
                    Some(WorkerMessage::Events(events)) => {
                        for event in events {
                            self.handle_event(event).await;
                            if self.state != CaptureState::Capturing {
                                break;
                            }
                        }
                    }
                    Some(WorkerMessage::Stop) | None => {
                        self.finish(CaptureState::Ended).await;
                    }
                },
            }
        }

        self.state
    }

    async fn handle_event(&mut self, event: NormalizedEvent) {
        match &event {
            NormalizedEvent::Comment { user, text, at } => {
                self.aggregates.apply(&event);
                let comment = Comment {
                    room_id: self.room.clone(),
                    user_external_id: user.external_id.clone(),
                    handle: user.handle.clone(),
                    nickname: user.nickname.clone(),
                    text: text.clone(),
                    commented_at: *at,
                };
                let result = self.store.insert_comment(comment).await;
                self.note_write_result(result, "insert comment").await;
            }
            NormalizedEvent::ProductShowcase {
                product_id,
                title,
                price,
                image_url,
                at,
            } => {
                let sighting = ProductSighting {
                    product_id: *product_id,
                    title: title.clone(),
                    price: price.clone(),
                    image_url: image_url.clone(),
                    seen_at: *at,
                };
                let result = self.store.upsert_product(&self.room, sighting).await;
                self.note_write_result(result, "upsert product").await;
            }
            NormalizedEvent::StreamEnded { .. } => {
                self.finish(CaptureState::Ended).await;
            }
            NormalizedEvent::Control { action, .. } => {
                tracing::debug!(room = %self.room, action, "Ignoring control action");
            }
            NormalizedEvent::Unrecognized { tag, .. } => {
                tracing::debug!(room = %self.room, tag = %tag, "Ignoring unrecognized event");
            }
            _ => {
                // Gift, like, join, viewer count, follow, share only touch
                // the rolling aggregates.
                self.aggregates.apply(&event);
            }
        }
    }

    async fn flush(&mut self) {
        if !self.aggregates.is_dirty() {
            return;
        }
        let counters = self.aggregates.snapshot();
        let result = self.store.update_aggregates(&self.room, &counters).await;
        if result.is_ok() {
            self.aggregates.mark_flushed();
            tracing::debug!(room = %self.room, "Flushed aggregates");
        }
        self.note_write_result(result, "flush aggregates").await;
    }

    async fn note_write_result(&mut self, result: Result<(), StoreError>, what: &'static str) {
        match result {
            Ok(()) => self.write_failures = 0,
            Err(e) => self.note_write_failure(e, what).await,
        }
    }

    async fn note_write_failure(&mut self, error: StoreError, what: &'static str) {
        self.write_failures += 1;
        tracing::warn!(
            room = %self.room,
            error = %error,
            failures = self.write_failures,
            "Persistence write failed: {}",
            what
        );
        if self.write_failures >= self.max_write_failures {
            self.finish(CaptureState::Failed).await;
        }
    }

    /// Transition to a terminal state and finalize the persisted row
    ///
    /// Idempotent: only the first transition takes effect.
    async fn finish(&mut self, state: CaptureState) {
        if self.state != CaptureState::Capturing || state == CaptureState::Capturing {
            return;
        }
        self.state = state;

        let counters = self.aggregates.snapshot();
        if let Err(e) = self.store.update_aggregates(&self.room, &counters).await {
            tracing::warn!(room = %self.room, error = %e, "Final aggregate flush failed");
        }

        let ended_at = Utc::now();
        match self
            .store
            .finalize_broadcast(&self.room, state.status(), ended_at)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    room = %self.room,
                    status = %state.status(),
                    comments = counters.comments,
                    likes = counters.likes,
                    peak_viewers = counters.peak_viewers,
                    "Capture finished"
                );
            }
            Err(e) => {
                tracing::error!(room = %self.room, error = %e, "Failed to finalize broadcast");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UserRef;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn test_config() -> CaptureConfig {
        CaptureConfig::default()
            .flush_interval(std::time::Duration::from_millis(20))
            .max_write_failures(3)
    }

    fn user(handle: &str) -> UserRef {
        UserRef::resolve(1, handle, "Name")
    }

    fn comment(text: &str) -> NormalizedEvent {
        NormalizedEvent::Comment {
            user: user("@u"),
            text: text.into(),
            at: Utc::now(),
        }
    }

    fn product(product_id: u64) -> NormalizedEvent {
        NormalizedEvent::ProductShowcase {
            product_id,
            title: "Mug".into(),
            price: "9.99".into(),
            image_url: "https://img.example/mug.jpg".into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_capture_and_stop() {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::new("room_1");
        let handle = CaptureWorker::spawn(room.clone(), "@host", store.clone(), &test_config());

        handle
            .forward(vec![
                comment("first"),
                NormalizedEvent::Like {
                    user: user("@u"),
                    count: 5,
                    at: Utc::now(),
                },
                NormalizedEvent::ViewerCount {
                    count: 120,
                    at: Utc::now(),
                },
                comment("second"),
            ])
            .unwrap();

        let state = handle.stop().await;
        assert_eq!(state, CaptureState::Ended);

        let broadcast = store.get_broadcast(&room).await.unwrap().unwrap();
        assert_eq!(broadcast.status, BroadcastStatus::Ended);
        assert!(broadcast.ended_at.is_some());
        assert_eq!(broadcast.counters.comments, 2);
        assert_eq!(broadcast.counters.likes, 5);
        assert_eq!(broadcast.counters.peak_viewers, 120);

        let comments = store.comments_for(&room).await;
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "first");
        assert_eq!(comments[0].handle.as_deref(), Some("@u"));
    }

    #[tokio::test]
    async fn test_stream_ended_event_finalizes() {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::new("room_2");
        let handle = CaptureWorker::spawn(room.clone(), "@host", store.clone(), &test_config());

        handle
            .forward(vec![
                comment("bye"),
                NormalizedEvent::StreamEnded { at: Utc::now() },
            ])
            .unwrap();

        let state = handle.stop().await;
        assert_eq!(state, CaptureState::Ended);

        let broadcast = store.get_broadcast(&room).await.unwrap().unwrap();
        assert_eq!(broadcast.status, BroadcastStatus::Ended);
        assert!(broadcast.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_showcase_dedup() {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::new("room_3");
        let handle = CaptureWorker::spawn(room.clone(), "@host", store.clone(), &test_config());

        handle.forward(vec![product(55), product(55)]).unwrap();
        handle.stop().await;

        let products = store.products_for(&room).await;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].product_id, 55);
        assert_eq!(products[0].showcase_count, 2);
    }

    #[tokio::test]
    async fn test_resume_preserves_persisted_counters() {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::new("room_6");

        // A capturing row from a previous process generation.
        store
            .insert_broadcast(Broadcast::begin(room.clone(), "@host", Utc::now()))
            .await
            .unwrap();
        let seeded = crate::model::AggregateCounters {
            comments: 500,
            likes: 500,
            peak_viewers: 900,
            ..Default::default()
        };
        store.update_aggregates(&room, &seeded).await.unwrap();

        let handle = CaptureWorker::spawn(room.clone(), "@host", store.clone(), &test_config());
        handle.forward(vec![comment("back online")]).unwrap();
        handle.stop().await;

        let broadcast = store.get_broadcast(&room).await.unwrap().unwrap();
        assert_eq!(broadcast.counters.comments, 501);
        assert_eq!(broadcast.counters.likes, 500);
        assert_eq!(broadcast.counters.peak_viewers, 900);
    }

    #[tokio::test]
    async fn test_repeated_write_failures_fail_the_worker() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(true);
        let room = RoomId::new("room_4");
        let handle = CaptureWorker::spawn(room.clone(), "@host", store.clone(), &test_config());

        // Budget is 3; the failed broadcast insert already burned one.
        handle.forward(vec![comment("a"), comment("b")]).unwrap();

        let state = handle.stop().await;
        assert_eq!(state, CaptureState::Failed);
    }

    #[tokio::test]
    async fn test_events_after_terminal_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::new("room_5");
        let handle = CaptureWorker::spawn(room.clone(), "@host", store.clone(), &test_config());

        handle
            .forward(vec![
                NormalizedEvent::StreamEnded { at: Utc::now() },
                comment("too late"),
            ])
            .unwrap();
        handle.stop().await;

        assert!(store.comments_for(&room).await.is_empty());
    }
}
