//! Event dispatcher and worker registry
//!
//! Routes decoded events to per-broadcast capture workers. The registry is
//! the only shared mutable state on the event path: a room id maps to at
//! most one live [`WorkerHandle`], and registration is check-and-insert
//! under a single write lock, so concurrent event arrival can never spawn
//! two workers for one broadcast.
//!
//! Events for a room with no registered worker are only acted on when the
//! batch carries start evidence (an activity event); otherwise they are
//! post-termination stragglers and are dropped as orphan noise.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::capture::{CaptureWorker, ForwardError, WorkerHandle};
use crate::config::CaptureConfig;
use crate::model::RoomId;
use crate::protocol::NormalizedEvent;
use crate::reconcile::ActiveJobs;
use crate::store::Store;

/// Routes event batches to per-broadcast capture workers
pub struct Dispatcher {
    workers: RwLock<HashMap<RoomId, WorkerHandle>>,
    store: Arc<dyn Store>,
    config: CaptureConfig,
}

impl Dispatcher {
    /// Create a dispatcher backed by the given store
    pub fn new(store: Arc<dyn Store>, config: CaptureConfig) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            store,
            config,
        }
    }

    /// Dispatch a batch of events for one room
    ///
    /// Creates a worker when the room is unknown and the batch carries
    /// start evidence. Removes the mapping after forwarding a terminal
    /// event; the worker drains and finalizes independently.
    pub async fn dispatch(&self, room: &RoomId, host: Option<&str>, events: Vec<NormalizedEvent>) {
        if events.is_empty() {
            return;
        }
        let has_terminal = events.iter().any(NormalizedEvent::is_terminal);

        let mut workers = self.workers.write().await;

        if !workers.contains_key(room) {
            if events.iter().any(NormalizedEvent::is_start_evidence) {
                let handle = CaptureWorker::spawn(
                    room.clone(),
                    host.unwrap_or_default(),
                    Arc::clone(&self.store),
                    &self.config,
                );
                workers.insert(room.clone(), handle);
                tracing::info!(room = %room, "Worker registered (new broadcast)");
            } else {
                tracing::debug!(
                    room = %room,
                    count = events.len(),
                    "Dropping orphan events (no worker, no start evidence)"
                );
                return;
            }
        }

        // The entry exists here by construction.
        if let Some(handle) = workers.get(room) {
            match handle.forward(events) {
                Ok(()) => {}
                Err(ForwardError::Closed) => {
                    workers.remove(room);
                    tracing::debug!(room = %room, "Worker finished, mapping removed");
                    return;
                }
                Err(ForwardError::Full) => {
                    tracing::warn!(room = %room, "Worker channel full, batch dropped");
                }
            }
        }

        if has_terminal {
            workers.remove(room);
            tracing::info!(room = %room, "Terminal event forwarded, mapping removed");
        }
    }

    /// Number of registered workers
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Stop every registered worker and wait for them to finalize
    pub async fn shutdown(&self) {
        let handles: Vec<(RoomId, WorkerHandle)> =
            self.workers.write().await.drain().collect();
        for (room, handle) in handles {
            let state = handle.stop().await;
            tracing::info!(room = %room, state = ?state, "Worker stopped");
        }
    }
}

#[async_trait]
impl ActiveJobs for Dispatcher {
    /// Rooms with a live worker
    ///
    /// A worker that already finished (its task returned, e.g. after
    /// persistence failures) is not active even while its mapping awaits
    /// cleanup, so the reconciler can still repair its broadcast.
    async fn active_rooms(&self) -> HashSet<RoomId> {
        self.workers
            .read()
            .await
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(room, _)| room.clone())
            .collect()
    }
}
