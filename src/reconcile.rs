//! Startup reconciliation
//!
//! A crash can leave broadcasts persisted as `capturing` with no live
//! worker behind them. The reconciler runs once at startup, compares the
//! store's capturing set against the scheduler's active-job set, and
//! force-ends every broadcast that nobody owns. Broadcasts with an active
//! job are presumed correctly owned and left alone.
//!
//! The run must not race normal worker spawn during boot, so it waits for
//! an explicit readiness signal from the supervision layer, falling back to
//! a configured grace delay when no signal arrives.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use crate::error::StoreError;
use crate::model::{BroadcastStatus, RoomId};
use crate::store::Store;

/// The scheduler's view of rooms with an active capture job
///
/// Implemented by the dispatcher over its own registration table; an
/// embedding application with an external job scheduler substitutes its
/// own view.
#[async_trait]
pub trait ActiveJobs: Send + Sync {
    /// Rooms that currently have an active, scheduled or retrying capture job
    async fn active_rooms(&self) -> HashSet<RoomId>;
}

/// One-shot repair task for orphaned broadcasts
pub struct Reconciler {
    store: Arc<dyn Store>,
    jobs: Arc<dyn ActiveJobs>,
    grace: Duration,
}

impl Reconciler {
    /// Create a reconciler with the given grace delay
    pub fn new(store: Arc<dyn Store>, jobs: Arc<dyn ActiveJobs>, grace: Duration) -> Self {
        Self { store, jobs, grace }
    }

    /// Wait for readiness (or the grace delay), then reconcile
    ///
    /// The readiness signal comes from whatever supervises worker respawn
    /// at boot. If the sender is dropped without signalling, the full grace
    /// delay still applies before the repair query runs.
    pub async fn run_when_ready(
        &self,
        ready: oneshot::Receiver<()>,
    ) -> Result<usize, StoreError> {
        let started = Instant::now();
        match tokio::time::timeout(self.grace, ready).await {
            Ok(Ok(())) => {
                tracing::debug!("Readiness signal received, reconciling");
            }
            Ok(Err(_)) => {
                let remaining = self.grace.saturating_sub(started.elapsed());
                tracing::debug!(
                    remaining_ms = remaining.as_millis() as u64,
                    "Readiness channel dropped, falling back to grace delay"
                );
                tokio::time::sleep(remaining).await;
            }
            Err(_) => {
                tracing::debug!("Grace delay elapsed without readiness signal, reconciling");
            }
        }
        self.run().await
    }

    /// Sleep the grace delay, then reconcile
    pub async fn run_after_grace(&self) -> Result<usize, StoreError> {
        tokio::time::sleep(self.grace).await;
        self.run().await
    }

    /// Reconcile immediately and return the number of repaired broadcasts
    ///
    /// Idempotent: a second run with no intervening activity repairs zero
    /// broadcasts, because the first run moved every orphan out of the
    /// capturing set.
    pub async fn run(&self) -> Result<usize, StoreError> {
        let capturing = self.store.capturing_rooms().await?;
        let active = self.jobs.active_rooms().await;

        let mut repaired = 0usize;
        for room in capturing {
            if active.contains(&room) {
                continue;
            }
            let ended_at = Utc::now();
            match self
                .store
                .finalize_broadcast(&room, BroadcastStatus::Ended, ended_at)
                .await
            {
                Ok(()) => {
                    repaired += 1;
                    tracing::warn!(room = %room, "Repaired orphaned broadcast");
                }
                Err(e) => {
                    // One stubborn row must not stop the rest of the sweep.
                    tracing::error!(room = %room, error = %e, "Failed to repair broadcast");
                }
            }
        }

        tracing::info!(repaired, "Reconciliation complete");
        Ok(repaired)
    }
}
