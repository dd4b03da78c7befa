//! Live broadcast capture engine
//!
//! Captures the event firehose of live broadcasts from an external relay:
//! one multiplexed connection in, one persisted record per broadcast out.
//!
//! # Architecture
//!
//! ```text
//!    relay ──TCP──► BridgeConnection ──decode──► Dispatcher
//!                        │                          │
//!                 ConnectionHealth            ┌─────┴─────┐
//!                 (HealthMonitor)             ▼           ▼
//!                                       CaptureWorker CaptureWorker
//!                                        (room A)      (room B)
//!                                             │           │
//!                                             └─────┬─────┘
//!                                                   ▼
//!                                             Store (Postgres
//!                                               or in-memory)
//!                                                   ▲
//!                                       Reconciler ─┘ (startup repair)
//! ```
//!
//! The [`bridge`] owns the single relay socket and survives disconnects with
//! backoff. The [`protocol`] layer decodes envelopes with per-message fault
//! isolation, so one malformed message never costs its siblings. The
//! [`dispatch`] registry maps each room to at most one [`capture`] worker,
//! which runs the broadcast's lifecycle state machine and flushes rolling
//! aggregates through the [`store`]. After a crash, [`reconcile`] force-ends
//! broadcasts left behind in the capturing state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use livecap::{BridgeConnection, CaptureConfig, Dispatcher, HealthMonitor};
//! use livecap::store::PgStore;
//!
//! #[tokio::main]
//! async fn main() -> livecap::Result<()> {
//!     let config = CaptureConfig::with_relay("relay.example:9400").auth_token("tok");
//!     let store = Arc::new(PgStore::connect("postgres://localhost/livecap").await?);
//!     let dispatcher = Arc::new(Dispatcher::new(store, config.clone()));
//!
//!     let bridge = BridgeConnection::new(config.clone(), dispatcher);
//!     HealthMonitor::new(bridge.health(), &config).spawn();
//!     bridge.run().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod protocol;
pub mod reconcile;
pub mod store;

pub use bridge::{BridgeConnection, ConnectionHealth, HealthMonitor};
pub use capture::{CaptureState, CaptureWorker, WorkerHandle};
pub use config::CaptureConfig;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use model::{Broadcast, BroadcastStatus, RoomId};
pub use protocol::{DecodedEnvelope, NormalizedEvent};
pub use reconcile::{ActiveJobs, Reconciler};
pub use store::Store;
