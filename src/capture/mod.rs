//! Per-broadcast capture: lifecycle state machine and rolling aggregates

pub mod aggregates;
pub mod worker;

pub use aggregates::Aggregates;
pub use worker::{CaptureState, CaptureWorker, ForwardError, WorkerHandle, WorkerMessage};
