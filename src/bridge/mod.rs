//! Relay bridge: the single connection to the external relay
//!
//! [`connection::BridgeConnection`] owns the socket, performs the hello
//! handshake, reads frames under timeout and hands decoded events to the
//! dispatcher. [`health::HealthMonitor`] supervises it from outside and
//! forces a reconnect when the connection goes quiet.

pub mod connection;
pub mod health;

pub use connection::{read_frame, write_frame, BridgeConnection};
pub use health::{ConnectionHealth, HealthMonitor};
