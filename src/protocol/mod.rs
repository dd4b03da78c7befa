//! Relay protocol: wire codec and envelope decoding
//!
//! The relay multiplexes many broadcasts over one connection. Each inbound
//! frame carries an envelope of typed sub-messages; [`decoder::decode`]
//! turns an envelope into ordered [`event::NormalizedEvent`]s with
//! per-message fault isolation. The codec in [`wire`] and the per-tag
//! payload shapes in [`payload`] are pure and do no I/O.

pub mod decoder;
pub mod event;
pub mod payload;
pub mod wire;

pub use decoder::{decode, DecodedEnvelope};
pub use event::{NormalizedEvent, UserRef};
pub use wire::{Envelope, Frame, SubMessage};
