//! Recovery event bus for the Revive workspace.
//!
//! The bus carries typed recovery events with sequential identifiers and a
//! bounded replay ring so late subscribers (status panels, the inline location
//! editor) can catch up on gate transitions they missed. Internally it uses
//! `tokio::broadcast`; when the channel overflows the oldest events are dropped.

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, EventEnvelope, EventId, RecoveryEvent};
pub use routing::{EventBus, EventStream};
