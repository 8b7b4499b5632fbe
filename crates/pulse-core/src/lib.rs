//! pulse-core — shared domain types and contracts for the pulsegrid
//! health-management core.
//!
//! Everything the other crates agree on lives here: the heartbeat and
//! desired-state models, the compact/JSON codec for persisted heartbeat
//! values, the recognized configuration keys, the message-bus contract,
//! and the time source abstraction that keeps TTL and freshness logic
//! testable.

pub mod bus;
pub mod clock;
pub mod codec;
pub mod config;
pub mod types;

pub use bus::{BusError, BusHandler, BusMessage, MemoryBus, MessageBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, CodecError};
pub use config::Config;
pub use types::*;
