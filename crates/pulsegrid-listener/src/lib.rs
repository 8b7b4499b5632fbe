//! pulsegrid-listener — event-driven consumer of the heartbeat bus.
//!
//! Subscribes to the host-advertise and host-heartbeat subjects,
//! accumulates decoded envelopes into an in-memory buffer, and flushes
//! the buffer to the store on a periodic tick. Decode failures are
//! logged and dropped; sync failures are logged and *not* retried —
//! the next heartbeats from the affected hosts reconcile state on
//! their own.

mod listener;

pub use listener::{HeartbeatListener, ListenerTasks, ADVERTISE_SUBJECT, HEARTBEAT_SUBJECT};
