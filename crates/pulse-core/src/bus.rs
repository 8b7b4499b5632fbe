//! Message bus contract and in-process bus.
//!
//! The health core only needs subscribe and publish; the concrete
//! fleet bus client lives outside this workspace and implements
//! [`MessageBus`]. [`MemoryBus`] is the in-process implementation used
//! by tests and by `pulsed standalone`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

/// Future type returned by subscription handlers.
pub type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Callback invoked for every message on a subscribed subject.
///
/// Handlers may run concurrently; anything they touch must be behind
/// its own synchronization.
pub type BusHandler = Arc<dyn Fn(BusMessage) -> BoxFuture + Send + Sync>;

/// One message delivered from the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection closed")]
    Closed,

    #[error("bus error: {0}")]
    Other(String),
}

/// Minimal pub/sub contract over the fleet message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Register a handler for every message published to `subject`.
    async fn subscribe(&self, subject: &str, handler: BusHandler) -> Result<(), BusError>;

    /// Publish a payload to `subject`.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// In-process bus delivering messages to handlers in the publisher's
/// task. Delivery is complete when `publish` returns, which keeps
/// tests deterministic.
#[derive(Default)]
pub struct MemoryBus {
    subscriptions: Mutex<HashMap<String, Vec<BusHandler>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(&self, subject: &str, handler: BusHandler) -> Result<(), BusError> {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subscriptions
            .entry(subject.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let handlers: Vec<BusHandler> = {
            let subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subscriptions.get(subject).cloned().unwrap_or_default()
        };

        for handler in handlers {
            handler(BusMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
            })
            .await;
        }
        Ok(())
    }
}
