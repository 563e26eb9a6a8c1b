//! Tagged event channel to the hosting conversational engine.
//!
//! Providers and the dispatch layer emit `BridgeEvent`s through a shared
//! `EventSink`. Emission never waits on the consumer: with no subscriber, or a
//! full channel, the event is dropped.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Capacity of the subscriber channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something the hosting engine may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A provider finished its handshake and catalog discovery.
    ProviderReady { provider: String, tool_count: usize },
    /// A provider could not be brought up.
    ProviderFailed { provider: String, reason: String },
    /// A local-process provider exited on its own.
    ProviderExited { provider: String, rejected: usize },
    /// A tool call was dispatched.
    ToolStarted { tool: String, provider: String },
    /// An intermediate event arrived on a streaming response.
    ToolProgress {
        provider: String,
        payload: serde_json::Value,
    },
    /// A tool call returned a result.
    ToolCompleted {
        tool: String,
        provider: String,
        elapsed_ms: u64,
    },
    /// A tool call failed.
    ToolFailed { tool: String, error: String },
}

/// Cloneable handle used by emitters.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Arc<Mutex<Option<mpsc::Sender<BridgeEvent>>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current subscriber and return its receiver.
    pub fn subscribe(&self) -> mpsc::Receiver<BridgeEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    pub fn emit(&self, event: BridgeEvent) {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::debug!(error = %e, "bridge event dropped");
        }
    }
}
