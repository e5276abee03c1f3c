mod websocket;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use websocket::{ConnectOptions, TransportHandle, WsTransport};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint url: {0}")]
    Url(String),
    #[error("Invalid header '{0}': {1}")]
    Header(String, String),
    #[error("Failed to start network thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One websocket message; message boundaries are frame boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Everything the connection reports, delivered in order on a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed (again, after a reconnect)
    Opened,
    Message(Frame),
    /// Connection ended and will not come back
    Closed,
    /// Connection could not be established and will not be retried
    Failed(String),
}

/// Fire-and-forget outbound path. Safe to call from any thread; frames sent
/// while the connection is down are dropped.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Frame);
}

/// Automatic reconnection, off unless configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Whether attempt number `attempt` (1-based) may run
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && attempt <= self.max_attempts
    }

    /// Exponential backoff with up to 25% random jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }
}
