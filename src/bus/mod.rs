//! Publish/subscribe transport between the arbiter and the shooters.
//!
//! The bus moves opaque byte payloads to every current subscriber of a named
//! channel. Nothing here knows about events; encoding is the caller's job.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod memory;
pub mod relay;
pub mod ws;

pub use memory::MemoryBus;
pub use ws::WsBus;

/// Referee broadcasts: heartbeats and round snapshots.
pub const ARBITER_CHANNEL: &str = "arbiter_events";
/// Participant actions: shots.
pub const COMPETITOR_CHANNEL: &str = "competitor_events";

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Next payload, or `None` once the bus side has gone away.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Connect to the bus named by `addr` (a `ws://` relay address).
pub async fn connect(addr: &str) -> Result<WsBus> {
    WsBus::connect(addr).await
}
