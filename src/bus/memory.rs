use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Bus, Subscription};

/// In-process bus. Every publish is delivered to every subscriber alive at
/// that moment; subscribers that have been dropped are pruned on the way.
#[derive(Debug, Default)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .map(|c| c.get(channel).map_or(0, |subs| subs.iter().filter(|s| !s.is_closed()).count()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut channels = self.channels.lock().map_err(|_| anyhow!("memory bus poisoned"))?;
        if let Some(subs) = channels.get_mut(channel) {
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .map_err(|_| anyhow!("memory bus poisoned"))?
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}
