use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::{Bus, Subscription};
use crate::logging::{debug, obj, v_err, v_str, warn, Domain};

/// Text frames exchanged with the relay. Payloads travel base64-encoded so
/// the bus stays byte-transparent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub(crate) enum Frame {
    Subscribe { channel: String },
    Publish { channel: String, payload: String },
    Message { channel: String, payload: String },
}

impl Frame {
    pub(crate) fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

pub(crate) fn encode_payload(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

pub(crate) fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    STANDARD.decode(payload).context("payload is not base64")
}

type Subscribers = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>>;

/// Bus client speaking to a websocket relay over a single connection.
///
/// When the connection drops every open [`Subscription`] ends, which callers
/// treat as a lost bus.
pub struct WsBus {
    outbound: mpsc::UnboundedSender<Message>,
    subscribers: Subscribers,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsBus {
    pub async fn connect(addr: &str) -> Result<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(addr)
            .await
            .with_context(|| format!("connect to bus at {}", addr))?;
        let (mut write, mut read) = ws.split();
        let (outbound, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let subscribers: Subscribers = Arc::default();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(err) = write.send(msg).await {
                    warn(Domain::Bus, "ws_write_failed", obj(&[("error", v_err(&err))]));
                    break;
                }
            }
            let _ = write.close().await;
        });

        let subs = subscribers.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => deliver(&subs, &text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn(Domain::Bus, "ws_read_failed", obj(&[("error", v_err(&err))]));
                        break;
                    }
                }
            }
            // Dropping the senders ends every subscription.
            if let Ok(mut subs) = subs.lock() {
                subs.clear();
            }
            debug(Domain::Bus, "ws_reader_closed", obj(&[]));
        });

        Ok(Self {
            outbound,
            subscribers,
            reader,
            writer,
        })
    }

    fn send(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame.to_message()?)
            .map_err(|_| anyhow!("bus connection closed"))
    }
}

fn deliver(subs: &Subscribers, text: &str) {
    let (channel, payload) = match serde_json::from_str::<Frame>(text) {
        Ok(Frame::Message { channel, payload }) => (channel, payload),
        Ok(_) => return,
        Err(err) => {
            warn(Domain::Bus, "ws_bad_frame", obj(&[("error", v_err(&err))]));
            return;
        }
    };
    let bytes = match decode_payload(&payload) {
        Ok(b) => b,
        Err(err) => {
            warn(
                Domain::Bus,
                "ws_bad_payload",
                obj(&[("channel", v_str(&channel)), ("error", v_err(&err))]),
            );
            return;
        }
    };
    if let Ok(mut subs) = subs.lock() {
        if let Some(list) = subs.get_mut(&channel) {
            list.retain(|tx| tx.send(bytes.clone()).is_ok());
        }
    }
}

impl Drop for WsBus {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl Bus for WsBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.send(Frame::Publish {
            channel: channel.to_string(),
            payload: encode_payload(&payload),
        })
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| anyhow!("subscriber table poisoned"))?
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        self.send(Frame::Subscribe {
            channel: channel.to_string(),
        })?;
        Ok(Subscription::new(rx))
    }
}
