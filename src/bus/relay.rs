//! A minimal websocket pub/sub relay, enough to run the arbiter and its
//! shooters as separate processes on one machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;

use super::ws::Frame;
use crate::logging::{debug, info, obj, v_err, v_str, warn, Domain};
use crate::shutdown::Shutdown;

type Routes = Arc<Mutex<HashMap<String, HashMap<u64, mpsc::UnboundedSender<Message>>>>>;

static CONN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Accept connections until `shutdown` fires.
pub async fn serve(listener: TcpListener, shutdown: Shutdown) -> Result<()> {
    let routes: Routes = Arc::default();
    let mut connections = JoinSet::new();

    if let Ok(addr) = listener.local_addr() {
        info(Domain::Bus, "relay_listening", obj(&[("addr", v_str(&addr.to_string()))]));
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = CONN_SEQ.fetch_add(1, Ordering::SeqCst);
                    debug(Domain::Bus, "relay_accept", obj(&[("conn", json!(id)), ("peer", v_str(&peer.to_string()))]));
                    connections.spawn(handle_connection(stream, id, routes.clone()));
                }
                Err(err) => warn(Domain::Bus, "relay_accept_failed", obj(&[("error", v_err(&err))])),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.abort_all();
    info(Domain::Bus, "relay_stopped", obj(&[]));
    Ok(())
}

async fn handle_connection(stream: TcpStream, id: u64, routes: Routes) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn(Domain::Bus, "relay_handshake_failed", obj(&[("conn", json!(id)), ("error", v_err(&err))]));
            return;
        }
    };
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = read.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<Frame>(&text) {
            Ok(Frame::Subscribe { channel }) => {
                if let Ok(mut routes) = routes.lock() {
                    routes.entry(channel).or_default().insert(id, tx.clone());
                }
            }
            Ok(Frame::Publish { channel, payload }) => route(&routes, channel, payload),
            Ok(Frame::Message { .. }) => {}
            Err(err) => warn(Domain::Bus, "relay_bad_frame", obj(&[("conn", json!(id)), ("error", v_err(&err))])),
        }
    }

    if let Ok(mut routes) = routes.lock() {
        for subs in routes.values_mut() {
            subs.remove(&id);
        }
    }
    drop(tx);
    let _ = writer.await;
    debug(Domain::Bus, "relay_disconnect", obj(&[("conn", json!(id))]));
}

fn route(routes: &Routes, channel: String, payload: String) {
    let frame = Frame::Message {
        channel: channel.clone(),
        payload,
    };
    let Ok(msg) = frame.to_message() else {
        return;
    };
    if let Ok(mut routes) = routes.lock() {
        if let Some(subs) = routes.get_mut(&channel) {
            subs.retain(|_, tx| tx.send(msg.clone()).is_ok());
        }
    }
}
