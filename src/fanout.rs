/// Fanout Hub - in-process pub/sub for live subscribers on named channels,
/// delivered over WebSocket.
///
/// One `tokio::sync::broadcast` channel per named channel (`newBlocks`,
/// `newTxs`). Each connection keeps a dynamic `StreamMap` of the channels it
/// is currently subscribed to; a subscriber that falls behind its buffer
/// sees `Lagged` and has its connection closed rather than blocking the
/// dispatcher.
use crate::domain::{Block, Transaction};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamMap;
use tracing::{debug, warn};

const CHANNEL_NEW_BLOCKS: &str = "newBlocks";
const CHANNEL_NEW_TXS: &str = "newTxs";
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct Hub {
    blocks_tx: broadcast::Sender<Value>,
    txs_tx: broadcast::Sender<Value>,
}

impl Hub {
    pub fn new() -> Self {
        let (blocks_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (txs_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { blocks_tx, txs_tx }
    }

    /// Publish a newly-accepted canonical block. Called only by live-tail;
    /// backfill never publishes.
    pub fn publish_block(&self, block: &Block) {
        let frame = json!({
            "type": "newBlock",
            "data": {
                "height": block.height,
                "hash": block.hash.to_string(),
                "parent_hash": block.parent_hash.to_string(),
                "miner": block.miner.to_string(),
                "gas_used": block.gas_used.to_string(),
                "gas_limit": block.gas_limit.to_string(),
                "timestamp": block.timestamp,
                "tx_count": block.tx_count(),
            }
        });
        let _ = self.blocks_tx.send(frame);
    }

    pub fn publish_transaction(&self, block_height: u64, tx: &Transaction) {
        let frame = json!({
            "type": "newTx",
            "data": {
                "hash": tx.hash.to_string(),
                "block_height": block_height,
                "tx_index": tx.tx_index,
                "from": tx.from_addr.to_string(),
                "to": tx.to_addr.map(|a| a.to_string()),
                "value_wei": tx.value_wei.to_string(),
                "success": tx.success,
            }
        });
        let _ = self.txs_tx.send(frame);
    }

    fn subscribe(&self, channel: &str) -> Option<broadcast::Receiver<Value>> {
        match channel {
            CHANNEL_NEW_BLOCKS => Some(self.blocks_tx.subscribe()),
            CHANNEL_NEW_TXS => Some(self.txs_tx.subscribe()),
            _ => None,
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (mut sender, mut receiver) = socket.split();
    let mut streams: StreamMap<String, BroadcastStream<Value>> = StreamMap::new();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_control_frame(&text, &hub, &mut streams) {
                            if sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive error, closing connection");
                        break;
                    }
                    _ => {}
                }
            }
            Some((channel, event)) = streams.next() => {
                match event {
                    Ok(value) => {
                        if sender.send(Message::Text(value.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(channel, skipped, "subscriber lagged, closing connection");
                        break;
                    }
                }
            }
        }
    }
}

fn handle_control_frame(
    text: &str,
    hub: &Hub,
    streams: &mut StreamMap<String, BroadcastStream<Value>>,
) -> Option<Value> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Some(json!({"type": "error", "message": "malformed control frame"})),
    };

    let action = frame.get("action").and_then(|v| v.as_str()).unwrap_or("");
    let channel = frame.get("channel").and_then(|v| v.as_str()).unwrap_or("");

    match action {
        "subscribe" => match hub.subscribe(channel) {
            Some(rx) => {
                streams.insert(channel.to_string(), BroadcastStream::new(rx));
                None
            }
            None => Some(json!({"type": "error", "message": format!("unknown channel: {channel}")})),
        },
        "unsubscribe" => {
            streams.remove(channel);
            None
        }
        other => Some(json!({"type": "error", "message": format!("unknown action: {other}")})),
    }
}
