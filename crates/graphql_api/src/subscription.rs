//! `graphql-transport-ws` subscription client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use client_core::ChangeSubscription;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use serde_json::json;
use shared::{
    domain::Item,
    protocol::{ChangeKind, ItemChange},
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{documents, GraphQlEndpoint};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIPTION_ID: &str = "1";
const CHANGE_QUEUE_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Deserialize)]
struct ServerFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// One socket per subscription; torn down by an explicit `cancel`.
pub struct GraphQlSubscription {
    kind: ChangeKind,
    write: SplitSink<WsStream, Message>,
    changes_rx: mpsc::Receiver<ItemChange>,
    reader_task: JoinHandle<()>,
}

impl GraphQlSubscription {
    pub(crate) async fn connect(endpoint: &GraphQlEndpoint, kind: ChangeKind) -> Result<Self> {
        let url = endpoint.realtime_url()?;
        debug!(kind = ?kind, url = %url, "opening subscription socket");
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .context("failed to connect subscription websocket")?;
        let (mut write, mut read) = ws_stream.split();

        let init_payload = match &endpoint.api_key {
            Some(api_key) => json!({ "x-api-key": api_key }),
            None => json!({}),
        };
        write
            .send(Message::Text(
                json!({ "type": "connection_init", "payload": init_payload }).to_string(),
            ))
            .await?;

        await_connection_ack(&mut read).await?;

        write
            .send(Message::Text(
                json!({
                    "id": SUBSCRIPTION_ID,
                    "type": "subscribe",
                    "payload": { "query": documents::subscription_document(kind) },
                })
                .to_string(),
            ))
            .await?;

        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
        let reader_task = tokio::spawn(read_changes(kind, read, changes_tx));

        Ok(Self {
            kind,
            write,
            changes_rx,
            reader_task,
        })
    }
}

#[async_trait]
impl ChangeSubscription for GraphQlSubscription {
    async fn next_change(&mut self) -> Option<ItemChange> {
        self.changes_rx.recv().await
    }

    async fn cancel(self: Box<Self>) {
        let mut this = self;
        let complete = json!({ "id": SUBSCRIPTION_ID, "type": "complete" }).to_string();
        if let Err(err) = this.write.send(Message::Text(complete)).await {
            debug!(kind = ?this.kind, "complete frame not delivered: {err}");
        }
        let _ = this.write.close().await;
        this.reader_task.abort();
    }
}

async fn await_connection_ack(read: &mut SplitStream<WsStream>) -> Result<()> {
    let deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            bail!("timed out waiting for connection_ack");
        }

        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let frame: ServerFrame = serde_json::from_str(&text)
                        .with_context(|| format!("invalid frame during handshake: {text}"))?;
                    match frame.kind.as_str() {
                        "connection_ack" => return Ok(()),
                        "ping" | "ka" => continue,
                        "connection_error" | "error" => {
                            bail!("subscription handshake rejected: {text}")
                        }
                        _ => continue,
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    bail!("subscription socket closed during handshake")
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    return Err(err).context("subscription socket error during handshake")
                }
            },
            _ = tokio::time::sleep(remaining) => bail!("timed out waiting for connection_ack"),
        }
    }
}

async fn read_changes(
    kind: ChangeKind,
    mut read: SplitStream<WsStream>,
    changes_tx: mpsc::Sender<ItemChange>,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let frame: ServerFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(kind = ?kind, "discarding undecodable frame: {err}");
                        continue;
                    }
                };
                match frame.kind.as_str() {
                    "next" => {
                        let item = frame.payload.and_then(|payload| decode_item(kind, payload));
                        if changes_tx.send(ItemChange { kind, item }).await.is_err() {
                            break;
                        }
                    }
                    "complete" => {
                        debug!(kind = ?kind, "subscription completed by server");
                        break;
                    }
                    "error" => {
                        warn!(kind = ?kind, "subscription error frame: {text}");
                        break;
                    }
                    _ => {}
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(kind = ?kind, "subscription socket error: {err}");
                break;
            }
        }
    }
}

fn decode_item(kind: ChangeKind, payload: serde_json::Value) -> Option<Item> {
    let value = payload
        .get("data")?
        .get(documents::subscription_field(kind))?
        .clone();
    serde_json::from_value(value).ok()
}
