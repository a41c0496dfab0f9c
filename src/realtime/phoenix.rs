//! Change feed over the backend's realtime websocket (Phoenix channels).
//!
//! One channel is joined with a `postgres_changes` binding per table. The
//! socket is kept alive with heartbeats and reopened with backoff when it
//! drops, until the subscriber goes away.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{Action, ChangeEvent, ChangeFeed, Subscription};
use crate::config::{BackendConfig, Credentials};
use crate::error::{Result, SyncError};
use crate::remote::{Record, Table};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CHANNEL_TOPIC: &str = "realtime:tms-realtime";
const PROTOCOL_VERSION: &str = "1.0.0";
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);
const EVENT_BUFFER: usize = 256;

pub struct PhoenixFeed {
  endpoint: Url,
  access_token: String,
  heartbeat: Duration,
}

impl PhoenixFeed {
  /// `heartbeat` is raised to at least one second.
  pub fn new(backend: &BackendConfig, credentials: &Credentials, heartbeat: Duration) -> Result<Self> {
    Ok(Self {
      endpoint: websocket_url(&backend.url, &credentials.anon_key)?,
      access_token: credentials.bearer().to_string(),
      heartbeat: heartbeat.max(MIN_HEARTBEAT),
    })
  }
}

#[async_trait]
impl ChangeFeed for PhoenixFeed {
  async fn subscribe(&self, tables: &[Table]) -> Result<Subscription> {
    // Connect once up front so a bad URL or key fails the caller.
    let socket = connect(&self.endpoint).await?;

    let channel = Arc::new(Channel {
      endpoint: self.endpoint.clone(),
      access_token: self.access_token.clone(),
      tables: tables.to_vec(),
      heartbeat: self.heartbeat,
      next_ref: AtomicU64::new(1),
    });
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let connection = tokio::spawn(channel.run(socket, tx));

    Ok(Subscription::new(rx, Some(connection)))
  }
}

struct Channel {
  endpoint: Url,
  access_token: String,
  tables: Vec<Table>,
  heartbeat: Duration,
  next_ref: AtomicU64,
}

enum Ended {
  /// Nobody is listening any more
  Unsubscribed,
  Disconnected(String),
}

impl Channel {
  async fn run(self: Arc<Self>, first: Socket, tx: mpsc::Sender<ChangeEvent>) {
    let mut socket = Some(first);
    let mut backoff = MIN_BACKOFF;

    loop {
      let stream = match socket.take() {
        Some(stream) => stream,
        None => match connect(&self.endpoint).await {
          Ok(stream) => {
            info!("realtime reconnected");
            backoff = MIN_BACKOFF;
            stream
          }
          Err(e) => {
            warn!(error = %e, retry_in = ?backoff, "realtime reconnect failed");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            continue;
          }
        },
      };

      match self.session(stream, &tx).await {
        Ended::Unsubscribed => return,
        Ended::Disconnected(reason) => {
          warn!(%reason, retry_in = ?backoff, "realtime connection lost");
          tokio::time::sleep(backoff).await;
          backoff = (backoff * 2).min(MAX_BACKOFF);
        }
      }
    }
  }

  async fn session(&self, stream: Socket, tx: &mpsc::Sender<ChangeEvent>) -> Ended {
    let (mut write, mut read) = stream.split();

    let join = join_message(&self.tables, &self.access_token, &self.next_ref());
    if let Err(e) = write.send(Message::Text(join)).await {
      return Ended::Disconnected(e.to_string());
    }

    let mut ticker = tokio::time::interval(self.heartbeat);
    ticker.tick().await;

    loop {
      tokio::select! {
        _ = tx.closed() => {
          let _ = write.send(Message::Close(None)).await;
          return Ended::Unsubscribed;
        }
        _ = ticker.tick() => {
          let heartbeat = heartbeat_message(&self.next_ref());
          if let Err(e) = write.send(Message::Text(heartbeat)).await {
            return Ended::Disconnected(e.to_string());
          }
        }
        message = read.next() => match message {
          Some(Ok(Message::Text(text))) => match decode(&text) {
            Ok(Frame::Change(event)) => {
              if tx.send(event).await.is_err() {
                return Ended::Unsubscribed;
              }
            }
            Ok(Frame::Reply { status, response }) if status != "ok" => {
              warn!(%status, %response, "realtime request rejected");
            }
            Ok(Frame::ChannelError(payload)) => {
              return Ended::Disconnected(format!("channel error: {}", payload));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "skipping malformed realtime message"),
          },
          Some(Ok(Message::Ping(payload))) => {
            if let Err(e) = write.send(Message::Pong(payload)).await {
              return Ended::Disconnected(e.to_string());
            }
          }
          Some(Ok(Message::Close(frame))) => {
            return Ended::Disconnected(format!("closed by server: {:?}", frame));
          }
          Some(Ok(_)) => {}
          Some(Err(e)) => return Ended::Disconnected(e.to_string()),
          None => return Ended::Disconnected("stream ended".to_string()),
        }
      }
    }
  }

  fn next_ref(&self) -> String {
    self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
  }
}

async fn connect(endpoint: &Url) -> Result<Socket> {
  let (socket, _) = connect_async(endpoint.as_str())
    .await
    .map_err(|e| SyncError::Realtime(format!("failed to connect: {}", e)))?;
  debug!("realtime socket open");
  Ok(socket)
}

/// Websocket endpoint for a backend project URL.
fn websocket_url(base: &str, anon_key: &str) -> Result<Url> {
  let invalid = |e: &dyn std::fmt::Display| SyncError::Config(format!("invalid backend url {}: {}", base, e));

  let mut url = Url::parse(base).map_err(|e| invalid(&e))?;
  let scheme = match url.scheme() {
    "https" => "wss",
    "http" => "ws",
    other => return Err(invalid(&format!("unsupported scheme {}", other))),
  };
  url
    .set_scheme(scheme)
    .map_err(|_| invalid(&"cannot switch to websocket scheme"))?;
  let mut url = url.join("realtime/v1/websocket").map_err(|e| invalid(&e))?;
  url
    .query_pairs_mut()
    .append_pair("apikey", anon_key)
    .append_pair("vsn", PROTOCOL_VERSION);
  Ok(url)
}

fn join_message(tables: &[Table], access_token: &str, reference: &str) -> String {
  let bindings: Vec<Value> = tables
    .iter()
    .map(|table| json!({"event": "*", "schema": "public", "table": table.as_str()}))
    .collect();

  json!({
    "topic": CHANNEL_TOPIC,
    "event": "phx_join",
    "payload": {
      "config": {
        "broadcast": {"self": false},
        "presence": {"key": ""},
        "postgres_changes": bindings,
      },
      "access_token": access_token,
    },
    "ref": reference,
    "join_ref": reference,
  })
  .to_string()
}

fn heartbeat_message(reference: &str) -> String {
  json!({
    "topic": "phoenix",
    "event": "heartbeat",
    "payload": {},
    "ref": reference,
  })
  .to_string()
}

#[derive(Debug, Deserialize)]
struct Envelope {
  event: String,
  #[serde(default)]
  payload: Value,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
  data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
  table: String,
  #[serde(rename = "type", alias = "eventType")]
  action: Action,
  #[serde(default)]
  record: Option<Value>,
  #[serde(default)]
  old_record: Option<Value>,
}

#[derive(Debug)]
enum Frame {
  Change(ChangeEvent),
  Reply { status: String, response: Value },
  ChannelError(Value),
  Other,
}

fn decode(text: &str) -> std::result::Result<Frame, String> {
  let envelope: Envelope = serde_json::from_str(text).map_err(|e| e.to_string())?;

  match envelope.event.as_str() {
    "postgres_changes" => {
      let change: ChangePayload =
        serde_json::from_value(envelope.payload).map_err(|e| e.to_string())?;
      let table = match change.data.table.parse::<Table>() {
        Ok(table) => table,
        Err(_) => {
          debug!(table = %change.data.table, "change for unknown table");
          return Ok(Frame::Other);
        }
      };
      Ok(Frame::Change(ChangeEvent {
        table,
        action: change.data.action,
        new: change.data.record.and_then(|v| Record::from_value(v).ok()),
        old: change.data.old_record.and_then(|v| Record::from_value(v).ok()),
      }))
    }
    "phx_reply" => {
      let status = envelope
        .payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
      let response = envelope
        .payload
        .get("response")
        .cloned()
        .unwrap_or(Value::Null);
      Ok(Frame::Reply { status, response })
    }
    "phx_error" => Ok(Frame::ChannelError(envelope.payload)),
    _ => Ok(Frame::Other),
  }
}
