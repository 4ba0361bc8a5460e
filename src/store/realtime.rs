//! Supabase Realtime subscriber.
//!
//! Realtime speaks the Phoenix channel protocol over a WebSocket:
//! - one `phx_join` per table on topic `realtime:public:{table}`, asking for
//!   `postgres_changes` of every event type
//! - a `heartbeat` on topic `phoenix` every 30 seconds keeps the socket alive
//! - row changes arrive as `postgres_changes` with `payload.data.type`
//!
//! Every change is republished into the [`ChangeFeed`]. After each successful
//! join an `Unknown` event is published too, since changes made while the
//! socket was down were never delivered.

use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{Table, WATCHED_TABLES};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::{Error, Result};

/// Interval between Phoenix heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum delay between reconnect attempts, in seconds.
pub const MAX_BACKOFF_SECS: u64 = 30;

/// Phoenix protocol version requested in the socket URL.
const PROTOCOL_VSN: &str = "1.0.0";

/// Calculate the delay before reconnect attempt `attempt` (1-based).
///
/// The first attempt is immediate, then 1s, 2s, 4s... capped at
/// [`MAX_BACKOFF_SECS`].
pub fn calculate_backoff(attempt: u32) -> Duration {
    if attempt <= 1 {
        Duration::from_secs(0)
    } else {
        let exponent = attempt.saturating_sub(2);
        let secs = if exponent >= 63 {
            MAX_BACKOFF_SECS
        } else {
            2u64.pow(exponent).min(MAX_BACKOFF_SECS)
        };
        Duration::from_secs(secs)
    }
}

/// One Phoenix channel frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

fn topic_for(table: Table) -> String {
    format!("realtime:public:{}", table.as_str())
}

fn table_for_topic(topic: &str) -> Option<Table> {
    topic
        .strip_prefix("realtime:public:")
        .and_then(Table::parse)
}

/// Join request for one table's `postgres_changes`.
pub fn join_message(table: Table, access_token: &str, reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic_for(table),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table.as_str() }
                ]
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    }
}

fn heartbeat_message(reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Translate an incoming frame into a feed event, if it carries one.
///
/// A successful join reply yields `Unknown` for the joined table; a
/// `postgres_changes` frame yields its change type.
pub fn event_for_message(message: &PhoenixMessage) -> Option<ChangeEvent> {
    match message.event.as_str() {
        "postgres_changes" => {
            let data = message.payload.get("data")?;
            let table = data
                .get("table")
                .and_then(Value::as_str)
                .and_then(Table::parse)
                .or_else(|| table_for_topic(&message.topic))?;
            let kind = data
                .get("type")
                .and_then(Value::as_str)
                .map(ChangeKind::from_postgres)
                .unwrap_or(ChangeKind::Unknown);
            Some(ChangeEvent::new(table, kind))
        }
        "phx_reply" => {
            let table = table_for_topic(&message.topic)?;
            let ok = message.payload.get("status").and_then(Value::as_str) == Some("ok");
            ok.then(|| ChangeEvent::new(table, ChangeKind::Unknown))
        }
        _ => None,
    }
}

/// Realtime connection settings for one Supabase project.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    socket_url: String,
    host: String,
    key: String,
}

impl RealtimeClient {
    /// Derive the socket URL from the project's REST base URL.
    pub fn new(base_url: &str, key: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let (scheme, host) = if let Some(rest) = base.strip_prefix("https://") {
            ("wss", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            ("ws", rest)
        } else {
            return Err(Error::Config(format!(
                "Supabase URL must start with http:// or https://: {}",
                base_url
            )));
        };

        Ok(Self {
            socket_url: format!(
                "{}://{}/realtime/v1/websocket?apikey={}&vsn={}",
                scheme, host, key, PROTOCOL_VSN
            ),
            host: host.to_string(),
            key: key.to_string(),
        })
    }

    pub fn endpoint_host(&self) -> &str {
        &self.host
    }

    /// Run the subscriber on a background task until it is aborted.
    pub fn spawn(self, feed: ChangeFeed) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(feed).await })
    }

    async fn run(self, feed: ChangeFeed) {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let delay = calculate_backoff(attempt);
            if !delay.is_zero() {
                tracing::debug!(attempt, delay_secs = delay.as_secs(), "realtime reconnect delay");
                tokio::time::sleep(delay).await;
            }

            match self.connect_once(&feed, &mut attempt).await {
                Ok(()) => tracing::info!(host = %self.host, "realtime connection closed"),
                Err(e) => tracing::warn!(host = %self.host, error = %e, "realtime connection failed"),
            }
        }
    }

    /// One connection lifetime. Resets `attempt` once a join succeeds.
    async fn connect_once(&self, feed: &ChangeFeed, attempt: &mut u32) -> Result<()> {
        let (socket, _) = connect_async(self.socket_url.as_str())
            .await
            .map_err(|e| Error::Other(format!("realtime connect: {}", e)))?;
        let (mut write, mut read) = socket.split();

        let mut next_ref: u64 = 1;
        for table in WATCHED_TABLES {
            send(&mut write, &join_message(*table, &self.key, next_ref)).await?;
            next_ref += 1;
        }
        tracing::info!(host = %self.host, "realtime channels requested");

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    send(&mut write, &heartbeat_message(next_ref)).await?;
                    next_ref += 1;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let message: PhoenixMessage = match serde_json::from_str(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    tracing::debug!(error = %e, "ignoring unparsable realtime frame");
                                    continue;
                                }
                            };
                            if message.event == "phx_reply"
                                && message.payload.get("status").and_then(Value::as_str) == Some("error")
                            {
                                tracing::warn!(topic = %message.topic, payload = %message.payload, "realtime join rejected");
                            }
                            if let Some(event) = event_for_message(&message) {
                                if message.event == "phx_reply" {
                                    *attempt = 0;
                                }
                                feed.publish(event);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| Error::Other(format!("realtime send: {}", e)))?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(Error::Other(format!("realtime receive: {}", e)));
                        }
                    }
                }
            }
        }
    }
}

async fn send<S>(write: &mut S, message: &PhoenixMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(message)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| Error::Other(format!("realtime send: {}", e)))
}
