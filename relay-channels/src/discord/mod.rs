//! Discord channel for assistant-relay.
//!
//! Receives messages over the Gateway WebSocket and replies through the REST
//! API.

use crate::message::{ChannelType, InboundEvent};
use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_common::config::DiscordConfig;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 33281;

/// Retries of a send rejected with HTTP 429.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Discord channel using Gateway WebSocket for real-time messaging.
pub struct DiscordChannel {
    bot_token: String,
    guild_id: Option<String>,
    allowed_channels: Vec<String>,
    api_base: String,
    client: Client,
    bot_user_id: Arc<RwLock<Option<String>>>,
}

impl DiscordChannel {
    /// Create a new Discord channel.
    ///
    /// An empty `allowed_channels` answers in every channel the bot can read.
    pub fn new(bot_token: String, guild_id: Option<String>, allowed_channels: Vec<String>) -> Self {
        Self {
            bot_token,
            guild_id,
            allowed_channels,
            api_base: "https://discord.com/api/v10".into(),
            client: Client::new(),
            bot_user_id: Arc::new(RwLock::new(None)),
        }
    }

    /// Create from configuration; requires a bot token.
    pub fn from_config(config: &DiscordConfig) -> ChannelResult<Self> {
        let token = config
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChannelError::Auth("No Discord bot token configured".into()))?;

        Ok(Self::new(token, config.guild_id.clone(), config.allowed_channels.clone())
            .with_api_base(config.api_base.clone()))
    }

    /// Override the REST API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn is_channel_allowed(&self, channel_id: &str) -> bool {
        self.allowed_channels.is_empty() || self.allowed_channels.iter().any(|c| c == channel_id)
    }

    /// Verify the token and learn the bot's own user ID.
    pub async fn verify(&self) -> ChannelResult<String> {
        let resp = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Auth(format!("Failed to verify Discord token: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChannelError::Auth(format!(
                "Invalid Discord bot token ({})",
                resp.status()
            )));
        }

        let me: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))?;
        let id = me
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Internal("Bot user has no id".into()))?
            .to_string();

        let bot_name = me.get("username").and_then(Value::as_str).unwrap_or("");

        *self.bot_user_id.write().await = Some(id.clone());
        tracing::info!(bot_user_id = %id, bot_name, "Discord token verified");
        Ok(id)
    }

    /// Convert a `MESSAGE_CREATE` payload into an event, or `None` if the
    /// message should not be relayed.
    fn to_event(&self, d: &Value, bot_user_id: Option<&str>) -> Option<InboundEvent> {
        let author = d.get("author")?;
        let author_id = author.get("id").and_then(Value::as_str).unwrap_or("");

        if bot_user_id == Some(author_id) {
            return None;
        }
        if author.get("bot").and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }

        if let Some(ref gid) = self.guild_id {
            let msg_guild = d.get("guild_id").and_then(Value::as_str).unwrap_or("");
            if msg_guild != gid {
                return None;
            }
        }

        let channel_id = d.get("channel_id").and_then(Value::as_str)?;
        if !self.is_channel_allowed(channel_id) {
            return None;
        }

        let content = d.get("content").and_then(Value::as_str).unwrap_or("");
        if content.trim().is_empty() {
            return None;
        }

        let author_name = author
            .get("global_name")
            .and_then(Value::as_str)
            .or_else(|| author.get("username").and_then(Value::as_str))
            .unwrap_or("")
            .to_string();

        Some(InboundEvent {
            id: d.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
            channel_type: ChannelType::Discord,
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
            author_name,
            text: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            trace_id: relay_common::logging::generate_trace_id(),
        })
    }

    /// Connect to the gateway and deliver relayable messages to `callback`
    /// until the connection ends.
    ///
    /// Returns `Ok(())` on a clean close and an error when the gateway asks
    /// for a reconnect or the socket fails. Callers reconnect in both cases.
    pub async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        let gw_resp: Value = self
            .client
            .get(format!("{}/gateway/bot", self.api_base))
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to get gateway: {e}")))?
            .json()
            .await
            .map_err(|e| ChannelError::Connection(format!("Invalid gateway response: {e}")))?;

        let gw_url = gw_resp
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| ChannelError::Connection(format!("WebSocket connection failed: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        // Hello (opcode 10)
        let hello = read
            .next()
            .await
            .ok_or_else(|| ChannelError::Connection("No hello from gateway".into()))?
            .map_err(|e| ChannelError::Connection(format!("WebSocket error: {e}")))?;

        let hello_data: Value = serde_json::from_str(&hello.to_string())
            .map_err(|e| ChannelError::Connection(format!("Invalid hello: {e}")))?;

        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(41250);

        // Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "assistant-relay",
                    "device": "assistant-relay"
                }
            }
        });

        write
            .send(Message::Text(identify.to_string()))
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to identify: {e}")))?;

        tracing::info!(heartbeat_ms = heartbeat_interval, "Discord: connected and identified");

        let period = Duration::from_millis(heartbeat_interval);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut acks = HeartbeatAcks::default();
        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if !acks.beat() {
                        return Err(ChannelError::Connection(
                            "Heartbeat not acknowledged, connection is stale".into(),
                        ));
                    }
                    let hb = json!({ "op": 1, "d": sequence });
                    if write.send(Message::Text(hb.to_string())).await.is_err() {
                        return Err(ChannelError::Connection("Heartbeat send failed".into()));
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Discord: gateway closed the connection");
                            return Ok(());
                        }
                        None => return Ok(()),
                        Some(Err(e)) => {
                            return Err(ChannelError::Connection(format!("WebSocket error: {e}")));
                        }
                        _ => continue,
                    };

                    let Ok(event) = serde_json::from_str::<Value>(&msg) else {
                        continue;
                    };

                    if let Some(s) = event.get("s").and_then(Value::as_u64) {
                        sequence = Some(s);
                    }

                    match event.get("op").and_then(Value::as_u64).unwrap_or(0) {
                        // Heartbeat request
                        1 => {
                            let hb = json!({ "op": 1, "d": sequence });
                            if write.send(Message::Text(hb.to_string())).await.is_err() {
                                return Err(ChannelError::Connection("Heartbeat send failed".into()));
                            }
                            continue;
                        }
                        // Heartbeat ACK
                        11 => {
                            acks.ack();
                            continue;
                        }
                        // Reconnect / invalid session
                        7 | 9 => {
                            return Err(ChannelError::Connection(
                                "Gateway requested a new session".into(),
                            ));
                        }
                        0 => {}
                        _ => continue,
                    }

                    let Some(d) = event.get("d") else {
                        continue;
                    };

                    match event.get("t").and_then(Value::as_str).unwrap_or("") {
                        "READY" => {
                            let id = d
                                .get("user")
                                .and_then(|u| u.get("id"))
                                .and_then(Value::as_str)
                                .map(String::from);
                            tracing::info!(bot_user_id = ?id, "Discord: session ready");
                            *self.bot_user_id.write().await = id;
                        }
                        "MESSAGE_CREATE" => {
                            let bot_user_id = self.bot_user_id.read().await.clone();
                            if let Some(inbound) = self.to_event(d, bot_user_id.as_deref()) {
                                tracing::info!(
                                    channel = "discord",
                                    author_id = %inbound.author_id,
                                    channel_id = %inbound.channel_id,
                                    trace_id = %inbound.trace_id,
                                    "IM message received"
                                );
                                callback(inbound);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Tracks whether the last periodic heartbeat was acknowledged (op 11).
#[derive(Debug, Default)]
struct HeartbeatAcks {
    awaiting_ack: bool,
}

impl HeartbeatAcks {
    /// Record a periodic heartbeat. Returns `false` if the previous one was
    /// never acknowledged.
    fn beat(&mut self) -> bool {
        if self.awaiting_ack {
            return false;
        }
        self.awaiting_ack = true;
        true
    }

    fn ack(&mut self) {
        self.awaiting_ack = false;
    }
}

/// Delay requested by a 429 response, in milliseconds.
///
/// Discord sends `retry_after` in seconds (fractional) in the JSON body.
fn retry_after_ms(body: &str) -> u64 {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(Value::as_f64))
        .map_or(1000, |secs| (secs * 1000.0).ceil().max(0.0) as u64)
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> ChannelResult<String> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        let body = json!({ "content": text });
        let mut retries = 0;

        loop {
            let resp = self
                .client
                .post(&url)
                .header(AUTHORIZATION, self.auth_header())
                .json(&body)
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed(format!("Discord send error: {e}")))?;

            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait_ms = retry_after_ms(&resp.text().await.unwrap_or_default());
                if retries >= MAX_RATE_LIMIT_RETRIES {
                    return Err(ChannelError::RateLimited {
                        retry_after_ms: wait_ms,
                    });
                }
                retries += 1;
                tracing::warn!(channel_id, retry_after_ms = wait_ms, attempt = retries, "Discord rate limited");
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                continue;
            }

            if !status.is_success() {
                let error = resp.text().await.unwrap_or_default();
                return Err(ChannelError::SendFailed(format!(
                    "Discord API error ({status}): {error}"
                )));
            }

            let msg_data: Value = resp
                .json()
                .await
                .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))?;

            return Ok(msg_data
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string());
        }
    }

    async fn health_check(&self) -> ChannelResult<()> {
        let resp = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Health check failed: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Auth("Discord authentication failed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(guild: Option<&str>, allowed: &[&str]) -> DiscordChannel {
        DiscordChannel::new(
            "fake".into(),
            guild.map(String::from),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn payload(author_id: &str, bot: bool, guild: &str, channel_id: &str, content: &str) -> Value {
        json!({
            "id": "m1",
            "guild_id": guild,
            "channel_id": channel_id,
            "content": content,
            "author": {
                "id": author_id,
                "username": "ada_l",
                "global_name": "Ada",
                "bot": bot
            }
        })
    }

    #[test]
    fn discord_channel_name() {
        assert_eq!(channel(None, &[]).name(), "discord");
    }

    #[test]
    fn message_becomes_event() {
        let ch = channel(Some("g1"), &["42"]);
        let event = ch
            .to_event(&payload("u1", false, "g1", "42", "hello"), Some("bot"))
            .unwrap();
        assert_eq!(event.channel_id, "42");
        assert_eq!(event.author_id, "u1");
        assert_eq!(event.author_name, "Ada");
        assert_eq!(event.text, "hello");
        assert_eq!(event.channel_type, ChannelType::Discord);
    }

    #[test]
    fn own_and_bot_messages_ignored() {
        let ch = channel(None, &[]);
        assert!(ch.to_event(&payload("bot", false, "g1", "42", "hi"), Some("bot")).is_none());
        assert!(ch.to_event(&payload("u2", true, "g1", "42", "hi"), Some("bot")).is_none());
    }

    #[test]
    fn guild_and_channel_filters() {
        let ch = channel(Some("g1"), &["42"]);
        assert!(ch.to_event(&payload("u1", false, "g2", "42", "hi"), None).is_none());
        assert!(ch.to_event(&payload("u1", false, "g1", "43", "hi"), None).is_none());

        let open = channel(None, &[]);
        assert!(open.to_event(&payload("u1", false, "g9", "99", "hi"), None).is_some());
    }

    #[test]
    fn empty_content_ignored() {
        let ch = channel(None, &[]);
        assert!(ch.to_event(&payload("u1", false, "g1", "42", "  "), None).is_none());
    }

    #[test]
    fn author_name_falls_back_to_username() {
        let ch = channel(None, &[]);
        let mut d = payload("u1", false, "g1", "42", "hi");
        d["author"]["global_name"] = Value::Null;
        assert_eq!(ch.to_event(&d, None).unwrap().author_name, "ada_l");
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(retry_after_ms(r#"{"message":"rate limited","retry_after":1.5,"global":false}"#), 1500);
        assert_eq!(retry_after_ms("not json"), 1000);
    }

    #[test]
    fn from_config_requires_token() {
        assert!(DiscordChannel::from_config(&DiscordConfig::default()).is_err());

        let config = DiscordConfig {
            bot_token: Some("token".into()),
            api_base: "http://localhost:9/api/".into(),
            ..DiscordConfig::default()
        };
        let ch = DiscordChannel::from_config(&config).unwrap();
        assert_eq!(ch.api_base, "http://localhost:9/api");
    }

    #[test]
    fn missed_heartbeat_ack_marks_connection_stale() {
        let mut acks = HeartbeatAcks::default();
        assert!(acks.beat());
        acks.ack();
        assert!(acks.beat());
        // No ACK arrived for the previous beat
        assert!(!acks.beat());
    }
}
