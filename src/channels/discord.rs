//! Discord channel — polls the REST API for the counting channel.
//!
//! No gateway session: new messages and edits are synthesized by diffing
//! successive fetches of the channel's most recent messages.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::channels::{
    Attachment, Author, ChannelEvent, ChatMessage, CountingChannel, EventStream,
};
use crate::error::ChannelError;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Maximum message length for Discord's create-message endpoint.
const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;

/// Maximum `limit` accepted by the get-channel-messages endpoint.
const DISCORD_MAX_FETCH: usize = 100;

/// Upper bound on a server-requested rate-limit wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

const CHANNEL_NAME: &str = "discord";

/// Discord channel — one text channel, accessed with a bot token.
pub struct DiscordChannel {
    bot_token: SecretString,
    channel_id: String,
    api_base: String,
    poll_interval: Duration,
    poll_window: usize,
    client: reqwest::Client,
    /// user ID → DM channel ID
    dm_channels: Mutex<HashMap<String, String>>,
}

impl DiscordChannel {
    pub fn new(bot_token: SecretString, channel_id: impl Into<String>) -> Self {
        Self {
            bot_token,
            channel_id: channel_id.into(),
            api_base: DISCORD_API_BASE.to_string(),
            poll_interval: Duration::from_secs(2),
            poll_window: 50,
            client: reqwest::Client::new(),
            dm_channels: Mutex::new(HashMap::new()),
        }
    }

    /// Override the API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// A zero interval keeps the current one.
    pub fn with_polling(mut self, interval: Duration, window: usize) -> Self {
        if !interval.is_zero() {
            self.poll_interval = interval;
        }
        self.poll_window = window.clamp(1, DISCORD_MAX_FETCH);
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    fn auth_header(token: &SecretString) -> String {
        format!("Bot {}", token.expose_secret())
    }

    /// Find a guild text channel by name (case-insensitive) and return its ID.
    pub async fn resolve_channel_id(
        bot_token: &SecretString,
        guild_id: &str,
        channel_name: &str,
    ) -> Result<String, ChannelError> {
        #[derive(Deserialize)]
        struct RawChannel {
            id: String,
            #[serde(default)]
            name: Option<String>,
        }

        let resp = reqwest::Client::new()
            .get(format!("{DISCORD_API_BASE}/guilds/{guild_id}/channels"))
            .header(reqwest::header::AUTHORIZATION, Self::auth_header(bot_token))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let channels: Vec<RawChannel> =
            resp.json().await.map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;

        channels
            .into_iter()
            .find(|c| {
                c.name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(channel_name))
            })
            .map(|c| c.id)
            .ok_or_else(|| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("no channel named '{channel_name}' in guild {guild_id}"),
            })
    }

    /// Send a text message, split to fit Discord's 2000 char limit.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, DISCORD_MAX_MESSAGE_LENGTH) {
            let resp = self
                .client
                .post(self.api_url(&format!("channels/{channel_id}/messages")))
                .header(reqwest::header::AUTHORIZATION, Self::auth_header(&self.bot_token))
                .json(&serde_json::json!({ "content": chunk }))
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: CHANNEL_NAME.into(),
                    reason: e.to_string(),
                })?;
            if !resp.status().is_success() {
                return Err(error_from_response(resp).await);
            }
        }
        Ok(())
    }

    /// Open (or reuse) the DM channel with a user.
    async fn dm_channel(&self, user_id: &str) -> Result<String, ChannelError> {
        if let Some(id) = self.dm_channels.lock().await.get(user_id) {
            return Ok(id.clone());
        }

        #[derive(Deserialize)]
        struct DmChannel {
            id: String,
        }

        let resp = self
            .client
            .post(self.api_url("users/@me/channels"))
            .header(reqwest::header::AUTHORIZATION, Self::auth_header(&self.bot_token))
            .json(&serde_json::json!({ "recipient_id": user_id }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let dm: DmChannel = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;

        self.dm_channels
            .lock()
            .await
            .insert(user_id.to_string(), dm.id.clone());
        Ok(dm.id)
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl CountingChannel for DiscordChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    fn max_fetch(&self) -> usize {
        DISCORD_MAX_FETCH
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = format!(
            "{}?limit={}",
            self.api_url(&format!("channels/{}/messages", self.channel_id)),
            self.poll_window
        );
        let auth = Self::auth_header(&self.bot_token);
        let client = self.client.clone();
        let interval = self.poll_interval;
        // Seed before returning so only messages posted after `start` become events.
        let mut tracker = PollTracker::new(self.poll_window);
        let seed = fetch_batch(&client, &url, &auth).await?;
        tracker.absorb(seed);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);

            tracing::info!("Discord channel polling for messages...");

            loop {
                tick.tick().await;

                let batch = match fetch_batch(&client, &url, &auth).await {
                    Ok(b) => b,
                    Err(ChannelError::RateLimited { retry_after, .. }) => {
                        let wait = retry_after.unwrap_or(Duration::from_secs(5));
                        tracing::warn!(?wait, "Discord poll rate limited");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Discord poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for event in tracker.absorb(batch) {
                    if tx.send(event).is_err() {
                        tracing::info!("Discord listener channel closed");
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<ChatMessage>, ChannelError> {
        let url = format!(
            "{}?limit={}",
            self.api_url(&format!("channels/{}/messages", self.channel_id)),
            limit.clamp(1, DISCORD_MAX_FETCH)
        );
        let mut messages =
            fetch_batch(&self.client, &url, &Self::auth_header(&self.bot_token)).await?;
        sort_newest_first(&mut messages);
        Ok(messages)
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ChannelError> {
        let resp = self
            .client
            .delete(self.api_url(&format!(
                "channels/{}/messages/{message_id}",
                self.channel_id
            )))
            .header(reqwest::header::AUTHORIZATION, Self::auth_header(&self.bot_token))
            .send()
            .await
            .map_err(|e| ChannelError::DeleteFailed {
                name: CHANNEL_NAME.into(),
                id: message_id.to_string(),
                reason: e.to_string(),
            })?;

        // Already gone counts as deleted
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(error_from_response(resp).await)
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        let dm = self.dm_channel(user_id).await?;
        self.send_message(&dm, text).await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("users/@me"))
            .header(reqwest::header::AUTHORIZATION, Self::auth_header(&self.bot_token))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("users/@me returned {}", resp.status()),
            })
        }
    }
}

// ── Polling ─────────────────────────────────────────────────────────

/// Turns successive "most recent N messages" snapshots into events.
///
/// The first snapshot only seeds the tracker; startup state comes from
/// resynchronization, not from replaying history.
#[derive(Debug)]
pub struct PollTracker {
    window: usize,
    seeded: bool,
    last_seen: u64,
    /// snowflake → last observed version
    recent: BTreeMap<u64, ChatMessage>,
}

impl PollTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            seeded: false,
            last_seen: 0,
            recent: BTreeMap::new(),
        }
    }

    /// Absorb one snapshot and return the events it implies, oldest first.
    pub fn absorb(&mut self, batch: Vec<ChatMessage>) -> Vec<ChannelEvent> {
        let mut batch: Vec<(u64, ChatMessage)> = batch
            .into_iter()
            .filter_map(|m| m.id.parse::<u64>().ok().map(|id| (id, m)))
            .collect();
        batch.sort_by_key(|(id, _)| *id);

        let mut events = Vec::new();
        let fetched = batch.len();
        let mut fresh = 0;

        for (id, msg) in batch {
            if id > self.last_seen {
                self.last_seen = id;
                fresh += 1;
                if self.seeded {
                    events.push(ChannelEvent::NewMessage(msg.clone()));
                }
                self.recent.insert(id, msg);
            } else if let Some(prev) = self.recent.get_mut(&id) {
                if prev.content != msg.content {
                    let old = std::mem::replace(prev, msg.clone());
                    events.push(ChannelEvent::Edited { old, new: msg });
                }
            }
        }

        if self.seeded && fetched >= self.window && fresh == fetched {
            tracing::warn!(
                window = self.window,
                "Every polled message was new; some messages may have been missed"
            );
        }

        while self.recent.len() > self.window {
            self.recent.pop_first();
        }
        self.seeded = true;
        events
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    filename: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    author: RawUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
    timestamp: DateTime<Utc>,
}

impl From<RawMessage> for ChatMessage {
    fn from(raw: RawMessage) -> Self {
        ChatMessage {
            id: raw.id,
            author: Author {
                id: raw.author.id,
                name: raw.author.global_name.unwrap_or(raw.author.username),
                bot: raw.author.bot,
            },
            content: raw.content,
            attachments: raw
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    filename: a.filename,
                    url: a.url,
                })
                .collect(),
            created_at: raw.timestamp,
        }
    }
}

/// Parse a get-channel-messages response body.
fn parse_messages(body: &str) -> Result<Vec<ChatMessage>, ChannelError> {
    let raw: Vec<RawMessage> = serde_json::from_str(body)
        .map_err(|e| ChannelError::InvalidMessage(format!("bad message list: {e}")))?;
    Ok(raw.into_iter().map(ChatMessage::from).collect())
}

async fn fetch_batch(
    client: &reqwest::Client,
    url: &str,
    auth: &str,
) -> Result<Vec<ChatMessage>, ChannelError> {
    let resp = client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, auth)
        .send()
        .await
        .map_err(|e| ChannelError::FetchFailed {
            name: CHANNEL_NAME.into(),
            reason: e.to_string(),
        })?;
    if !resp.status().is_success() {
        return Err(error_from_response(resp).await);
    }
    let body = resp.text().await.map_err(|e| ChannelError::FetchFailed {
        name: CHANNEL_NAME.into(),
        reason: e.to_string(),
    })?;
    parse_messages(&body)
}

/// Map a non-success response to a `ChannelError`.
async fn error_from_response(resp: reqwest::Response) -> ChannelError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    classify_error(status, &body)
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> ChannelError {
    match status.as_u16() {
        429 => {
            let retry_after = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("retry_after").and_then(serde_json::Value::as_f64))
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .map(|wait| wait.min(MAX_RETRY_AFTER));
            ChannelError::RateLimited {
                name: CHANNEL_NAME.into(),
                retry_after,
            }
        }
        401 | 403 => ChannelError::AuthFailed {
            name: CHANNEL_NAME.into(),
            reason: format!("{status}: {body}"),
        },
        _ => ChannelError::Http(format!("{status}: {body}")),
    }
}

fn sort_newest_first(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|m| std::cmp::Reverse(m.id.parse::<u64>().unwrap_or(0)));
}

/// Split a message into chunks that fit Discord's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte offset of the max_len-th char keeps the cut on a boundary
        let limit = remaining
            .char_indices()
            .nth(max_len)
            .map_or(remaining.len(), |(i, _)| i);
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
