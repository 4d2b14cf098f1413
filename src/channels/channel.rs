//! Chat platform abstraction: message model, events, and the channel trait.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Platform-native user ID.
    pub id: String,
    /// Display name (for logs and replies).
    pub name: String,
    /// Whether the account is a bot.
    pub bot: bool,
}

impl Author {
    pub fn member(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            bot: false,
        }
    }

    pub fn bot(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            bot: true,
        }
    }
}

/// File attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

impl Attachment {
    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Whether the extension is one of `extensions` (case-insensitive).
    pub fn is_image(&self, extensions: &[String]) -> bool {
        self.extension()
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
    }
}

/// A message in the counting channel. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub author: Author,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, author: Author, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author,
            content: content.into(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, filename: impl Into<String>, url: impl Into<String>) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            url: url.into(),
        });
        self
    }

    /// First attachment whose extension is an accepted image type.
    pub fn image_attachment(&self, extensions: &[String]) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.is_image(extensions))
    }
}

/// Event delivered by a channel, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    NewMessage(ChatMessage),
    Edited {
        old: ChatMessage,
        new: ChatMessage,
    },
}

/// Stream of channel events.
pub type EventStream = Pin<Box<dyn Stream<Item = ChannelEvent> + Send>>;

/// The chat platform, scoped to the single counting channel.
#[async_trait]
pub trait CountingChannel: Send + Sync {
    /// Channel name, for logs.
    fn name(&self) -> &str;

    /// Start delivering events.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Largest `fetch_recent` batch the platform returns.
    fn max_fetch(&self) -> usize {
        usize::MAX
    }

    /// Most recent messages, newest first.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<ChatMessage>, ChannelError>;

    /// Delete a message from the counting channel.
    async fn delete_message(&self, message_id: &str) -> Result<(), ChannelError>;

    /// Send a private message to a user.
    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Check the connection is usable.
    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
