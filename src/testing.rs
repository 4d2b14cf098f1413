//! Test doubles for the counting pipeline.
//!
//! Used by unit tests and the `tests/` integration suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::channels::{Author, ChannelEvent, ChatMessage, CountingChannel, EventStream};
use crate::error::{ChannelError, RecognitionError};
use crate::recognition::TextRecognizer;

/// Message `id` posted `id` seconds after a fixed epoch, so ids and
/// timestamps order the same way.
pub fn message(id: u64, author: Author, content: &str) -> ChatMessage {
    let mut msg = ChatMessage::new(id.to_string(), author, content);
    msg.created_at = timestamp(id);
    msg
}

fn timestamp(offset: u64) -> DateTime<Utc> {
    let secs = 1_700_000_000 + i64::try_from(offset).unwrap_or(0);
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

// ── Channel ─────────────────────────────────────────────────────────

/// In-memory counting channel.
///
/// Keeps the message history (oldest first), removes deleted messages from
/// it, and records every direct message sent. Scripted events reach the
/// history as they are delivered by `start()`.
#[derive(Default)]
pub struct MockChannel {
    history: Arc<Mutex<Vec<ChatMessage>>>,
    deleted: Mutex<Vec<String>>,
    direct_messages: Mutex<Vec<(String, String)>>,
    events: Mutex<Vec<ChannelEvent>>,
    fail_deletes: AtomicBool,
    fail_fetches: AtomicBool,
    fetch_cap: Option<usize>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that already holds `messages`, oldest first.
    pub fn with_history(messages: Vec<ChatMessage>) -> Self {
        let channel = Self::new();
        *lock(&channel.history) = messages;
        channel
    }

    /// Events yielded by `start()`. New messages are appended to the history
    /// and edits applied to it as each event is delivered.
    pub fn with_events(self, events: Vec<ChannelEvent>) -> Self {
        *lock(&self.events) = events;
        self
    }

    /// Return at most `cap` messages per fetch, like a paginated API.
    pub fn with_fetch_cap(mut self, cap: usize) -> Self {
        self.fetch_cap = Some(cap);
        self
    }

    /// Append a message to the history and return it.
    pub fn post(&self, message: ChatMessage) -> ChatMessage {
        lock(&self.history).push(message.clone());
        message
    }

    /// Change the content of a stored message. Returns `(old, new)`.
    pub fn edit(&self, id: &str, content: &str) -> Option<(ChatMessage, ChatMessage)> {
        let mut history = lock(&self.history);
        let stored = history.iter_mut().find(|m| m.id == id)?;
        let old = stored.clone();
        stored.content = content.to_string();
        Some((old, stored.clone()))
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// `(user_id, text)` pairs in send order.
    pub fn direct_messages(&self) -> Vec<(String, String)> {
        lock(&self.direct_messages).clone()
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CountingChannel for MockChannel {
    fn name(&self) -> &str {
        "mock"
    }

    fn max_fetch(&self) -> usize {
        self.fetch_cap.unwrap_or(usize::MAX)
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let events: Vec<ChannelEvent> = lock(&self.events).drain(..).collect();
        let history = Arc::clone(&self.history);
        let stream = futures::stream::iter(events).map(move |event| {
            let mut history = lock(&history);
            match &event {
                ChannelEvent::NewMessage(m) => history.push(m.clone()),
                ChannelEvent::Edited { new, .. } => {
                    if let Some(stored) = history.iter_mut().find(|m| m.id == new.id) {
                        *stored = new.clone();
                    }
                }
            }
            event
        });
        Ok(Box::pin(stream))
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<ChatMessage>, ChannelError> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ChannelError::FetchFailed {
                name: "mock".into(),
                reason: "fetch disabled".into(),
            });
        }
        let limit = limit.min(self.max_fetch());
        Ok(lock(&self.history).iter().rev().take(limit).cloned().collect())
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ChannelError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ChannelError::DeleteFailed {
                name: "mock".into(),
                id: message_id.to_string(),
                reason: "delete disabled".into(),
            });
        }
        lock(&self.history).retain(|m| m.id != message_id);
        lock(&self.deleted).push(message_id.to_string());
        Ok(())
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        lock(&self.direct_messages).push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ── Recognizer ──────────────────────────────────────────────────────

/// Recognizer returning canned text per image URL.
///
/// Unknown URLs fail. An optional delay makes every call suspend.
#[derive(Default)]
pub struct MockRecognizer {
    texts: HashMap<String, String>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, url: &str, text: &str) -> Self {
        self.texts.insert(url.to_string(), text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared call counter, readable after the recognizer is moved.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl TextRecognizer for MockRecognizer {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn recognize(&self, image_url: &str) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.texts
            .get(image_url)
            .cloned()
            .ok_or_else(|| RecognitionError::RequestFailed {
                provider: "mock".into(),
                reason: format!("no text for {image_url}"),
            })
    }
}
