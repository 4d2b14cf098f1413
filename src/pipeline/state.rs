//! Counting state: the last accepted message of the chain.

use serde::Serialize;

use crate::channels::{Author, ChatMessage};

/// Last accepted value, author and message.
///
/// `last_value` is `None` when the state was rebuilt from the channel tail
/// and the tail message has not been resolved yet; it is filled in lazily.
#[derive(Debug, Clone, Default)]
pub struct CountingState {
    last_value: Option<i64>,
    last_author: Option<Author>,
    last_message: Option<ChatMessage>,
}

impl CountingState {
    /// State for a channel with no messages: the next valid count is 1.
    pub fn empty() -> Self {
        Self {
            last_value: Some(0),
            last_author: None,
            last_message: None,
        }
    }

    /// State pointing at `message` whose value is already known.
    pub fn accepted(message: ChatMessage, value: i64) -> Self {
        Self {
            last_value: Some(value),
            last_author: Some(message.author.clone()),
            last_message: Some(message),
        }
    }

    /// State pointing at `message` whose value still has to be resolved.
    pub fn from_tail(message: ChatMessage) -> Self {
        Self {
            last_value: None,
            last_author: Some(message.author.clone()),
            last_message: Some(message),
        }
    }

    pub fn last_value(&self) -> Option<i64> {
        self.last_value
    }

    pub fn last_author(&self) -> Option<&Author> {
        self.last_author.as_ref()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.last_message.as_ref()
    }

    pub fn last_message_id(&self) -> Option<&str> {
        self.last_message.as_ref().map(|m| m.id.as_str())
    }

    pub fn last_content(&self) -> Option<&str> {
        self.last_message.as_ref().map(|m| m.content.as_str())
    }

    /// Remember a lazily resolved value for the current head.
    pub(crate) fn cache_value(&mut self, value: i64) {
        self.last_value = Some(value);
    }

    /// Move the head to a newly accepted message.
    pub(crate) fn advance(&mut self, message: &ChatMessage, value: i64) {
        *self = Self::accepted(message.clone(), value);
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            last_value: self.last_value,
            last_author_id: self.last_author.as_ref().map(|a| a.id.clone()),
            last_message_id: self.last_message_id().map(String::from),
            last_content: self.last_content().map(String::from),
        }
    }
}

/// Read-only view of the state for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub last_value: Option<i64>,
    pub last_author_id: Option<String>,
    pub last_message_id: Option<String>,
    pub last_content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_expects_one() {
        let state = CountingState::empty();
        assert_eq!(state.last_value(), Some(0));
        assert!(state.last_author().is_none());
        assert!(state.last_message_id().is_none());
    }

    #[test]
    fn tail_state_has_unresolved_value() {
        let msg = ChatMessage::new("10", Author::member("a", "alice"), "2+2");
        let mut state = CountingState::from_tail(msg);
        assert_eq!(state.last_value(), None);
        assert_eq!(state.last_content(), Some("2+2"));

        state.cache_value(4);
        assert_eq!(state.last_value(), Some(4));
        assert_eq!(state.last_message_id(), Some("10"));
    }

    #[test]
    fn advance_replaces_head() {
        let first = ChatMessage::new("1", Author::member("a", "alice"), "5");
        let second = ChatMessage::new("2", Author::member("b", "bob"), "6");
        let mut state = CountingState::accepted(first, 5);
        state.advance(&second, 6);

        let snap = state.snapshot();
        assert_eq!(snap.last_value, Some(6));
        assert_eq!(snap.last_author_id.as_deref(), Some("b"));
        assert_eq!(snap.last_message_id.as_deref(), Some("2"));
        assert_eq!(snap.last_content.as_deref(), Some("6"));
    }
}
