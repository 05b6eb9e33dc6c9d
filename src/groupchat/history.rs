//! The shared, append-only conversation history.
//!
//! One [`ChatHistory`] exists per session. Every classifier and agent reads
//! from it; only the turn controller writes to it, and only after an agent or
//! user turn completes. Sequence indexes are strictly increasing with no
//! gaps, which downstream code relies on when resuming conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::groupchat::config::ConfigurationError;

/// A single message in the shared history. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Participant name, or [`USER_AUTHOR`](crate::controller::USER_AUTHOR)
    /// for messages typed by the human.
    pub author: String,
    pub content: String,
    /// Monotonic position in the conversation, assigned on append.
    pub sequence_index: u64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ordered sequence of [`ChatMessage`]s for one session.
#[derive(Debug, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        ChatHistory {
            messages: Vec::new(),
        }
    }

    /// Rebuild a history from previously persisted messages.
    ///
    /// The records must already satisfy the strictly-increasing, gap-free
    /// sequence invariant; anything else is rejected so a corrupt transcript
    /// cannot silently seed a session.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Result<Self, ConfigurationError> {
        for (position, message) in messages.iter().enumerate() {
            if message.sequence_index != position as u64 {
                return Err(ConfigurationError::InvalidHistory(format!(
                    "message at position {} carries sequence_index {}",
                    position, message.sequence_index
                )));
            }
        }
        Ok(ChatHistory { messages })
    }

    /// Append a new message, assigning the next sequence index.
    pub fn append(&mut self, author: impl Into<String>, content: impl Into<String>) -> &ChatMessage {
        let message = ChatMessage {
            author: author.into(),
            content: content.into(),
            sequence_index: self.messages.len() as u64,
            timestamp: Utc::now(),
        };
        self.messages.push(message);
        self.messages.last().unwrap()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    /// Render the full history oldest-first as `author: content` lines, the
    /// form the selection classifier consumes.
    pub fn render(&self) -> String {
        let mut rendered = String::new();
        for message in &self.messages {
            rendered.push_str(&message.author);
            rendered.push_str(": ");
            rendered.push_str(&message.content);
            rendered.push('\n');
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_strictly_increasing_indexes() {
        let mut history = ChatHistory::new();
        history.append("user", "hello");
        history.append("Facilitator", "hi there");
        history.append("Radiology", "scan looks clear");

        let indexes: Vec<u64> = history.iter().map(|m| m.sequence_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn from_messages_accepts_a_valid_transcript() {
        let mut source = ChatHistory::new();
        source.append("user", "hello");
        source.append("Facilitator", "hi");
        let records = source.messages().to_vec();

        let resumed = ChatHistory::from_messages(records).unwrap();
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed.last().unwrap().author, "Facilitator");
    }

    #[test]
    fn from_messages_rejects_gaps() {
        let mut source = ChatHistory::new();
        source.append("user", "hello");
        source.append("Facilitator", "hi");
        let mut records = source.messages().to_vec();
        records[1].sequence_index = 5;

        assert!(matches!(
            ChatHistory::from_messages(records),
            Err(ConfigurationError::InvalidHistory(_))
        ));
    }

    #[test]
    fn render_is_oldest_first() {
        let mut history = ChatHistory::new();
        history.append("user", "first");
        history.append("Facilitator", "second");

        let rendered = history.render();
        assert!(rendered.starts_with("user: first\n"));
        assert!(rendered.contains("Facilitator: second"));
    }
}
