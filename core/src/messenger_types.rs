/// Shared types for the messenger layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A row of the `users` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A row of the `messages` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_status: bool,
}

impl Message {
    /// Exactly one sender and one receiver, both non-empty and distinct
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty()
            && !self.sender_id.is_empty()
            && !self.receiver_id.is_empty()
            && self.sender_id != self.receiver_id
    }

    /// True if the message travels between `a` and `b`, in either direction
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// Flip `read_status` to true. Never reverts.
    pub fn mark_read(&mut self) {
        self.read_status = true;
    }

    /// Unordered pair key of this conversation
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.receiver_id)
    }
}

/// Insert payload for `messages`; the store assigns `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: DateTime<Utc>,
}

/// Canonical key for an unordered pair of identities
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { low: a.to_string(), high: b.to_string() }
        } else {
            Self { low: b.to_string(), high: a.to_string() }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.low == id || self.high == id
    }
}

/// Conversation partner of `message` as seen by `self_id`.
///
/// Returns `None` when the message does not involve `self_id` at all, so
/// callers consuming the global insert feed can drop unrelated rows.
pub fn partner_of<'a>(message: &'a Message, self_id: &str) -> Option<&'a str> {
    if message.sender_id == self_id {
        Some(message.receiver_id.as_str())
    } else if message.receiver_id == self_id {
        Some(message.sender_id.as_str())
    } else {
        None
    }
}

/// Summary of one conversation thread (for the list view)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The other party's identity
    pub partner_id: String,
    /// Content of the latest message
    pub last_content: String,
    /// Timestamp of the latest message
    pub last_time: Option<DateTime<Utc>>,
}

/// Lifecycle of a [`crate::stream::MessageStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Detached,
    Loading,
    Live,
}

/// Which component raised a [`SyncEvent::ComponentError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Session,
    Presence,
    Conversations,
    Unread,
    Roster,
    Stream,
}

/// Change notifications pushed to presentation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The signed-in identity changed
    SessionChanged { user_id: Option<String> },
    /// The online set changed
    PresenceChanged { online: HashMap<String, bool> },
    /// A conversation summary moved forward
    SummaryUpdated { summary: ConversationSummary },
    /// A message entered the open conversation
    MessageAdded { message: Message },
    /// The open conversation changed lifecycle state
    StreamStateChanged { peer_id: Option<String>, state: StreamState },
    /// A component failed; the others keep running
    ComponentError { component: Component, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: &str, receiver: &str) -> Message {
        Message {
            id: "m1".to_string(),
            content: "hello".to_string(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            created_at: Utc::now(),
            read_status: false,
        }
    }

    #[test]
    fn test_partner_of_both_directions() {
        assert_eq!(partner_of(&msg("me", "peer"), "me"), Some("peer"));
        assert_eq!(partner_of(&msg("peer", "me"), "me"), Some("peer"));
        assert_eq!(partner_of(&msg("x", "y"), "me"), None);
    }

    #[test]
    fn test_conversation_key_is_unordered() {
        assert_eq!(msg("a", "b").conversation_key(), msg("b", "a").conversation_key());
        assert!(msg("a", "b").conversation_key().contains("b"));
    }

    #[test]
    fn test_self_message_is_malformed() {
        assert!(!msg("a", "a").is_well_formed());
        assert!(msg("a", "b").is_well_formed());
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut m = msg("a", "b");
        m.mark_read();
        let once = m.clone();
        m.mark_read();
        assert_eq!(m, once);
        assert!(m.read_status);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SyncEvent::StreamStateChanged {
            peer_id: Some("p".to_string()),
            state: StreamState::Live,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream_state_changed");
        assert_eq!(json["state"], "live");
    }
}
