/// Hosted backend contract: auth, row store, change feed, presence.
///
/// The engine never talks to a concrete service directly. One value
/// implementing [`Backend`] is created per process and handed to every
/// component as a [`SharedBackend`].
pub mod memory;

use crate::error::Result;
use crate::messenger_types::{ConversationKey, Message, NewMessage, User};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use memory::MemoryBackend;

/// Session issued by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
}

/// Row filter for `messages`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Everything the store lets the caller see
    All,
    /// Both directions of one pair
    Conversation(ConversationKey),
    /// `receiver_id = receiver AND read_status = false`
    UnreadFor { receiver_id: String },
}

/// Row filter for `users`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    All,
    Id(String),
    Ids(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    CreatedAtAsc,
}

/// Match clause of the batched read update:
/// `sender_id = sender AND receiver_id = receiver AND read_status = false`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMatch {
    pub sender_id: String,
    pub receiver_id: String,
}

/// Membership events on a presence channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// Full membership snapshot, emitted on (re)connect
    Sync { keys: Vec<String> },
    Join { key: String },
    Leave { key: String },
}

/// Handle of one change-feed subscription
pub type SubscriptionId = u64;

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession>;
    async fn get_session(&self) -> Result<Option<AuthSession>>;
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select_messages(
        &self,
        filter: MessageFilter,
        order: Option<Order>,
    ) -> Result<Vec<Message>>;
    async fn select_users(&self, filter: UserFilter) -> Result<Vec<User>>;
    async fn insert_message(&self, message: NewMessage) -> Result<()>;
    async fn insert_user(&self, user: User) -> Result<()>;
    /// Returns the number of rows flipped to read
    async fn mark_read(&self, matching: ReadMatch) -> Result<u64>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Insert events on `messages`; at-least-once, not scoped to any identity
    async fn subscribe_inserts(
        &self,
        channel: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Message>)>;
    async fn unsubscribe(&self, id: SubscriptionId);
}

#[async_trait]
pub trait PresenceTransport: Send + Sync {
    async fn join(
        &self,
        channel: &str,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<PresenceEvent>>;
    async fn track(&self, channel: &str, key: &str, payload: serde_json::Value) -> Result<()>;
    async fn leave(&self, channel: &str, key: &str) -> Result<()>;
}

/// Everything the engine consumes from the hosted service
pub trait Backend: AuthBackend + RowStore + ChangeFeed + PresenceTransport {}

impl<T> Backend for T where T: AuthBackend + RowStore + ChangeFeed + PresenceTransport {}

pub type SharedBackend = Arc<dyn Backend>;
