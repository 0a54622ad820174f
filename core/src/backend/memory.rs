/// In-process backend: auth, row store, insert feed and presence in one
/// value. Drives the test suite and the demo binary; also offers hooks to
/// inject failures, duplicate deliveries and slow loads.
use super::{
    AuthBackend, AuthSession, ChangeFeed, MessageFilter, Order, PresenceEvent, PresenceTransport,
    ReadMatch, RowStore, SubscriptionId, UserFilter,
};
use crate::error::{Result, SyncError};
use crate::messenger_types::{Message, NewMessage, User};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Backend operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SignUp,
    SignIn,
    GetSession,
    SelectMessages,
    SelectUsers,
    InsertMessage,
    InsertUser,
    MarkRead,
    SubscribeInserts,
    Join,
    Track,
    Leave,
}

struct Account {
    password: String,
    user_id: String,
}

#[derive(Default)]
struct PresenceRoom {
    listeners: Vec<(String, mpsc::UnboundedSender<PresenceEvent>)>,
    tracked: BTreeSet<String>,
}

impl PresenceRoom {
    fn broadcast(&mut self, event: &PresenceEvent) {
        self.listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    session: Option<AuthSession>,
    users: Vec<User>,
    messages: Vec<Message>,
    feed: HashMap<SubscriptionId, mpsc::UnboundedSender<Message>>,
    next_subscription: SubscriptionId,
    rooms: HashMap<String, PresenceRoom>,
    failing: HashSet<Op>,
    calls: HashMap<Op, usize>,
}

impl Inner {
    /// Count the call and fail it if injected
    fn enter(&mut self, op: Op) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.failing.remove(&op) {
            return Err(SyncError::Transport(format!("injected failure for {:?}", op)));
        }
        Ok(())
    }

    fn fan_out(&mut self, message: &Message) {
        self.feed.retain(|_, tx| tx.send(message.clone()).is_ok());
    }
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    select_gate: watch::Sender<bool>,
    insert_gate: watch::Sender<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (select_gate, _) = watch::channel(true);
        let (insert_gate, _) = watch::channel(true);
        Self {
            inner: Mutex::new(Inner::default()),
            select_gate,
            insert_gate,
        }
    }

    /// Register an account plus its `users` row without touching the session
    pub async fn seed_user(&self, name: &str, email: &str, password: &str) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock().await;
        inner.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user_id: user.id.clone(),
            },
        );
        inner.users.push(user.clone());
        user
    }

    /// Store a row without emitting an insert event (pre-existing history)
    pub async fn seed_message(&self, message: Message) {
        self.inner.lock().await.messages.push(message);
    }

    /// Store a row if new and emit it on the insert feed
    pub async fn deliver(&self, message: Message) {
        let mut inner = self.inner.lock().await;
        if !inner.messages.iter().any(|m| m.id == message.id) {
            inner.messages.push(message.clone());
        }
        inner.fan_out(&message);
    }

    /// Emit an already-stored row again (at-least-once delivery)
    pub async fn redeliver(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(message) = inner.messages.iter().find(|m| m.id == message_id).cloned() else {
            return false;
        };
        inner.fan_out(&message);
        true
    }

    /// Push a raw event to every listener on `channel`
    pub async fn presence_event(&self, channel: &str, event: PresenceEvent) {
        let mut inner = self.inner.lock().await;
        if let Some(room) = inner.rooms.get_mut(channel) {
            room.broadcast(&event);
        }
    }

    /// Make the next call of `op` fail with a transport error
    pub async fn fail_next(&self, op: Op) {
        self.inner.lock().await.failing.insert(op);
    }

    pub async fn calls(&self, op: Op) -> usize {
        self.inner.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Poll until `op` was called at least `n` times
    pub async fn wait_for_calls(&self, op: Op, n: usize) {
        while self.calls(op).await < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn feed_subscribers(&self) -> usize {
        self.inner.lock().await.feed.len()
    }

    /// Park message selects until [`MemoryBackend::release_selects`]
    pub fn hold_selects(&self) {
        self.select_gate.send_replace(false);
    }

    pub fn release_selects(&self) {
        self.select_gate.send_replace(true);
    }

    /// Park message inserts until [`MemoryBackend::release_inserts`]
    pub fn hold_inserts(&self) {
        self.insert_gate.send_replace(false);
    }

    pub fn release_inserts(&self) {
        self.insert_gate.send_replace(true);
    }

    async fn wait_gate(gate: &watch::Sender<bool>, name: &str) -> Result<()> {
        let mut rx = gate.subscribe();
        rx.wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::Transport(format!("{} gate closed: {}", name, e)))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::SignUp)?;
        if inner.accounts.contains_key(email) {
            return Err(SyncError::Transport("User already registered".to_string()));
        }
        let user_id = Uuid::new_v4().to_string();
        inner.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user_id: user_id.clone(),
            },
        );
        let session = AuthSession {
            user_id,
            email: email.to_string(),
            access_token: Uuid::new_v4().to_string(),
        };
        inner.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::SignIn)?;
        let user_id = match inner.accounts.get(email) {
            Some(account) if account.password == password => account.user_id.clone(),
            _ => return Err(SyncError::Transport("Invalid login credentials".to_string())),
        };
        let session = AuthSession {
            user_id,
            email: email.to_string(),
            access_token: Uuid::new_v4().to_string(),
        };
        inner.session = Some(session.clone());
        Ok(session)
    }

    async fn get_session(&self) -> Result<Option<AuthSession>> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::GetSession)?;
        Ok(inner.session.clone())
    }
}

#[async_trait]
impl RowStore for MemoryBackend {
    async fn select_messages(
        &self,
        filter: MessageFilter,
        order: Option<Order>,
    ) -> Result<Vec<Message>> {
        self.inner.lock().await.enter(Op::SelectMessages)?;
        Self::wait_gate(&self.select_gate, "select").await?;

        let inner = self.inner.lock().await;
        let mut rows: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| match &filter {
                MessageFilter::All => true,
                MessageFilter::Conversation(key) => &m.conversation_key() == key,
                MessageFilter::UnreadFor { receiver_id } => {
                    &m.receiver_id == receiver_id && !m.read_status
                }
            })
            .cloned()
            .collect();

        // Stable sort keeps insertion order on equal timestamps
        if let Some(Order::CreatedAtAsc) = order {
            rows.sort_by_key(|m| m.created_at);
        }
        debug!(?filter, rows = rows.len(), "select messages");
        Ok(rows)
    }

    async fn select_users(&self, filter: UserFilter) -> Result<Vec<User>> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::SelectUsers)?;
        Ok(inner
            .users
            .iter()
            .filter(|u| match &filter {
                UserFilter::All => true,
                UserFilter::Id(id) => &u.id == id,
                UserFilter::Ids(ids) => ids.contains(&u.id),
            })
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<()> {
        self.inner.lock().await.enter(Op::InsertMessage)?;
        Self::wait_gate(&self.insert_gate, "insert").await?;

        let mut inner = self.inner.lock().await;
        let row = Message {
            id: Uuid::new_v4().to_string(),
            content: message.content,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            created_at: message.created_at,
            read_status: false,
        };
        inner.messages.push(row.clone());
        inner.fan_out(&row);
        Ok(())
    }

    async fn insert_user(&self, user: User) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::InsertUser)?;
        if inner.users.iter().any(|u| u.id == user.id) {
            return Err(SyncError::Transport(format!("duplicate user id {}", user.id)));
        }
        inner.users.push(user);
        Ok(())
    }

    async fn mark_read(&self, matching: ReadMatch) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::MarkRead)?;
        let mut updated = 0;
        for m in inner.messages.iter_mut().filter(|m| {
            m.sender_id == matching.sender_id && m.receiver_id == matching.receiver_id && !m.read_status
        }) {
            m.mark_read();
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe_inserts(
        &self,
        channel: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Message>)> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::SubscribeInserts)?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.next_subscription += 1;
        let id = inner.next_subscription;
        inner.feed.insert(id, tx);
        debug!(channel, id, "insert feed subscribed");
        Ok((id, rx))
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().await.feed.remove(&id);
    }
}

#[async_trait]
impl PresenceTransport for MemoryBackend {
    async fn join(
        &self,
        channel: &str,
        key: &str,
    ) -> Result<mpsc::UnboundedReceiver<PresenceEvent>> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::Join)?;
        let room = inner.rooms.entry(channel.to_string()).or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = PresenceEvent::Sync {
            keys: room.tracked.iter().cloned().collect(),
        };
        let _ = tx.send(snapshot);
        room.listeners.push((key.to_string(), tx));
        Ok(rx)
    }

    async fn track(&self, channel: &str, key: &str, _payload: serde_json::Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::Track)?;
        let room = inner.rooms.entry(channel.to_string()).or_default();
        if room.tracked.insert(key.to_string()) {
            room.broadcast(&PresenceEvent::Join { key: key.to_string() });
        }
        Ok(())
    }

    async fn leave(&self, channel: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(Op::Leave)?;
        if let Some(room) = inner.rooms.get_mut(channel) {
            room.listeners.retain(|(k, _)| k != key);
            if room.tracked.remove(key) {
                room.broadcast(&PresenceEvent::Leave { key: key.to_string() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger_types::ConversationKey;

    fn new_message(from: &str, to: &str, content: &str) -> NewMessage {
        NewMessage {
            content: content.to_string(),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_fans_out_to_feed() {
        let backend = MemoryBackend::new();
        let (_, mut rx) = backend.subscribe_inserts("feed").await.unwrap();
        backend.insert_message(new_message("a", "b", "hi")).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.content, "hi");
        assert!(!got.read_status);
    }

    #[tokio::test]
    async fn test_conversation_filter_matches_both_directions() {
        let backend = MemoryBackend::new();
        backend.insert_message(new_message("a", "b", "1")).await.unwrap();
        backend.insert_message(new_message("b", "a", "2")).await.unwrap();
        backend.insert_message(new_message("a", "c", "3")).await.unwrap();
        let rows = backend
            .select_messages(
                MessageFilter::Conversation(ConversationKey::new("b", "a")),
                Some(Order::CreatedAtAsc),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let backend = MemoryBackend::new();
        backend.fail_next(Op::SelectUsers).await;
        assert!(backend.select_users(UserFilter::All).await.is_err());
        assert!(backend.select_users(UserFilter::All).await.is_ok());
        assert_eq!(backend.calls(Op::SelectUsers).await, 2);
    }

    #[tokio::test]
    async fn test_mark_read_only_touches_matching_unread() {
        let backend = MemoryBackend::new();
        backend.insert_message(new_message("p", "me", "x")).await.unwrap();
        backend.insert_message(new_message("me", "p", "y")).await.unwrap();
        let matching = ReadMatch {
            sender_id: "p".to_string(),
            receiver_id: "me".to_string(),
        };
        assert_eq!(backend.mark_read(matching.clone()).await.unwrap(), 1);
        assert_eq!(backend.mark_read(matching).await.unwrap(), 0);
        let unread_for_p = backend
            .select_messages(MessageFilter::UnreadFor { receiver_id: "p".to_string() }, None)
            .await
            .unwrap();
        assert_eq!(unread_for_p.len(), 1);
    }

    #[tokio::test]
    async fn test_join_receives_sync_then_join_events() {
        let backend = MemoryBackend::new();
        backend.track("room", "x", serde_json::json!({})).await.unwrap();
        let mut rx = backend.join("room", "me").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            PresenceEvent::Sync { keys: vec!["x".to_string()] }
        );
        backend.track("room", "me", serde_json::json!({})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), PresenceEvent::Join { key: "me".to_string() });
    }

    #[tokio::test]
    async fn test_sign_in_rejects_bad_password() {
        let backend = MemoryBackend::new();
        backend.seed_user("Alice", "alice@example.com", "pw").await;
        assert!(backend.sign_in_with_password("alice@example.com", "nope").await.is_err());
        let session = backend.sign_in_with_password("alice@example.com", "pw").await.unwrap();
        assert_eq!(backend.get_session().await.unwrap(), Some(session));
    }
}
