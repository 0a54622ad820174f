/// Message stream of the open conversation.
///
/// `attach` subscribes to the insert feed before it queries history, so no
/// insert can fall between the two; events seen while the query is out are
/// parked in the [`Timeline`] and flushed once the ordered base is in.
pub mod grouping;
pub mod timeline;

pub use grouping::{format_message_time, group_by_day, DateGroup};
pub use timeline::Timeline;

use crate::backend::{MessageFilter, Order, ReadMatch, SharedBackend, SubscriptionId};
use crate::error::{Result, SyncError};
use crate::messenger_types::{
    Component, ConversationKey, Message, NewMessage, StreamState, SyncEvent,
};
use crate::utils::EventEmitter;
use chrono::{Local, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pair {
    self_id: String,
    peer_id: String,
}

struct Inner {
    state: StreamState,
    pair: Option<Pair>,
    timeline: Timeline,
    last_error: Option<String>,
}

struct LiveFeed {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

/// Releases the send lock when the send finishes, however it finishes
struct SendGuard(Arc<AtomicBool>);

impl Drop for SendGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct MessageStream {
    backend: SharedBackend,
    feed_channel: String,
    mark_live_read: bool,
    events: EventEmitter,
    inner: Arc<Mutex<Inner>>,
    live: Arc<Mutex<Option<LiveFeed>>>,
    generation: Arc<AtomicU64>,
    sending: Arc<AtomicBool>,
}

impl MessageStream {
    pub fn new(
        backend: SharedBackend,
        feed_channel: impl Into<String>,
        mark_live_read: bool,
        events: EventEmitter,
    ) -> Self {
        Self {
            backend,
            feed_channel: feed_channel.into(),
            mark_live_read,
            events,
            inner: Arc::new(Mutex::new(Inner {
                state: StreamState::Detached,
                pair: None,
                timeline: Timeline::new(),
                last_error: None,
            })),
            live: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            sending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the conversation `self_id <-> peer_id`: Loading, then Live.
    ///
    /// A failed query leaves the stream in Loading with the error recorded;
    /// call `attach` again to retry.
    pub async fn attach(&self, self_id: &str, peer_id: &str) -> Result<()> {
        if self_id.is_empty() || peer_id.is_empty() {
            return Err(SyncError::Validation("no peer selected".to_string()));
        }
        if self_id == peer_id {
            return Err(SyncError::Validation(
                "cannot open a conversation with yourself".to_string(),
            ));
        }

        self.stop_live().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pair = Pair {
            self_id: self_id.to_string(),
            peer_id: peer_id.to_string(),
        };

        {
            let mut inner = self.inner.lock().await;
            if inner.pair.as_ref() != Some(&pair) {
                inner.timeline = Timeline::new();
            }
            inner.timeline.begin_load();
            inner.pair = Some(pair.clone());
            inner.state = StreamState::Loading;
            inner.last_error = None;
        }
        self.emit_state(Some(peer_id), StreamState::Loading);
        info!("Opening conversation with {}", peer_id);

        let (subscription, mut rx) = match self.backend.subscribe_inserts(&self.feed_channel).await
        {
            Ok(sub) => sub,
            Err(e) => {
                self.record_failure(generation, &e).await;
                return Err(e);
            }
        };
        let task = {
            let stream = self.clone();
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    if !stream.on_feed(generation, message).await {
                        break;
                    }
                }
            })
        };
        let replaced = {
            let mut live = self.live.lock().await;
            if self.is_current(generation) {
                live.replace(LiveFeed { subscription, task })
            } else {
                // Superseded while subscribing
                Some(LiveFeed { subscription, task })
            }
        };
        if let Some(feed) = replaced {
            feed.task.abort();
            self.backend.unsubscribe(feed.subscription).await;
        }
        if !self.is_current(generation) {
            return Ok(());
        }

        let rows = match self
            .backend
            .select_messages(
                MessageFilter::Conversation(ConversationKey::new(self_id, peer_id)),
                Some(Order::CreatedAtAsc),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Error loading conversation with {}: {}", peer_id, e);
                // The retry subscribes again; nothing queues meanwhile
                self.stop_live().await;
                self.inner.lock().await.timeline.discard_pending();
                self.record_failure(generation, &e).await;
                return Err(e);
            }
        };

        let flushed = {
            let mut inner = self.inner.lock().await;
            if !self.is_current(generation) {
                debug!("Discarding history load for superseded attachment");
                return Ok(());
            }
            let rows: Vec<Message> = rows
                .into_iter()
                .filter(|m| m.is_well_formed() && m.is_between(self_id, peer_id))
                .collect();
            let count = rows.len();
            let flushed = inner.timeline.complete_load(rows);
            inner.state = StreamState::Live;
            info!(
                "Conversation with {} live: {} loaded, {} flushed from queue",
                peer_id,
                count,
                flushed.len()
            );
            flushed
        };
        self.emit_state(Some(peer_id), StreamState::Live);
        for message in flushed {
            self.events.emit(SyncEvent::MessageAdded { message });
        }

        self.mark_read(generation, &pair).await;
        Ok(())
    }

    /// Close the conversation and drop anything still queued
    pub async fn detach(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_live().await;
        let peer_id = {
            let mut inner = self.inner.lock().await;
            inner.timeline.discard_pending();
            inner.state = StreamState::Detached;
            inner.pair.take().map(|p| p.peer_id)
        };
        if let Some(peer_id) = peer_id {
            info!("Closed conversation with {}", peer_id);
            self.emit_state(Some(&peer_id), StreamState::Detached);
        }
    }

    /// Submit `content` to the attached peer.
    ///
    /// The message becomes visible only once the insert feed echoes it back.
    /// A failed insert returns `SendFailed` carrying the draft.
    pub async fn send(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(SyncError::Validation("message is empty".to_string()));
        }
        let pair = {
            let inner = self.inner.lock().await;
            match (&inner.pair, inner.state) {
                (Some(pair), StreamState::Loading | StreamState::Live) => pair.clone(),
                _ => return Err(SyncError::Validation("no peer selected".to_string())),
            }
        };

        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::Busy);
        }
        let _guard = SendGuard(self.sending.clone());

        let message = NewMessage {
            content: content.to_string(),
            sender_id: pair.self_id,
            receiver_id: pair.peer_id,
            created_at: Utc::now(),
        };
        self.backend.insert_message(message).await.map_err(|e| {
            warn!("Error sending message: {}", e);
            SyncError::SendFailed {
                draft: content.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Handle one feed event. Returns false once this attachment is stale.
    async fn on_feed(&self, generation: u64, message: Message) -> bool {
        let (added, pair) = {
            let mut inner = self.inner.lock().await;
            if !self.is_current(generation) {
                return false;
            }
            let Some(pair) = inner.pair.clone() else {
                return false;
            };
            if !message.is_well_formed() || !message.is_between(&pair.self_id, &pair.peer_id) {
                return true;
            }
            let added = inner.timeline.push_live(message.clone()).is_some();
            (added, pair)
        };

        if added {
            let incoming = message.sender_id == pair.peer_id && !message.read_status;
            self.events.emit(SyncEvent::MessageAdded { message });
            if incoming && self.mark_live_read {
                self.mark_read(generation, &pair).await;
            }
        }
        true
    }

    /// Batched `peer -> self` read update, mirrored locally on success
    async fn mark_read(&self, generation: u64, pair: &Pair) {
        let matching = ReadMatch {
            sender_id: pair.peer_id.clone(),
            receiver_id: pair.self_id.clone(),
        };
        match self.backend.mark_read(matching).await {
            Ok(updated) => {
                let mut inner = self.inner.lock().await;
                if self.is_current(generation) {
                    let flipped = inner.timeline.mark_read_from(&pair.peer_id, &pair.self_id);
                    debug!("Marked {} rows read ({} local)", updated, flipped);
                }
            }
            Err(e) => {
                warn!("Error marking messages read: {}", e);
                self.events.emit_error(Component::Stream, &e);
            }
        }
    }

    async fn record_failure(&self, generation: u64, e: &SyncError) {
        let mut inner = self.inner.lock().await;
        if self.is_current(generation) {
            inner.last_error = Some(e.to_string());
        }
        drop(inner);
        self.events.emit_error(Component::Stream, e);
    }

    async fn stop_live(&self) {
        if let Some(feed) = self.live.lock().await.take() {
            feed.task.abort();
            self.backend.unsubscribe(feed.subscription).await;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn emit_state(&self, peer_id: Option<&str>, state: StreamState) {
        self.events.emit(SyncEvent::StreamStateChanged {
            peer_id: peer_id.map(str::to_string),
            state,
        });
    }

    pub async fn state(&self) -> StreamState {
        self.inner.lock().await.state
    }

    pub async fn peer_id(&self) -> Option<String> {
        self.inner.lock().await.pair.as_ref().map(|p| p.peer_id.clone())
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.timeline.messages().to_vec()
    }

    /// Messages grouped by calendar day in the local time zone
    pub async fn groups(&self) -> Vec<DateGroup> {
        let inner = self.inner.lock().await;
        group_by_day(inner.timeline.messages(), &Local)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }
}
