/// Presence tracking: who is online right now
use crate::backend::{PresenceEvent, SharedBackend};
use crate::error::Result;
use crate::messenger_types::{Component, SyncEvent};
use crate::utils::EventEmitter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Online identities as last reported by the presence channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    online: HashMap<String, bool>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one channel event. Returns true if membership changed.
    ///
    /// `Sync` replaces the whole set; `Join`/`Leave` edit the set built by
    /// the last sync.
    pub fn apply(&mut self, event: &PresenceEvent) -> bool {
        match event {
            PresenceEvent::Sync { keys } => {
                let next: HashMap<String, bool> =
                    keys.iter().map(|k| (k.clone(), true)).collect();
                if next == self.online {
                    return false;
                }
                self.online = next;
                true
            }
            PresenceEvent::Join { key } => self.online.insert(key.clone(), true).is_none(),
            PresenceEvent::Leave { key } => self.online.remove(key).is_some(),
        }
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.online.get(id).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, bool> {
        self.online.clone()
    }
}

struct Attachment {
    key: String,
    task: JoinHandle<()>,
}

/// Joins the presence channel under the local identity and keeps a
/// [`PresenceSet`] in step with the channel's events.
#[derive(Clone)]
pub struct PresenceTracker {
    backend: SharedBackend,
    channel: String,
    events: EventEmitter,
    set: Arc<RwLock<PresenceSet>>,
    attachment: Arc<Mutex<Option<Attachment>>>,
    generation: Arc<AtomicU64>,
}

impl PresenceTracker {
    pub fn new(backend: SharedBackend, channel: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            backend,
            channel: channel.into(),
            events,
            set: Arc::new(RwLock::new(PresenceSet::new())),
            attachment: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Join the channel as `identity` and announce self as online.
    ///
    /// On a join failure the tracker stays unattached; call again to retry.
    pub async fn attach(&self, identity: &str) -> Result<()> {
        let mut attachment = self.attachment.lock().await;
        if let Some(previous) = attachment.take() {
            self.release(previous).await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut rx = match self.backend.join(&self.channel, identity).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Presence join on {} failed: {}", self.channel, e);
                self.events.emit_error(Component::Presence, &e);
                return Err(e);
            }
        };

        let task = {
            let set = self.set.clone();
            let events = self.events.clone();
            let current = self.generation.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if current.load(Ordering::SeqCst) != generation {
                        debug!("Dropping presence event from stale attachment");
                        break;
                    }
                    let mut set = set.write().await;
                    if set.apply(&event) {
                        events.emit(SyncEvent::PresenceChanged { online: set.to_map() });
                    }
                }
            })
        };

        *attachment = Some(Attachment {
            key: identity.to_string(),
            task,
        });
        info!("Joined presence channel {} as {}", self.channel, identity);

        if let Err(e) = self
            .backend
            .track(&self.channel, identity, serde_json::json!({ "online": true }))
            .await
        {
            warn!("Presence track failed: {}", e);
            if let Some(joined) = attachment.take() {
                self.release(joined).await;
            }
            self.events.emit_error(Component::Presence, &e);
            return Err(e);
        }
        Ok(())
    }

    /// Leave the channel. The last known set stays readable.
    pub async fn detach(&self) {
        if let Some(previous) = self.attachment.lock().await.take() {
            self.release(previous).await;
        }
    }

    async fn release(&self, attachment: Attachment) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        attachment.task.abort();
        if let Err(e) = self.backend.leave(&self.channel, &attachment.key).await {
            warn!("Presence leave failed: {}", e);
        }
        info!("Left presence channel {}", self.channel);
    }

    pub async fn is_attached(&self) -> bool {
        self.attachment.lock().await.is_some()
    }

    pub async fn snapshot(&self) -> HashMap<String, bool> {
        self.set.read().await.to_map()
    }

    pub async fn is_online(&self, id: &str) -> bool {
        self.set.read().await.is_online(id)
    }
}
