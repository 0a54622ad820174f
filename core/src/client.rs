/// Chat client: wires every component to one backend and one event bus
use crate::backend::SharedBackend;
use crate::config::Config;
use crate::conversations::ConversationIndex;
use crate::error::Result;
use crate::messenger_types::{ConversationSummary, SyncEvent, User};
use crate::presence::PresenceTracker;
use crate::roster::Roster;
use crate::session::SessionContext;
use crate::stream::MessageStream;
use crate::unread::{ListFilter, UnreadFilter};
use crate::utils::EventEmitter;
use futures_util::stream::Stream;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// What `start` managed to bring up; each part fails independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartReport {
    pub presence: bool,
    pub roster: bool,
    pub conversations_loaded: bool,
    pub conversations_live: bool,
}

#[derive(Clone)]
pub struct ChatClient {
    pub session: SessionContext,
    pub presence: PresenceTracker,
    pub conversations: ConversationIndex,
    pub unread: UnreadFilter,
    pub roster: Roster,
    pub stream: MessageStream,
    events: EventEmitter,
}

impl ChatClient {
    pub fn new(backend: SharedBackend, config: &Config) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        let session = SessionContext::new(backend.clone(), events.clone());
        Self {
            presence: PresenceTracker::new(
                backend.clone(),
                config.presence_channel.clone(),
                events.clone(),
            ),
            conversations: ConversationIndex::new(
                backend.clone(),
                session.clone(),
                config.feed_channel.clone(),
                events.clone(),
            ),
            unread: UnreadFilter::new(backend.clone(), events.clone()),
            roster: Roster::new(backend.clone(), events.clone()),
            stream: MessageStream::new(
                backend,
                config.feed_channel.clone(),
                config.mark_live_read,
                events.clone(),
            ),
            session,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> impl Stream<Item = SyncEvent> + Send + 'static {
        self.events.stream()
    }

    /// Bring up presence, roster and the conversation index for the
    /// signed-in identity. Only a missing session is fatal; the rest is
    /// logged and reported per part.
    pub async fn start(&self) -> Result<StartReport> {
        if self.session.user_id().is_none() {
            self.session.resolve().await?;
        }
        let me = self.session.require()?;
        info!("Starting chat client for {}", me);

        let mut report = StartReport::default();
        match self.presence.attach(&me).await {
            Ok(()) => report.presence = true,
            Err(e) => warn!("Presence unavailable: {}", e),
        }
        match self.roster.load(&me).await {
            Ok(_) => report.roster = true,
            Err(e) => warn!("Roster unavailable: {}", e),
        }
        match self.conversations.start_live().await {
            Ok(()) => report.conversations_live = true,
            Err(e) => warn!("Conversation feed unavailable: {}", e),
        }
        match self.conversations.load_all().await {
            Ok(_) => report.conversations_loaded = true,
            Err(e) => warn!("Conversation load failed: {}", e),
        }
        Ok(report)
    }

    /// Open the conversation with `peer_id`
    pub async fn select_peer(&self, peer_id: &str) -> Result<()> {
        let me = self.session.require()?;
        self.stream.attach(&me, peer_id).await
    }

    pub async fn send(&self, content: &str) -> Result<()> {
        self.session.require()?;
        self.stream.send(content).await
    }

    /// Peers for the list view under `filter`
    pub async fn visible_peers(&self, filter: ListFilter) -> Result<Vec<User>> {
        let me = self.session.require()?;
        match filter {
            ListFilter::All => Ok(self.roster.users().await),
            ListFilter::Unread => self.unread.compute_unread(&me).await,
        }
    }

    pub async fn conversation_list(&self) -> Vec<ConversationSummary> {
        self.conversations.ordered().await
    }

    /// Detach everything; last known state stays readable
    pub async fn shutdown(&self) {
        self.stream.detach().await;
        self.conversations.detach().await;
        self.presence.detach().await;
        info!("Chat client stopped");
    }
}
