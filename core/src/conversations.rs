/// Conversation index: latest message per partner, for the list view
use crate::backend::{MessageFilter, SharedBackend, SubscriptionId};
use crate::error::Result;
use crate::messenger_types::{partner_of, Component, ConversationSummary, Message, SyncEvent};
use crate::session::SessionContext;
use crate::utils::EventEmitter;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-partner summaries under the "greater timestamp wins" rule.
///
/// Each entry only ever moves forward in time. Equal timestamps go to the
/// later observation, there being no secondary key to order by.
#[derive(Debug, Clone, Default)]
pub struct SummaryMap {
    by_partner: HashMap<String, ConversationSummary>,
}

impl SummaryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new summary if it replaced the old one
    pub fn merge(
        &mut self,
        partner_id: &str,
        content: &str,
        time: DateTime<Utc>,
    ) -> Option<ConversationSummary> {
        if let Some(existing) = self.by_partner.get(partner_id) {
            if matches!(existing.last_time, Some(last) if time < last) {
                return None;
            }
        }
        let summary = ConversationSummary {
            partner_id: partner_id.to_string(),
            last_content: content.to_string(),
            last_time: Some(time),
        };
        self.by_partner.insert(partner_id.to_string(), summary.clone());
        Some(summary)
    }

    /// Merge a message seen by `self_id`; rows not involving `self_id` are skipped
    pub fn observe(&mut self, message: &Message, self_id: &str) -> Option<ConversationSummary> {
        if !message.is_well_formed() {
            return None;
        }
        let partner = partner_of(message, self_id)?;
        self.merge(partner, &message.content, message.created_at)
    }

    pub fn get(&self, partner_id: &str) -> Option<&ConversationSummary> {
        self.by_partner.get(partner_id)
    }

    /// Most recent first; partners without a time last; ties by partner id
    pub fn ordered(&self) -> Vec<ConversationSummary> {
        let mut list: Vec<_> = self.by_partner.values().cloned().collect();
        list.sort_by(|a, b| {
            b.last_time
                .cmp(&a.last_time)
                .then_with(|| a.partner_id.cmp(&b.partner_id))
        });
        list
    }

    pub fn len(&self) -> usize {
        self.by_partner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_partner.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_partner.clear();
    }
}

#[derive(Default)]
struct IndexState {
    owner: Option<String>,
    summaries: SummaryMap,
}

impl IndexState {
    /// Summaries belong to one identity; switching identity starts over
    fn claim(&mut self, self_id: &str) {
        if self.owner.as_deref() != Some(self_id) {
            self.summaries.clear();
            self.owner = Some(self_id.to_string());
        }
    }
}

struct LiveFeed {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct ConversationIndex {
    backend: SharedBackend,
    session: SessionContext,
    feed_channel: String,
    events: EventEmitter,
    state: Arc<RwLock<IndexState>>,
    live: Arc<Mutex<Option<LiveFeed>>>,
    epoch: Arc<AtomicU64>,
}

impl ConversationIndex {
    pub fn new(
        backend: SharedBackend,
        session: SessionContext,
        feed_channel: impl Into<String>,
        events: EventEmitter,
    ) -> Self {
        Self {
            backend,
            session,
            feed_channel: feed_channel.into(),
            events,
            state: Arc::new(RwLock::new(IndexState::default())),
            live: Arc::new(Mutex::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Scan every visible message once and fold it into the summaries.
    ///
    /// The select is unscoped (the store filters nothing for this call).
    /// On failure the summaries built so far are kept.
    pub async fn load_all(&self) -> Result<usize> {
        let self_id = self.session.require()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let rows = match self.backend.select_messages(MessageFilter::All, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Error fetching messages: {}", e);
                self.events.emit_error(Component::Conversations, &e);
                return Err(e);
            }
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding conversation load that finished after detach");
            return Ok(0);
        }

        let mut state = self.state.write().await;
        if self.session.user_id().as_deref() != Some(self_id.as_str()) {
            debug!("Discarding conversation load for {}: session changed", self_id);
            return Ok(0);
        }
        state.claim(&self_id);
        let mut updated = Vec::new();
        for message in &rows {
            if let Some(summary) = state.summaries.observe(message, &self_id) {
                updated.push(summary);
            }
        }
        let partners = state.summaries.len();
        drop(state);

        for summary in updated {
            self.events.emit(SyncEvent::SummaryUpdated { summary });
        }
        info!("Indexed {} messages into {} conversations", rows.len(), partners);
        Ok(rows.len())
    }

    /// Merge one live insert. Returns the summary if it moved forward.
    pub async fn on_insert(&self, message: &Message) -> Option<ConversationSummary> {
        let self_id = self.session.user_id()?;
        let summary = {
            let mut state = self.state.write().await;
            state.claim(&self_id);
            state.summaries.observe(message, &self_id)?
        };
        self.events.emit(SyncEvent::SummaryUpdated {
            summary: summary.clone(),
        });
        Some(summary)
    }

    /// Subscribe to the global insert feed
    pub async fn start_live(&self) -> Result<()> {
        self.session.require()?;
        let mut live = self.live.lock().await;
        if live.is_some() {
            return Ok(());
        }

        let (subscription, mut rx) = match self.backend.subscribe_inserts(&self.feed_channel).await
        {
            Ok(sub) => sub,
            Err(e) => {
                warn!("Insert feed subscribe failed: {}", e);
                self.events.emit_error(Component::Conversations, &e);
                return Err(e);
            }
        };

        let epoch = self.epoch.load(Ordering::SeqCst);
        let task = {
            let index = self.clone();
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    if index.epoch.load(Ordering::SeqCst) != epoch {
                        break;
                    }
                    index.on_insert(&message).await;
                }
            })
        };
        *live = Some(LiveFeed { subscription, task });
        info!("Conversation index listening on {}", self.feed_channel);
        Ok(())
    }

    /// Stop the live feed; summaries stay readable
    pub async fn detach(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(feed) = self.live.lock().await.take() {
            feed.task.abort();
            self.backend.unsubscribe(feed.subscription).await;
            info!("Conversation index detached");
        }
    }

    pub async fn is_live(&self) -> bool {
        self.live.lock().await.is_some()
    }

    pub async fn summary(&self, partner_id: &str) -> Option<ConversationSummary> {
        self.state.read().await.summaries.get(partner_id).cloned()
    }

    pub async fn ordered(&self) -> Vec<ConversationSummary> {
        self.state.read().await.summaries.ordered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    fn msg(id: &str, from: &str, to: &str, content: &str, time: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            content: content.to_string(),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            created_at: time,
            read_status: false,
        }
    }

    #[test]
    fn test_latest_message_wins() {
        let mut map = SummaryMap::new();
        map.observe(&msg("1", "p", "me", "first", at(10, 0)), "me");
        map.observe(&msg("2", "p", "me", "second", at(10, 5)), "me");
        let s = map.get("p").unwrap();
        assert_eq!(s.last_content, "second");
        assert_eq!(s.last_time, Some(at(10, 5)));
    }

    #[test]
    fn test_late_older_event_does_not_overwrite() {
        let mut map = SummaryMap::new();
        map.observe(&msg("2", "me", "p", "newer", at(10, 5)), "me");
        assert!(map.observe(&msg("1", "p", "me", "older", at(10, 0)), "me").is_none());
        assert_eq!(map.get("p").unwrap().last_content, "newer");
    }

    #[test]
    fn test_equal_timestamps_last_write_wins() {
        let mut map = SummaryMap::new();
        map.observe(&msg("1", "p", "me", "a", at(9, 0)), "me");
        map.observe(&msg("2", "me", "p", "b", at(9, 0)), "me");
        assert_eq!(map.get("p").unwrap().last_content, "b");
    }

    #[test]
    fn test_replay_is_idempotent_in_any_order() {
        let rows = vec![
            msg("1", "p", "me", "a", at(8, 0)),
            msg("2", "me", "p", "b", at(11, 0)),
            msg("3", "q", "me", "c", at(9, 0)),
            msg("4", "p", "me", "d", at(10, 0)),
        ];
        let mut forward = SummaryMap::new();
        let mut backward = SummaryMap::new();
        for m in &rows {
            forward.observe(m, "me");
        }
        for m in rows.iter().rev().chain(rows.iter()) {
            backward.observe(m, "me");
        }
        assert_eq!(forward.ordered(), backward.ordered());
        assert_eq!(forward.get("p").unwrap().last_content, "b");
    }

    #[test]
    fn test_unrelated_pairs_are_ignored() {
        let mut map = SummaryMap::new();
        assert!(map.observe(&msg("1", "x", "y", "gossip", at(7, 0)), "me").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_ordered_most_recent_first() {
        let mut map = SummaryMap::new();
        map.observe(&msg("1", "a", "me", "old", at(7, 0)), "me");
        map.observe(&msg("2", "b", "me", "new", at(12, 0)), "me");
        let order: Vec<_> = map.ordered().into_iter().map(|s| s.partner_id).collect();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
    }
}
