/// Unread filter: peers who sent us something we have not read yet.
///
/// Pull-only. The result reflects the store at the time of the call; live
/// inserts show up on the next recompute.
use crate::backend::{MessageFilter, SharedBackend, UserFilter};
use crate::error::Result;
use crate::messenger_types::{Component, Message, User};
use crate::utils::EventEmitter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Which peers the conversation list shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListFilter {
    #[default]
    All,
    Unread,
}

/// Distinct senders in first-seen order
pub fn unread_senders(rows: &[Message]) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|m| seen.insert(m.sender_id.as_str()))
        .map(|m| m.sender_id.clone())
        .collect()
}

#[derive(Clone)]
pub struct UnreadFilter {
    backend: SharedBackend,
    events: EventEmitter,
}

impl UnreadFilter {
    pub fn new(backend: SharedBackend, events: EventEmitter) -> Self {
        Self { backend, events }
    }

    pub async fn compute_unread(&self, identity: &str) -> Result<Vec<User>> {
        let rows = self
            .backend
            .select_messages(
                MessageFilter::UnreadFor {
                    receiver_id: identity.to_string(),
                },
                None,
            )
            .await
            .map_err(|e| self.report(e))?;

        let senders = unread_senders(&rows);
        if senders.is_empty() {
            return Ok(Vec::new());
        }
        debug!("{} unread messages from {} senders", rows.len(), senders.len());

        let mut users = self
            .backend
            .select_users(UserFilter::Ids(senders.clone()))
            .await
            .map_err(|e| self.report(e))?;
        users.sort_by_key(|u| senders.iter().position(|s| s == &u.id));
        Ok(users)
    }

    fn report(&self, e: crate::error::SyncError) -> crate::error::SyncError {
        warn!("Error fetching unread messages: {}", e);
        self.events.emit_error(Component::Unread, &e);
        e
    }
}
