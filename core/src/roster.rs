/// User directory: everyone except self, with name search
use crate::backend::{SharedBackend, UserFilter};
use crate::error::{Result, SyncError};
use crate::messenger_types::{Component, User};
use crate::utils::EventEmitter;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Roster {
    backend: SharedBackend,
    events: EventEmitter,
    users: Arc<RwLock<Vec<User>>>,
}

impl Roster {
    pub fn new(backend: SharedBackend, events: EventEmitter) -> Self {
        Self {
            backend,
            events,
            users: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Load all users other than `self_id`. A failed load keeps the old list.
    pub async fn load(&self, self_id: &str) -> Result<Vec<User>> {
        let rows = match self.backend.select_users(UserFilter::All).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Error fetching users: {}", e);
                self.events.emit_error(Component::Roster, &e);
                return Err(e);
            }
        };
        let others: Vec<User> = rows.into_iter().filter(|u| u.id != self_id).collect();
        info!("Roster loaded with {} users", others.len());
        *self.users.write().await = others.clone();
        Ok(others)
    }

    /// Own profile row
    pub async fn current_user(&self, self_id: &str) -> Result<User> {
        self.backend
            .select_users(UserFilter::Id(self_id.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Transport(format!("no users row for {}", self_id)))
    }

    pub async fn users(&self) -> Vec<User> {
        self.users.read().await.clone()
    }

    /// Case-insensitive substring match on the display name
    pub async fn search(&self, query: &str) -> Vec<User> {
        let needle = query.trim().to_lowercase();
        self.users
            .read()
            .await
            .iter()
            .filter(|u| needle.is_empty() || u.name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}
