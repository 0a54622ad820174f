/// Session context: who is signed in, for the lifetime of the process.
///
/// Absence of a session is a state, not an error. Dependents call
/// [`SessionContext::require`] before touching the backend and get
/// `SyncError::Unauthenticated` instead of issuing I/O.
use crate::backend::{AuthSession, SharedBackend};
use crate::error::{Result, SyncError};
use crate::messenger_types::{Component, SyncEvent, User};
use crate::utils::EventEmitter;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone)]
pub struct SessionContext {
    backend: SharedBackend,
    current: Arc<watch::Sender<Option<AuthSession>>>,
    events: EventEmitter,
}

impl SessionContext {
    pub fn new(backend: SharedBackend, events: EventEmitter) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            backend,
            current: Arc::new(tx),
            events,
        }
    }

    /// Current session, if any
    pub fn current(&self) -> Option<AuthSession> {
        self.current.borrow().clone()
    }

    /// Current identity, if any
    pub fn user_id(&self) -> Option<String> {
        self.current.borrow().as_ref().map(|s| s.user_id.clone())
    }

    /// Identity or `Unauthenticated`
    pub fn require(&self) -> Result<String> {
        self.user_id().ok_or(SyncError::Unauthenticated)
    }

    /// Change notification; the receiver sees every later session swap
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthSession>> {
        self.current.subscribe()
    }

    /// Pick up a session the auth collaborator already holds
    pub async fn resolve(&self) -> Result<Option<String>> {
        match self.backend.get_session().await {
            Ok(session) => {
                self.set(session);
                Ok(self.user_id())
            }
            Err(e) => {
                warn!("Error fetching session: {}", e);
                self.events.emit_error(Component::Session, &e);
                Err(e)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<String> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(SyncError::Validation(
                "Please enter both email and password".to_string(),
            ));
        }
        let session = self.backend.sign_in_with_password(email, password).await?;
        let user_id = session.user_id.clone();
        info!("Signed in as {}", user_id);
        self.set(Some(session));
        Ok(user_id)
    }

    /// Create an account and its `users` row
    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<String> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(SyncError::Validation("Please fill in all fields".to_string()));
        }
        let session = self.backend.sign_up(email, password).await?;
        if session.user_id.is_empty() {
            return Err(SyncError::Transport("User ID missing after signup".to_string()));
        }

        let profile = User {
            id: session.user_id.clone(),
            name: name.trim().to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.backend.insert_user(profile).await.map_err(|e| {
            warn!("Error inserting user profile: {}", e);
            SyncError::Transport(format!("Failed to create user profile: {}", e))
        })?;

        let user_id = session.user_id.clone();
        info!("Signed up {}", user_id);
        self.set(Some(session));
        Ok(user_id)
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    fn set(&self, session: Option<AuthSession>) {
        let user_id = session.as_ref().map(|s| s.user_id.clone());
        let changed = self.current.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                *current = session;
                true
            }
        });
        if changed {
            self.events.emit(SyncEvent::SessionChanged { user_id });
        }
    }
}
