/// ChatSync - realtime direct-message synchronization engine
///
/// Keeps presence, per-conversation summaries and the open conversation's
/// history in step with a hosted, multi-writer message log.

pub mod backend;
pub mod client;
pub mod config;
pub mod conversations;
pub mod error;
pub mod messenger_types;
pub mod presence;
pub mod roster;
pub mod session;
pub mod stream;
pub mod unread;
pub mod utils;

pub use backend::{Backend, MemoryBackend, SharedBackend};
pub use client::ChatClient;
pub use config::Config;
pub use error::{Result, SyncError};
