/// Configuration management
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};

const DEFAULT_PRESENCE_CHANNEL: &str = "online-users";
const DEFAULT_FEED_CHANNEL: &str = "realtime-messages";
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Presence channel every client joins
    pub presence_channel: String,

    /// Name of the insert-feed subscription on `messages`
    pub feed_channel: String,

    /// Buffer size of the broadcast channel feeding presentation
    pub event_capacity: usize,

    /// Mark peer messages read as they arrive live, not only on attach
    pub mark_live_read: bool,

    /// Demo login email
    pub email: String,

    /// Demo display name
    pub name: String,

    /// Demo peer display name
    pub peer_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            presence_channel: DEFAULT_PRESENCE_CHANNEL.to_string(),
            feed_channel: DEFAULT_FEED_CHANNEL.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            mark_live_read: true,
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            peer_name: "Bob".to_string(),
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--email" => {
                    config.email = flag_value(args, i, "--email")?;
                    i += 2;
                }
                "--name" => {
                    config.name = flag_value(args, i, "--name")?;
                    i += 2;
                }
                "--peer-name" => {
                    config.peer_name = flag_value(args, i, "--peer-name")?;
                    i += 2;
                }
                "--presence-channel" => {
                    config.presence_channel = flag_value(args, i, "--presence-channel")?;
                    i += 2;
                }
                "--event-capacity" => {
                    let v = flag_value(args, i, "--event-capacity")?;
                    config.event_capacity = v.parse::<usize>().map_err(|_| {
                        SyncError::Config("--event-capacity must be a positive number".to_string())
                    })?;
                    i += 2;
                }
                "--no-live-read" => {
                    config.mark_live_read = false;
                    i += 1;
                }
                other => {
                    return Err(SyncError::Config(format!(
                        "Unknown argument: {}. Usage: {} [--email <email>] [--name <name>] [--peer-name <name>] [--presence-channel <name>] [--event-capacity <n>] [--no-live-read]",
                        other,
                        args.first().map(String::as_str).unwrap_or("chatsync")
                    )));
                }
            }
        }

        // Env overrides
        if let Ok(channel) = std::env::var("CHATSYNC_PRESENCE_CHANNEL") {
            if !channel.is_empty() {
                config.presence_channel = channel;
            }
        }
        if let Ok(channel) = std::env::var("CHATSYNC_FEED_CHANNEL") {
            if !channel.is_empty() {
                config.feed_channel = channel;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(SyncError::Config("event capacity must be at least 1".to_string()));
        }
        if self.presence_channel.trim().is_empty() {
            return Err(SyncError::Config("presence channel name is empty".to_string()));
        }
        if self.feed_channel.trim().is_empty() {
            return Err(SyncError::Config("feed channel name is empty".to_string()));
        }
        Ok(())
    }
}

fn flag_value(args: &[String], i: usize, flag: &str) -> Result<String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| SyncError::Config(format!("{} requires an argument", flag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_without_flags() {
        let config = Config::from_args(&args(&["chatsync"])).unwrap();
        assert_eq!(config.event_capacity, 256);
        assert!(config.mark_live_read);
    }

    #[test]
    fn test_flags_are_parsed() {
        let config = Config::from_args(&args(&[
            "chatsync",
            "--email",
            "carol@example.com",
            "--event-capacity",
            "8",
            "--no-live-read",
        ]))
        .unwrap();
        assert_eq!(config.email, "carol@example.com");
        assert_eq!(config.event_capacity, 8);
        assert!(!config.mark_live_read);
    }

    #[test]
    fn test_missing_flag_value() {
        let err = Config::from_args(&args(&["chatsync", "--name"])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Config::from_args(&args(&["chatsync", "--event-capacity", "0"])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Config::from_args(&args(&["chatsync", "--bogus"])).is_err());
    }
}
