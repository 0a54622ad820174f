/// ChatSync demo: two clients on one in-process backend
use chatsync_core::messenger_types::SyncEvent;
use chatsync_core::stream::format_message_time;
use chatsync_core::{ChatClient, Config, MemoryBackend, SharedBackend};
use chrono::{Local, Utc};
use futures_util::StreamExt;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_PASSWORD: &str = "demo-password";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let memory = Arc::new(MemoryBackend::new());
    let peer_email = format!("{}@example.com", config.peer_name.to_lowercase());
    let peer = memory
        .seed_user(&config.peer_name, &peer_email, DEMO_PASSWORD)
        .await;
    let backend: SharedBackend = memory.clone();

    // Both sides share the backend, as two browsers share one hosted service
    let me = ChatClient::new(backend.clone(), &config);
    me.session
        .sign_up(&config.name, &config.email, DEMO_PASSWORD)
        .await
        .map_err(|e| anyhow::anyhow!("Sign-up failed: {}", e))?;
    let my_id = me.session.require()?;
    let report = me.start().await?;
    info!("Client started: {:?}", report);

    let other = ChatClient::new(backend, &config);
    other
        .session
        .sign_in(&peer_email, DEMO_PASSWORD)
        .await
        .map_err(|e| anyhow::anyhow!("Peer sign-in failed: {}", e))?;
    other.start().await?;

    let mut events = Box::pin(me.events());
    me.select_peer(&peer.id).await?;
    other.select_peer(&my_id).await?;

    me.send("hi").await?;
    other.send(&format!("hello {}", config.name)).await?;

    // Wait until both messages echoed back through the feed
    let mut seen = 0;
    while seen < 2 {
        match timeout(Duration::from_secs(2), events.next()).await {
            Ok(Some(SyncEvent::MessageAdded { .. })) => seen += 1,
            Ok(Some(_)) => {}
            Ok(None) => return Err(anyhow::anyhow!("event stream closed")),
            Err(_) => return Err(anyhow::anyhow!("timed out waiting for messages")),
        }
    }

    println!("Online: {:?}", me.presence.snapshot().await.keys().collect::<Vec<_>>());
    for summary in me.conversation_list().await {
        println!("{} -> {:?} at {:?}", summary.partner_id, summary.last_content, summary.last_time);
    }

    let today = Local::now().date_naive();
    let now = Utc::now();
    for group in me.stream.groups().await {
        println!("== {}", group.label(today));
        for m in &group.messages {
            let who = if m.sender_id == my_id { "me" } else { "them" };
            println!("[{}] {}: {}", format_message_time(m.created_at, now, &Local), who, m.content);
        }
    }

    other.shutdown().await;
    me.shutdown().await;
    Ok(())
}
