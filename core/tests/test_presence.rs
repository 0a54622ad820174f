/// Presence tracker tests over the in-process backend
extern crate chatsync_core;

use chatsync_core::backend::memory::Op;
use chatsync_core::backend::PresenceEvent;
use chatsync_core::presence::PresenceTracker;
use chatsync_core::utils::EventEmitter;
use chatsync_core::{MemoryBackend, SharedBackend, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const CHANNEL: &str = "online-users";

fn tracker(memory: &Arc<MemoryBackend>) -> PresenceTracker {
    let backend: SharedBackend = memory.clone();
    PresenceTracker::new(backend, CHANNEL, EventEmitter::new(64))
}

async fn wait_online(tracker: &PresenceTracker, id: &str, expected: bool) {
    timeout(Duration::from_secs(2), async {
        while tracker.is_online(id).await != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never became online={}", id, expected));
}

#[tokio::test]
async fn test_attach_announces_self() {
    let memory = Arc::new(MemoryBackend::new());
    let alice = tracker(&memory);
    let bob = tracker(&memory);

    alice.attach("alice").await.unwrap();
    wait_online(&alice, "alice", true).await;

    bob.attach("bob").await.unwrap();
    wait_online(&alice, "bob", true).await;
    // Bob's initial sync already lists Alice
    wait_online(&bob, "alice", true).await;
}

#[tokio::test]
async fn test_peer_leave_is_observed() {
    let memory = Arc::new(MemoryBackend::new());
    let alice = tracker(&memory);
    let bob = tracker(&memory);
    alice.attach("alice").await.unwrap();
    bob.attach("bob").await.unwrap();
    wait_online(&alice, "bob", true).await;

    bob.detach().await;
    wait_online(&alice, "bob", false).await;
    assert!(!bob.is_attached().await);
}

#[tokio::test]
async fn test_detach_keeps_last_snapshot() {
    let memory = Arc::new(MemoryBackend::new());
    let alice = tracker(&memory);
    let bob = tracker(&memory);
    alice.attach("alice").await.unwrap();
    bob.attach("bob").await.unwrap();
    wait_online(&alice, "bob", true).await;

    alice.detach().await;
    let snapshot = alice.snapshot().await;
    assert_eq!(snapshot.get("bob"), Some(&true));
    assert_eq!(snapshot.get("alice"), Some(&true));
}

#[tokio::test]
async fn test_join_leave_then_sync_restores() {
    let memory = Arc::new(MemoryBackend::new());
    let alice = tracker(&memory);
    alice.attach("alice").await.unwrap();
    wait_online(&alice, "alice", true).await;

    memory.presence_event(CHANNEL, PresenceEvent::Join { key: "x".to_string() }).await;
    wait_online(&alice, "x", true).await;
    memory.presence_event(CHANNEL, PresenceEvent::Leave { key: "x".to_string() }).await;
    wait_online(&alice, "x", false).await;

    // A reconnect sync is the source of truth
    memory
        .presence_event(CHANNEL, PresenceEvent::Sync { keys: vec!["x".to_string()] })
        .await;
    wait_online(&alice, "x", true).await;
    wait_online(&alice, "alice", false).await;
    assert_eq!(alice.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_join_failure_leaves_tracker_unattached() {
    let memory = Arc::new(MemoryBackend::new());
    let alice = tracker(&memory);

    memory.fail_next(Op::Join).await;
    let err = alice.attach("alice").await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
    assert!(!alice.is_attached().await);
    assert_eq!(memory.calls(Op::Track).await, 0);

    alice.attach("alice").await.unwrap();
    assert!(alice.is_attached().await);
    wait_online(&alice, "alice", true).await;
}

#[tokio::test]
async fn test_track_failure_leaves_tracker_unattached() {
    let memory = Arc::new(MemoryBackend::new());
    let alice = tracker(&memory);

    memory.fail_next(Op::Track).await;
    let err = alice.attach("alice").await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
    assert!(!alice.is_attached().await);
    assert_eq!(memory.calls(Op::Leave).await, 1);

    // Joined channel was left, so later events do not reach the set
    memory.presence_event(CHANNEL, PresenceEvent::Join { key: "late".to_string() }).await;
    sleep(Duration::from_millis(20)).await;
    assert!(!alice.is_online("late").await);

    alice.attach("alice").await.unwrap();
    assert!(alice.is_attached().await);
    wait_online(&alice, "alice", true).await;
}

#[tokio::test]
async fn test_events_after_detach_are_not_applied() {
    let memory = Arc::new(MemoryBackend::new());
    let alice = tracker(&memory);
    alice.attach("alice").await.unwrap();
    wait_online(&alice, "alice", true).await;
    alice.detach().await;

    memory.presence_event(CHANNEL, PresenceEvent::Join { key: "late".to_string() }).await;
    sleep(Duration::from_millis(20)).await;
    assert!(!alice.is_online("late").await);
}
