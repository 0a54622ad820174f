/// Event emitter for presentation and monitoring
use crate::messenger_types::{Component, SyncEvent};
use futures_util::stream::{unfold, Stream};
use tokio::sync::broadcast;
use tracing::{trace, warn};

pub struct EventEmitter {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget; having no listeners is fine
    pub fn emit(&self, event: SyncEvent) {
        trace!(?event, "emit");
        let _ = self.tx.send(event);
    }

    pub fn emit_error(&self, component: Component, error: impl ToString) {
        self.emit(SyncEvent::ComponentError {
            component,
            error: error.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Events as a `Stream`; a lagging consumer skips what it missed
    pub fn stream(&self) -> impl Stream<Item = SyncEvent> + Send + 'static {
        unfold(self.tx.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event consumer lagged {} events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Clone for EventEmitter {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_emitted_events() {
        let emitter = EventEmitter::new(4);
        let mut stream = Box::pin(emitter.stream());
        emitter.emit(SyncEvent::SessionChanged { user_id: None });
        emitter.emit_error(Component::Presence, "join failed");

        assert!(matches!(
            stream.next().await,
            Some(SyncEvent::SessionChanged { user_id: None })
        ));
        match stream.next().await {
            Some(SyncEvent::ComponentError { component, error }) => {
                assert_eq!(component, Component::Presence);
                assert_eq!(error, "join failed");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_skips_lagged_events() {
        let emitter = EventEmitter::new(1);
        let mut stream = Box::pin(emitter.stream());
        emitter.emit(SyncEvent::SessionChanged { user_id: None });
        emitter.emit(SyncEvent::SessionChanged { user_id: Some("b".to_string()) });

        assert!(matches!(
            stream.next().await,
            Some(SyncEvent::SessionChanged { user_id: Some(_) })
        ));
    }
}
