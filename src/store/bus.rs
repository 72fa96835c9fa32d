use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::events::ChangeEvent;

/// Change-notification bus for one record collection.
///
/// Topics partition the collection (players are keyed by room id, trade
/// sessions by session id and by target nickname). Delivery is
/// at-least-once from the consumer's point of view: a subscriber that
/// lags is handed a `Lagged` error and must treat its next observation
/// as potentially duplicated or reordered. Consumers are therefore
/// written to be idempotent.
#[derive(Debug)]
pub struct ChangeBus<T: Clone> {
    /// Topic-specific channels: topic -> sender
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ChangeEvent<T>>>>>,
}

impl<T: Clone> Clone for ChangeBus<T> {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
        }
    }
}

impl<T: Clone> Default for ChangeBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ChangeBus<T> {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Emits a change event to all subscribers of a topic.
    pub async fn emit(&self, topic: &str, event: ChangeEvent<T>) {
        let channels = self.channels.read().await;

        if let Some(sender) = channels.get(topic) {
            match sender.send(event) {
                Ok(receiver_count) => {
                    debug!(topic = %topic, receivers = receiver_count, "Change event emitted");
                }
                Err(_) => {
                    debug!(topic = %topic, "Change event emitted with no receivers");
                }
            }
        } else {
            debug!(topic = %topic, "No channel for topic - creating one");
            drop(channels);

            let mut channels = self.channels.write().await;
            let sender = channels
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(128).0)
                .clone();

            if sender.send(event).is_err() {
                debug!(topic = %topic, "Change event sent to new channel with no receivers");
            }
        }
    }

    /// Subscribe to change events for a topic.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<ChangeEvent<T>> {
        let channels = self.channels.read().await;

        if let Some(sender) = channels.get(topic) {
            sender.subscribe()
        } else {
            debug!(topic = %topic, "Creating new channel for subscription");
            drop(channels);

            let mut channels = self.channels.write().await;
            channels
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(128).0)
                .subscribe()
        }
    }
}
