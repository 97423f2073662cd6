use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;

/// Emitted after a write made through a store facade succeeds. `value` is
/// `None` when the key was removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub key: String,
    pub value: Option<Value>,
    pub version: Option<String>,
}

type UpdateSender = mpsc::UnboundedSender<UpdateEvent>;

/// Per-store fan-out of update events to key subscribers.
#[derive(Debug, Default)]
pub struct UpdateNotifier {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<(u64, UpdateSender)>>>,
}

impl UpdateNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>, key: &str) -> UpdateSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push((id, sender));
        UpdateSubscription {
            key: key.to_string(),
            id,
            receiver,
            notifier: Arc::downgrade(self),
        }
    }

    pub fn emit(&self, event: UpdateEvent) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = listeners.get_mut(&event.key) else {
            return;
        };
        senders.retain(|(_, sender)| sender.send(event.clone()).is_ok());
        if senders.is_empty() {
            listeners.remove(&event.key);
        }
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    fn release(&self, key: &str, id: u64) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = listeners.get_mut(key) {
            senders.retain(|(candidate, _)| *candidate != id);
            if senders.is_empty() {
                listeners.remove(key);
            }
        }
    }
}

/// Receiving end of [`crate::DataStore::subscribe`]. Dropping it releases
/// the subscription.
#[derive(Debug)]
pub struct UpdateSubscription {
    key: String,
    id: u64,
    receiver: mpsc::UnboundedReceiver<UpdateEvent>,
    notifier: Weak<UpdateNotifier>,
}

impl UpdateSubscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the next event. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<UpdateEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<UpdateEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for UpdateSubscription {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.release(&self.key, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(key: &str, value: Value) -> UpdateEvent {
        UpdateEvent {
            key: key.to_string(),
            value: Some(value),
            version: None,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscribe_then_emit_expected_only_matching_key_delivered() {
        let notifier = UpdateNotifier::new();
        let mut subscription = notifier.subscribe("a");
        notifier.emit(event("b", json!(1)));
        notifier.emit(event("a", json!(2)));

        let received = subscription.recv().await.expect("event should arrive");
        assert_eq!(received.value, Some(json!(2)));
        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn unsubscribe_expected_listener_released() {
        let notifier = UpdateNotifier::new();
        let first = notifier.subscribe("a");
        let _second = notifier.subscribe("a");
        assert_eq!(notifier.listener_count("a"), 2);

        first.unsubscribe();
        assert_eq!(notifier.listener_count("a"), 1);
    }

    #[test]
    fn dropped_subscription_expected_no_listener_left() {
        let notifier = UpdateNotifier::new();
        {
            let _subscription = notifier.subscribe("a");
        }
        assert_eq!(notifier.listener_count("a"), 0);
        notifier.emit(event("a", json!(1)));
    }
}
