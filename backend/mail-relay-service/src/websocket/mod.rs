//! Real-time notifier
//!
//! Channel id == user id. `ChannelRegistry` keeps the live websocket
//! subscribers of each user in process and fans serialized `MailEvent`s out
//! to them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use tracing::{debug, error};
use uuid::Uuid;

pub mod messages;
pub mod session;

pub use messages::MailEvent;

#[async_trait]
pub trait RealtimeNotifier: Send + Sync {
    /// Returns how many live subscribers received the event.
    async fn push_to_channel(&self, channel_id: Uuid, event: &MailEvent) -> usize;

    async fn push_to_channels(&self, channel_ids: &[Uuid], event: &MailEvent) -> usize {
        let mut reached = 0;
        for channel_id in channel_ids {
            reached += self.push_to_channel(*channel_id, event).await;
        }
        reached
    }
}

/// Unique identifier for one websocket subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<String>,
}

#[derive(Default, Clone)]
pub struct ChannelRegistry {
    // user_id -> live subscribers
    inner: Arc<RwLock<HashMap<Uuid, Vec<Subscriber>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscriber(&self, user_id: Uuid) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        let subscribers = guard.entry(user_id).or_default();
        subscribers.push(Subscriber {
            id: subscriber_id,
            sender: tx,
        });

        debug!(
            user_id = %user_id,
            subscribers = subscribers.len(),
            "added mail channel subscriber"
        );

        (subscriber_id, rx)
    }

    /// Must be called when a websocket closes, or the entry leaks.
    pub async fn remove_subscriber(&self, user_id: Uuid, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(&user_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                guard.remove(&user_id);
            }
        }
    }

    /// Send to every subscriber of `user_id`, dropping dead senders.
    pub async fn broadcast(&self, user_id: Uuid, payload: String) -> usize {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&user_id) else {
            return 0;
        };

        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.sender.send(payload.clone()).is_ok());
        let reached = subscribers.len();

        if before != reached {
            debug!(
                user_id = %user_id,
                dropped = before - reached,
                "cleaned up dead mail channel subscribers"
            );
        }
        if subscribers.is_empty() {
            guard.remove(&user_id);
        }

        reached
    }

    pub async fn subscriber_count(&self, user_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.get(&user_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RealtimeNotifier for ChannelRegistry {
    async fn push_to_channel(&self, channel_id: Uuid, event: &MailEvent) -> usize {
        match event.to_json() {
            Ok(payload) => self.broadcast(channel_id, payload).await,
            Err(e) => {
                error!(error = %e, channel_id = %channel_id, "failed to encode mail event");
                0
            }
        }
    }
}
