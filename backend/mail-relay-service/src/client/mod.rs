//! Client-side conversation aggregation
//!
//! `ConversationFeed` holds what a mail client renders: the flat message list
//! for one user, the threads derived from it, a loading flag and the last
//! error. Live pushes are appended to the flat list and the threads are
//! regrouped from scratch every time.

mod http;

pub use http::HttpMailSource;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::MessageView;
use crate::threading::{group_into_conversations, ConversationThread};
use crate::websocket::MailEvent;

/// Read API the feed loads from
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_user_messages(&self, user_id: Uuid) -> AppResult<Vec<MessageView>>;
}

pub struct ConversationFeed {
    user_id: Uuid,
    source: Arc<dyn MailSource>,
    messages: Vec<MessageView>,
    conversations: Vec<ConversationThread>,
    loading: bool,
    error: Option<String>,
    connected: bool,
}

impl ConversationFeed {
    pub fn new(user_id: Uuid, source: Arc<dyn MailSource>) -> Self {
        Self {
            user_id,
            source,
            messages: Vec::new(),
            conversations: Vec::new(),
            loading: false,
            error: None,
            connected: false,
        }
    }

    /// Fetch every message of the user and rebuild the threads. On failure the
    /// previously loaded state is kept and the error recorded.
    pub async fn load(&mut self) {
        self.loading = true;

        match self.source.fetch_user_messages(self.user_id).await {
            Ok(messages) => {
                self.messages = messages;
                self.regroup();
                self.error = None;
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "failed to load conversations");
                self.error = Some(e.to_string());
            }
        }

        self.loading = false;
    }

    pub async fn reload(&mut self) {
        self.load().await;
    }

    /// Returns whether the event changed the feed.
    pub fn apply_live(&mut self, event: &MailEvent) -> bool {
        match event {
            MailEvent::NewEmail { message } => {
                self.messages.push(message.as_ref().clone());
                self.regroup();
                true
            }
            _ => false,
        }
    }

    /// Apply a raw text frame from the live channel.
    pub fn apply_frame(&mut self, frame: &str) -> bool {
        match MailEvent::from_json(frame) {
            Ok(event) => self.apply_live(&event),
            Err(e) => {
                debug!(error = %e, "ignoring unreadable live frame");
                false
            }
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn conversations(&self) -> &[ConversationThread] {
        &self.conversations
    }

    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn regroup(&mut self) {
        self.conversations = group_into_conversations(&self.messages);
    }
}
