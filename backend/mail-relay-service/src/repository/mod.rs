//! Persistence gateway
//!
//! `MailStore` is the repository seam for messages, recipients, attachments
//! and conversations. Entities are plain data; every write goes through here.

mod postgres;

pub use postgres::PgMailStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    Conversation, DeliveryChannel, DeliveryStatus, Message, MessagePatch, MessageStatus,
    MessageView, NewMessage,
};

#[async_trait]
pub trait MailStore: Send + Sync {
    /// Atomically create a message with its recipients and attachments, and
    /// create or append to its conversation.
    ///
    /// Without a conversation id a new conversation is seeded from the subject
    /// and recipient addresses with `message_count = 1`. With one, the count
    /// is incremented in SQL and `last_message_at` bumped to the new message's
    /// creation time. Nothing is visible unless every row is written.
    async fn create_message(&self, new: NewMessage) -> AppResult<MessageView>;

    async fn find_one(&self, id: Uuid) -> AppResult<MessageView>;

    /// Every live message, newest first
    async fn find_all(&self) -> AppResult<Vec<MessageView>>;

    /// Newest first
    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<MessageView>>;

    /// Oldest first. `NotFound` if the conversation does not exist.
    async fn find_by_conversation(&self, conversation_id: Uuid) -> AppResult<Vec<MessageView>>;

    async fn find_by_status(&self, status: MessageStatus) -> AppResult<Vec<Message>>;

    async fn find_conversation(&self, id: Uuid) -> AppResult<Conversation>;

    /// Most recent message of `user_id` whose subject equals `subject` exactly
    /// (case-sensitive).
    async fn latest_by_subject(&self, user_id: Uuid, subject: &str) -> AppResult<Option<Message>>;

    async fn find_by_submission(&self, submission_id: &str) -> AppResult<Option<Message>>;

    async fn update_fields(&self, id: Uuid, patch: &MessagePatch) -> AppResult<Message>;

    /// Move `id` from `expected` to `next` in one conditional update.
    ///
    /// Returns `Ok(None)` when the message exists but is no longer in
    /// `expected`, which makes repeated transitions no-ops. `sent_at` is only
    /// written when given.
    async fn transition_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Message>>;

    /// Set per-recipient delivery state for the given addresses
    /// (case-insensitive). Returns the number of recipient rows touched.
    async fn set_delivery(
        &self,
        id: Uuid,
        addresses: &[String],
        channel: Option<DeliveryChannel>,
        status: DeliveryStatus,
    ) -> AppResult<u64>;

    async fn record_submission(&self, id: Uuid, submission_id: &str) -> AppResult<()>;

    /// Soft delete
    async fn remove(&self, id: Uuid) -> AppResult<()>;
}
