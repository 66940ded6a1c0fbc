use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::conversation::Conversation;

/// Message priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    #[default]
    Low,
    Normal,
    High,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Message lifecycle status
///
/// Outbound mail moves `draft -> pending -> sent | failed`, with `scheduled` and
/// `queued` as holding states in front of `pending`. Inbound mail lives outside
/// that machine as `unread -> read`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Draft,
    Scheduled,
    Queued,
    Pending,
    Sent,
    Failed,
    Unread,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Unread => "unread",
            Self::Read => "read",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Read)
    }

    /// Whether `self -> next` is a forward move. Re-asserting the current
    /// status is accepted and treated as a no-op by callers.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Draft, Scheduled | Queued | Pending) => true,
            (Scheduled, Queued | Pending) => true,
            (Queued, Pending) => true,
            (Pending, Sent) => true,
            // explicit failure transition
            (Draft | Scheduled | Queued | Pending, Failed) => true,
            (Unread, Read) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "queued" => Ok(Self::Queued),
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "unread" => Ok(Self::Unread),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    To,
    Cc,
    Bcc,
}

/// Which leg a recipient was routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Internal,
    External,
}

/// Per-recipient delivery state, tracked next to the aggregate message status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivered,
    Submitted,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Submitted => "submitted",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StorageProvider {
    S3,
    AzureBlob,
}

/// Persisted message row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Always set once persisted; `None` only for messages built client-side
    pub conversation_id: Option<Uuid>,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub text_content: String,
    pub html_content: Option<String>,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_submission_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    pub id: Uuid,
    pub email_id: Uuid,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub recipient_type: RecipientType,
    pub contact_id: Option<Uuid>,
    pub delivery_channel: Option<DeliveryChannel>,
    pub delivery_status: DeliveryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub email_id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub storage_url: String,
    pub storage_provider: StorageProvider,
    pub uploaded_at: DateTime<Utc>,
}

/// A message joined with its recipients, attachments and (when loaded) its conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,
}

impl MessageView {
    pub fn id(&self) -> Uuid {
        self.message.id
    }

    pub fn status(&self) -> MessageStatus {
        self.message.status
    }
}

/// Recipient row to insert alongside a new message
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecipient {
    pub address: String,
    pub display_name: Option<String>,
    pub kind: RecipientType,
    pub contact_id: Option<Uuid>,
}

/// Attachment row to insert alongside a new message
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttachment {
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub storage_url: String,
    pub storage_provider: StorageProvider,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Everything the persistence gateway needs to create a message atomically
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub user_id: Uuid,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub text_content: String,
    pub html_content: Option<String>,
    pub priority: Option<MessagePriority>,
    pub status: Option<MessageStatus>,
    pub conversation_id: Option<Uuid>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub recipients: Vec<NewRecipient>,
    pub attachments: Vec<NewAttachment>,
}

impl NewMessage {
    /// Distinct recipient addresses in first-seen order, lowercased
    pub fn participant_addresses(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.recipients.len());
        for recipient in &self.recipients {
            let address = recipient.address.trim().to_ascii_lowercase();
            if !address.is_empty() && !seen.contains(&address) {
                seen.push(address);
            }
        }
        seen
    }
}

/// Field-level update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    pub subject: Option<String>,
    pub text_content: Option<String>,
    pub html_content: Option<String>,
    pub priority: Option<MessagePriority>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none()
            && self.text_content.is_none()
            && self.html_content.is_none()
            && self.priority.is_none()
            && self.scheduled_for.is_none()
    }
}
