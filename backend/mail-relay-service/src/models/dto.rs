//! Request DTOs validated at the HTTP boundary before reaching the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::message::{
    MessagePatch, MessagePriority, MessageStatus, NewAttachment, NewMessage, NewRecipient,
    RecipientType, StorageProvider,
};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecipientInput {
    #[validate(email)]
    pub recipient_email: String,

    #[validate(length(max = 255))]
    pub recipient_name: Option<String>,

    pub recipient_type: RecipientType,

    pub contact_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AttachmentInput {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,

    #[validate(range(min = 0))]
    pub file_size: i64,

    #[validate(length(min = 1, max = 255))]
    pub mime_type: String,

    #[validate(url)]
    pub storage_url: String,

    pub storage_provider: StorageProvider,

    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Create (and possibly send) a message
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendMailRequest {
    pub user_id: Uuid,

    #[validate(email)]
    pub from_email: String,

    #[serde(default)]
    #[validate(length(max = 255))]
    pub from_name: String,

    #[validate(length(max = 998))]
    pub subject: String,

    #[serde(default)]
    pub text_content: String,

    pub html_content: Option<String>,

    pub priority: Option<MessagePriority>,

    pub status: Option<MessageStatus>,

    pub conversation_id: Option<Uuid>,

    pub scheduled_for: Option<DateTime<Utc>>,

    #[serde(default)]
    #[validate(nested)]
    pub recipients: Vec<RecipientInput>,

    #[serde(default)]
    #[validate(nested)]
    pub attachments: Vec<AttachmentInput>,
}

impl SendMailRequest {
    /// Validate and convert into the gateway's create input.
    pub fn into_new_message(self) -> AppResult<NewMessage> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let status = self.status.unwrap_or_default();
        if !matches!(
            status,
            MessageStatus::Draft
                | MessageStatus::Scheduled
                | MessageStatus::Queued
                | MessageStatus::Pending
        ) {
            return Err(AppError::Validation(format!(
                "a new message cannot start as {status}"
            )));
        }

        if status != MessageStatus::Draft && self.recipients.is_empty() {
            return Err(AppError::Validation(
                "recipients must not be empty unless the message is a draft".into(),
            ));
        }

        Ok(NewMessage {
            user_id: self.user_id,
            from_email: self.from_email,
            from_name: self.from_name,
            subject: self.subject,
            text_content: self.text_content,
            html_content: self.html_content,
            priority: self.priority,
            status: Some(status),
            conversation_id: self.conversation_id,
            scheduled_for: self.scheduled_for,
            recipients: self
                .recipients
                .into_iter()
                .map(|r| NewRecipient {
                    address: r.recipient_email,
                    display_name: r.recipient_name,
                    kind: r.recipient_type,
                    contact_id: r.contact_id,
                })
                .collect(),
            attachments: self
                .attachments
                .into_iter()
                .map(|a| NewAttachment {
                    filename: a.filename,
                    file_size: a.file_size,
                    mime_type: a.mime_type,
                    storage_url: a.storage_url,
                    storage_provider: a.storage_provider,
                    uploaded_at: a.uploaded_at,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateMailRequest {
    #[validate(length(max = 998))]
    pub subject: Option<String>,
    pub text_content: Option<String>,
    pub html_content: Option<String>,
    pub priority: Option<MessagePriority>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl UpdateMailRequest {
    pub fn into_patch(self) -> AppResult<MessagePatch> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let patch = MessagePatch {
            subject: self.subject,
            text_content: self.text_content,
            html_content: self.html_content,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
        };
        if patch.is_empty() {
            return Err(AppError::Validation("no fields to update".into()));
        }
        Ok(patch)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: MessageStatus,
}

/// Body posted by the inbound mail hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMailRequest {
    pub raw: String,
}
