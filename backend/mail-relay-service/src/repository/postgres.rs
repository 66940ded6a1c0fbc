use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::MailStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    Attachment, Conversation, DeliveryChannel, DeliveryStatus, Message, MessagePatch,
    MessageStatus, MessageView, NewMessage, Recipient,
};

const MESSAGE_COLUMNS: &str = "id, user_id, conversation_id, from_email, from_name, subject, \
     text_content, html_content, priority, status, relay_submission_id, created_at, \
     updated_at, deleted_at, sent_at, scheduled_for";

const CONVERSATION_COLUMNS: &str =
    "id, user_id, subject, participant_emails, message_count, last_message_at, created_at";

const RECIPIENT_COLUMNS: &str = "id, email_id, recipient_email, recipient_name, recipient_type, \
     contact_id, delivery_channel, delivery_status";

const ATTACHMENT_COLUMNS: &str =
    "id, email_id, filename, file_size, mime_type, storage_url, storage_provider, uploaded_at";

/// PostgreSQL-backed `MailStore`
#[derive(Clone)]
pub struct PgMailStore {
    pool: PgPool,
}

impl PgMailStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn open_conversation(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewMessage,
        now: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        let participants = new.participant_addresses();

        match new.conversation_id {
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO email_conversations (
                        id, user_id, subject, participant_emails,
                        message_count, last_message_at, created_at
                    ) VALUES ($1, $2, $3, $4, 1, $5, $5)
                    RETURNING {CONVERSATION_COLUMNS}
                    "#
                );
                let conversation = sqlx::query_as::<_, Conversation>(&sql)
                    .bind(Uuid::new_v4())
                    .bind(new.user_id)
                    .bind(&new.subject)
                    .bind(&participants)
                    .bind(now)
                    .fetch_one(&mut **tx)
                    .await?;
                Ok(conversation)
            }
            Some(conversation_id) => {
                // count is incremented in SQL so concurrent appends cannot lose updates
                let sql = format!(
                    r#"
                    UPDATE email_conversations
                    SET message_count = message_count + 1,
                        last_message_at = GREATEST(last_message_at, $3),
                        participant_emails = ARRAY(
                            SELECT DISTINCT p
                            FROM unnest(participant_emails || $4::text[]) AS p
                            ORDER BY p
                        )
                    WHERE id = $1 AND user_id = $2
                    RETURNING {CONVERSATION_COLUMNS}
                    "#
                );
                sqlx::query_as::<_, Conversation>(&sql)
                    .bind(conversation_id)
                    .bind(new.user_id)
                    .bind(now)
                    .bind(&participants)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(AppError::NotFound)
            }
        }
    }

    async fn insert_recipients(
        tx: &mut Transaction<'_, Postgres>,
        message_id: Uuid,
        new: &NewMessage,
    ) -> AppResult<Vec<Recipient>> {
        if new.recipients.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO email_recipients \
             (id, email_id, recipient_email, recipient_name, recipient_type, contact_id) ",
        );
        builder.push_values(new.recipients.iter(), |mut row, recipient| {
            row.push_bind(Uuid::new_v4())
                .push_bind(message_id)
                .push_bind(recipient.address.trim().to_string())
                .push_bind(recipient.display_name.clone())
                .push_bind(recipient.kind)
                .push_bind(recipient.contact_id);
        });
        builder.push(format!(" RETURNING {RECIPIENT_COLUMNS}"));

        let rows = builder
            .build_query_as::<Recipient>()
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows)
    }

    async fn insert_attachments(
        tx: &mut Transaction<'_, Postgres>,
        message_id: Uuid,
        new: &NewMessage,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Attachment>> {
        if new.attachments.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO email_attachments \
             (id, email_id, filename, file_size, mime_type, storage_url, storage_provider, uploaded_at) ",
        );
        builder.push_values(new.attachments.iter(), |mut row, attachment| {
            row.push_bind(Uuid::new_v4())
                .push_bind(message_id)
                .push_bind(attachment.filename.clone())
                .push_bind(attachment.file_size)
                .push_bind(attachment.mime_type.clone())
                .push_bind(attachment.storage_url.clone())
                .push_bind(attachment.storage_provider)
                .push_bind(attachment.uploaded_at.unwrap_or(now));
        });
        builder.push(format!(" RETURNING {ATTACHMENT_COLUMNS}"));

        let rows = builder
            .build_query_as::<Attachment>()
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows)
    }

    /// Join recipients and attachments onto a batch of messages
    async fn with_children(&self, messages: Vec<Message>) -> AppResult<Vec<MessageView>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        let recipients = sqlx::query_as::<_, Recipient>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM email_recipients WHERE email_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let attachments = sqlx::query_as::<_, Attachment>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM email_attachments WHERE email_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut recipients_by_message: HashMap<Uuid, Vec<Recipient>> = HashMap::new();
        for recipient in recipients {
            recipients_by_message
                .entry(recipient.email_id)
                .or_default()
                .push(recipient);
        }
        let mut attachments_by_message: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for attachment in attachments {
            attachments_by_message
                .entry(attachment.email_id)
                .or_default()
                .push(attachment);
        }

        Ok(messages
            .into_iter()
            .map(|message| MessageView {
                recipients: recipients_by_message.remove(&message.id).unwrap_or_default(),
                attachments: attachments_by_message.remove(&message.id).unwrap_or_default(),
                conversation: None,
                message,
            })
            .collect())
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM emails WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl MailStore for PgMailStore {
    async fn create_message(&self, new: NewMessage) -> AppResult<MessageView> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let conversation = Self::open_conversation(&mut tx, &new, now).await?;

        let sql = format!(
            r#"
            INSERT INTO emails (
                id, user_id, conversation_id, from_email, from_name, subject,
                text_content, html_content, priority, status, created_at,
                updated_at, scheduled_for
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, $12)
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let message = sqlx::query_as::<_, Message>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(conversation.id)
            .bind(&new.from_email)
            .bind(&new.from_name)
            .bind(&new.subject)
            .bind(&new.text_content)
            .bind(&new.html_content)
            .bind(new.priority.unwrap_or_default())
            .bind(new.status.unwrap_or_default())
            .bind(now)
            .bind(new.scheduled_for)
            .fetch_one(&mut *tx)
            .await?;

        let recipients = Self::insert_recipients(&mut tx, message.id, &new).await?;
        let attachments = Self::insert_attachments(&mut tx, message.id, &new, now).await?;

        tx.commit().await?;

        info!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            recipients = recipients.len(),
            attachments = attachments.len(),
            "created message"
        );

        Ok(MessageView {
            message,
            recipients,
            attachments,
            conversation: Some(conversation),
        })
    }

    async fn find_one(&self, id: Uuid) -> AppResult<MessageView> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)?;

        let conversation = match message.conversation_id {
            Some(conversation_id) => Some(self.find_conversation(conversation_id).await?),
            None => None,
        };

        let mut view = self
            .with_children(vec![message])
            .await?
            .pop()
            .ok_or(AppError::Internal)?;
        view.conversation = conversation;
        Ok(view)
    }

    async fn find_all(&self) -> AppResult<Vec<MessageView>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails \
             WHERE deleted_at IS NULL \
             ORDER BY created_at DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        self.with_children(messages).await
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<MessageView>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails \
             WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(user_id = %user_id, count = messages.len(), "loaded user messages");
        self.with_children(messages).await
    }

    async fn find_by_conversation(&self, conversation_id: Uuid) -> AppResult<Vec<MessageView>> {
        // surface NotFound for an unknown thread rather than an empty list
        self.find_conversation(conversation_id).await?;

        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails \
             WHERE conversation_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, id"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        self.with_children(messages).await
    }

    async fn find_by_status(&self, status: MessageStatus) -> AppResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails \
             WHERE status = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, id"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn find_conversation(&self, id: Uuid) -> AppResult<Conversation> {
        sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM email_conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)
    }

    async fn latest_by_subject(&self, user_id: Uuid, subject: &str) -> AppResult<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails \
             WHERE user_id = $1 AND subject = $2 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(user_id)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    async fn find_by_submission(&self, submission_id: &str) -> AppResult<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails \
             WHERE relay_submission_id = $1 AND deleted_at IS NULL"
        ))
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    async fn update_fields(&self, id: Uuid, patch: &MessagePatch) -> AppResult<Message> {
        sqlx::query_as::<_, Message>(&format!(
            r#"
            UPDATE emails
            SET subject = COALESCE($2, subject),
                text_content = COALESCE($3, text_content),
                html_content = COALESCE($4, html_content),
                priority = COALESCE($5, priority),
                scheduled_for = COALESCE($6, scheduled_for),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.subject)
        .bind(&patch.text_content)
        .bind(&patch.html_content)
        .bind(patch.priority)
        .bind(patch.scheduled_for)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Message>> {
        let updated = sqlx::query_as::<_, Message>(&format!(
            r#"
            UPDATE emails
            SET status = $3,
                sent_at = COALESCE($4, sent_at),
                updated_at = NOW()
            WHERE id = $1 AND status = $2 AND deleted_at IS NULL
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected)
        .bind(next)
        .bind(sent_at)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(message) => Ok(Some(message)),
            None if self.exists(id).await? => Ok(None),
            None => Err(AppError::NotFound),
        }
    }

    async fn set_delivery(
        &self,
        id: Uuid,
        addresses: &[String],
        channel: Option<DeliveryChannel>,
        status: DeliveryStatus,
    ) -> AppResult<u64> {
        if addresses.is_empty() {
            return Ok(0);
        }

        let lowered: Vec<String> = addresses
            .iter()
            .map(|a| a.trim().to_ascii_lowercase())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE email_recipients
            SET delivery_status = $3,
                delivery_channel = COALESCE($4, delivery_channel)
            WHERE email_id = $1 AND LOWER(recipient_email) = ANY($2)
            "#,
        )
        .bind(id)
        .bind(&lowered)
        .bind(status)
        .bind(channel)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn record_submission(&self, id: Uuid, submission_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE emails SET relay_submission_id = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(submission_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE emails SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        info!(message_id = %id, "soft-deleted message");
        Ok(())
    }
}
