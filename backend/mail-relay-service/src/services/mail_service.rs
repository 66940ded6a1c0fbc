use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::dispatch::{DispatchReport, OutboundRouter};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, Message, MessageStatus, MessageView, SendMailRequest, UpdateMailRequest,
};
use crate::repository::MailStore;
use crate::threading::{group_into_conversations, ConversationThread};

/// Result of a send: the persisted message as it reads after routing
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub message: MessageView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub messages: Vec<MessageView>,
}

/// Send, read and lifecycle operations over the persistence gateway
pub struct MailService {
    store: Arc<dyn MailStore>,
    router: Arc<OutboundRouter>,
}

impl MailService {
    pub fn new(store: Arc<dyn MailStore>, router: Arc<OutboundRouter>) -> Self {
        Self { store, router }
    }

    /// Persist a message and route it when it starts out `pending`.
    pub async fn send(&self, request: SendMailRequest) -> AppResult<SendOutcome> {
        let new_message = request.into_new_message()?;
        let created = self.store.create_message(new_message).await?;

        info!(
            message_id = %created.id(),
            user_id = %created.message.user_id,
            status = %created.status(),
            "message created"
        );

        if created.status() != MessageStatus::Pending {
            return Ok(SendOutcome {
                message: created,
                dispatch: None,
            });
        }

        let report = self.router.route(&created).await?;
        let message = self.store.find_one(created.id()).await?;
        Ok(SendOutcome {
            message,
            dispatch: Some(report),
        })
    }

    pub async fn find_all(&self) -> AppResult<Vec<MessageView>> {
        self.store.find_all().await
    }

    pub async fn find_one(&self, id: Uuid) -> AppResult<MessageView> {
        self.store.find_one(id).await
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<MessageView>> {
        self.store.find_by_user(user_id).await
    }

    pub async fn conversations_for_user(&self, user_id: Uuid) -> AppResult<Vec<ConversationThread>> {
        let messages = self.store.find_by_user(user_id).await?;
        Ok(group_into_conversations(&messages))
    }

    pub async fn conversation(&self, conversation_id: Uuid) -> AppResult<ConversationDetail> {
        let conversation = self.store.find_conversation(conversation_id).await?;
        let messages = self.store.find_by_conversation(conversation_id).await?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    pub async fn find_by_status(&self, status: MessageStatus) -> AppResult<Vec<Message>> {
        self.store.find_by_status(status).await
    }

    pub async fn update(&self, id: Uuid, request: UpdateMailRequest) -> AppResult<MessageView> {
        let patch = request.into_patch()?;
        self.store.update_fields(id, &patch).await?;
        self.store.find_one(id).await
    }

    /// Apply a caller-requested status change. Entering `pending` routes the
    /// message; re-asserting the current status changes nothing. Callers can
    /// never request `sent`.
    pub async fn transition(&self, id: Uuid, next: MessageStatus) -> AppResult<SendOutcome> {
        let current = self.store.find_one(id).await?;
        let from = current.status();

        if from == next {
            return Ok(SendOutcome {
                message: current,
                dispatch: None,
            });
        }
        // `sent` is only written by routing and delivery reconciliation
        if next == MessageStatus::Sent || !from.can_transition_to(next) {
            return Err(AppError::InvalidTransition { from, to: next });
        }
        if next == MessageStatus::Pending && current.recipients.is_empty() {
            return Err(AppError::Validation(
                "cannot route a message without recipients".into(),
            ));
        }

        let moved = self.store.transition_status(id, from, next, None).await?;
        if moved.is_none() {
            // lost a race with another writer; report against the stored state
            let latest = self.store.find_one(id).await?;
            return Err(AppError::InvalidTransition {
                from: latest.status(),
                to: next,
            });
        }

        info!(message_id = %id, from = %from, to = %next, "message status changed");

        let updated = self.store.find_one(id).await?;
        if next != MessageStatus::Pending {
            return Ok(SendOutcome {
                message: updated,
                dispatch: None,
            });
        }

        let report = self.router.route(&updated).await?;
        Ok(SendOutcome {
            message: self.store.find_one(id).await?,
            dispatch: Some(report),
        })
    }

    pub async fn remove(&self, id: Uuid) -> AppResult<()> {
        self.store.remove(id).await
    }
}
