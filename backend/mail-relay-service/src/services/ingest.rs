//! Inbound mail ingestion
//!
//! A raw message is filed under the owner of its primary recipient. Mail for
//! unknown addresses is dropped: there is no internal party to tell, so the
//! caller only ever sees an outcome, never an error. Ingested messages are
//! `unread` and never re-enter outbound routing.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::directory::IdentityDirectory;
use crate::error::AppResult;
use crate::metrics;
use crate::models::{MessageStatus, MessageView, NewMessage};
use crate::parser::{ParsedMail, RawMessageParser};
use crate::repository::MailStore;
use crate::websocket::{MailEvent, RealtimeNotifier};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored {
        message_id: Uuid,
        conversation_id: Option<Uuid>,
    },
    Discarded {
        reason: String,
    },
}

impl IngestOutcome {
    fn discarded(reason: impl Into<String>) -> Self {
        IngestOutcome::Discarded {
            reason: reason.into(),
        }
    }
}

pub struct InboundPipeline {
    store: Arc<dyn MailStore>,
    directory: Arc<dyn IdentityDirectory>,
    notifier: Arc<dyn RealtimeNotifier>,
    parser: Arc<dyn RawMessageParser>,
}

impl InboundPipeline {
    pub fn new(
        store: Arc<dyn MailStore>,
        directory: Arc<dyn IdentityDirectory>,
        notifier: Arc<dyn RealtimeNotifier>,
        parser: Arc<dyn RawMessageParser>,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            parser,
        }
    }

    pub async fn ingest(&self, raw: &[u8]) -> IngestOutcome {
        let parsed = match self.parser.parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "dropping unparseable inbound message");
                metrics::record_ingest("unparseable");
                return IngestOutcome::discarded("unparseable message");
            }
        };

        let Some(address) = parsed.primary_recipient().map(str::to_string) else {
            warn!(subject = %parsed.subject, "dropping inbound message without recipient");
            metrics::record_ingest("no_recipient");
            return IngestOutcome::discarded("no recipient");
        };

        match self.file(&address, parsed).await {
            Ok(Some(view)) => {
                metrics::record_ingest("stored");
                let outcome = IngestOutcome::Stored {
                    message_id: view.id(),
                    conversation_id: view.message.conversation_id,
                };
                let owner = view.message.user_id;
                self.notifier
                    .push_to_channel(owner, &MailEvent::new_email(view))
                    .await;
                outcome
            }
            Ok(None) => {
                warn!(recipient = %address, "dropping inbound message for unknown recipient");
                metrics::record_ingest("unknown_recipient");
                IngestOutcome::discarded("unknown recipient")
            }
            Err(e) => {
                error!(recipient = %address, error = %e, "failed to store inbound message");
                metrics::record_ingest("store_error");
                IngestOutcome::discarded("store error")
            }
        }
    }

    /// `Ok(None)` when the address has no owner.
    async fn file(&self, address: &str, parsed: ParsedMail) -> AppResult<Option<MessageView>> {
        let Some(owner) = self.directory.resolve_by_address(address).await? else {
            return Ok(None);
        };

        let conversation_id = self
            .store
            .latest_by_subject(owner.id, &parsed.subject)
            .await?
            .and_then(|m| m.conversation_id);

        let view = self
            .store
            .create_message(NewMessage {
                user_id: owner.id,
                from_email: parsed.from,
                from_name: parsed.from_name,
                subject: parsed.subject,
                text_content: parsed.text,
                html_content: None,
                priority: None,
                status: Some(MessageStatus::Unread),
                conversation_id,
                scheduled_for: None,
                recipients: Vec::new(),
                attachments: Vec::new(),
            })
            .await?;

        info!(
            message_id = %view.id(),
            user_id = %owner.id,
            threaded = conversation_id.is_some(),
            "ingested inbound message"
        );

        Ok(Some(view))
    }
}
