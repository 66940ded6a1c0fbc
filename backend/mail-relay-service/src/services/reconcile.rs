//! Delivery callback reconciliation
//!
//! Only verified callbacks touch state. A callback moves a message out of
//! `pending` at most once: the transition is conditional on the stored status
//! still being `pending`, so replays and late duplicates are no-ops.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::signature::{SignatureVerifier, SignedHeaders};
use crate::directory::IdentityDirectory;
use crate::error::{AppError, ErrorResponse};
use crate::metrics;
use crate::models::{DeliveryStatus, Message, MessageStatus};
use crate::repository::MailStore;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WebhookError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("store error: {0}")]
    Store(AppError),
}

impl From<AppError> for WebhookError {
    fn from(e: AppError) -> Self {
        WebhookError::Store(e)
    }
}

impl WebhookError {
    fn label(&self) -> &'static str {
        match self {
            WebhookError::MissingHeader(_) => "missing_header",
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::StaleTimestamp => "stale_timestamp",
            WebhookError::MalformedPayload(_) => "malformed_payload",
            WebhookError::Store(_) => "store_error",
        }
    }
}

impl ResponseError for WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MissingHeader(_)
            | WebhookError::InvalidSignature
            | WebhookError::StaleTimestamp => StatusCode::UNAUTHORIZED,
            WebhookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = match self {
            WebhookError::Store(e) => {
                error!(error = %e, "webhook reconciliation failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            status: status.as_u16(),
            error_type: "webhook_error".to_string(),
            code: self.label().to_ascii_uppercase(),
        })
    }
}

/// Terminal outcome a callback reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl DeliveryOutcome {
    /// `None` for event types that carry no terminal outcome.
    pub fn from_event_type(kind: &str) -> Option<Self> {
        match kind {
            "email.sent" | "email.delivered" => Some(Self::Delivered),
            "email.failed" | "email.bounced" => Some(Self::Failed),
            _ => None,
        }
    }

    fn target_status(self) -> MessageStatus {
        match self {
            Self::Delivered => MessageStatus::Sent,
            Self::Failed => MessageStatus::Failed,
        }
    }

    fn recipient_status(self) -> DeliveryStatus {
        match self {
            Self::Delivered => DeliveryStatus::Delivered,
            Self::Failed => DeliveryStatus::Failed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AddressList {
    One(String),
    Many(Vec<String>),
}

impl AddressList {
    fn into_vec(self) -> Vec<String> {
        match self {
            AddressList::One(address) => vec![address],
            AddressList::Many(addresses) => addresses,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventData {
    email_id: Option<String>,
    to: Option<AddressList>,
    subject: Option<String>,
}

/// Accepts both the flat `{type, to, subject}` shape and the
/// `{type, data: {email_id, to, subject}}` envelope.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    to: Option<AddressList>,
    subject: Option<String>,
    data: Option<EventData>,
}

/// Normalized callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub kind: String,
    pub submission_id: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
}

impl DeliveryEvent {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let raw: RawEvent = serde_json::from_slice(body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let (data_id, data_to, data_subject) = match raw.data {
            Some(data) => (data.email_id, data.to, data.subject),
            None => (None, None, None),
        };

        let to = raw
            .to
            .or(data_to)
            .map(AddressList::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        Ok(Self {
            kind: raw.kind,
            submission_id: data_id.filter(|id| !id.is_empty()),
            to,
            subject: raw.subject.or(data_subject).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        message_id: Uuid,
        status: MessageStatus,
    },
    /// The message had already left `pending`; nothing changed.
    AlreadyApplied {
        message_id: Uuid,
        status: MessageStatus,
    },
    Ignored {
        event_type: String,
    },
    NotFound,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::AlreadyApplied { .. } => "already_applied",
            ReconcileOutcome::Ignored { .. } => "ignored",
            ReconcileOutcome::NotFound => "not_found",
        }
    }
}

pub struct WebhookReconciler {
    store: Arc<dyn MailStore>,
    directory: Arc<dyn IdentityDirectory>,
    verifier: SignatureVerifier,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn MailStore>,
        directory: Arc<dyn IdentityDirectory>,
        verifier: SignatureVerifier,
    ) -> Self {
        Self {
            store,
            directory,
            verifier,
        }
    }

    /// Verify then apply one callback. `lookup` reads a request header by
    /// lowercase name.
    pub async fn reconcile<F>(&self, lookup: F, body: &[u8]) -> Result<ReconcileOutcome, WebhookError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let result = self.verify_and_apply(lookup, body).await;
        match &result {
            Ok(outcome) => metrics::record_webhook(outcome.label()),
            Err(e) => {
                metrics::record_webhook(e.label());
                warn!(error = %e, "rejected relay callback");
            }
        }
        result
    }

    async fn verify_and_apply<F>(&self, lookup: F, body: &[u8]) -> Result<ReconcileOutcome, WebhookError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let headers = SignedHeaders::extract(lookup)?;
        self.verifier.verify(&headers, body)?;

        let event = DeliveryEvent::parse(body)?;
        self.apply(&event).await
    }

    /// Apply an already-verified event.
    pub async fn apply(&self, event: &DeliveryEvent) -> Result<ReconcileOutcome, WebhookError> {
        let Some(outcome) = DeliveryOutcome::from_event_type(&event.kind) else {
            info!(event_type = %event.kind, "ignoring relay event");
            return Ok(ReconcileOutcome::Ignored {
                event_type: event.kind.clone(),
            });
        };

        let Some(message) = self.locate(event).await? else {
            warn!(
                event_type = %event.kind,
                subject = %event.subject,
                "no message matches relay event"
            );
            return Ok(ReconcileOutcome::NotFound);
        };

        let target = outcome.target_status();
        let sent_at = (outcome == DeliveryOutcome::Delivered).then(Utc::now);

        if !event.to.is_empty() {
            self.store
                .set_delivery(message.id, &event.to, None, outcome.recipient_status())
                .await?;
        }

        let transitioned = self
            .store
            .transition_status(message.id, MessageStatus::Pending, target, sent_at)
            .await?;

        match transitioned {
            Some(updated) => {
                info!(
                    message_id = %updated.id,
                    status = %updated.status,
                    "applied relay delivery outcome"
                );
                Ok(ReconcileOutcome::Applied {
                    message_id: updated.id,
                    status: updated.status,
                })
            }
            None => {
                let current = self.store.find_one(message.id).await?;
                Ok(ReconcileOutcome::AlreadyApplied {
                    message_id: message.id,
                    status: current.status(),
                })
            }
        }
    }

    /// Submission id first, then each destination's owner by latest subject match.
    async fn locate(&self, event: &DeliveryEvent) -> Result<Option<Message>, WebhookError> {
        if let Some(submission_id) = &event.submission_id {
            if let Some(message) = self.store.find_by_submission(submission_id).await? {
                return Ok(Some(message));
            }
        }

        for address in &event.to {
            let Some(user) = self.directory.resolve_by_address(address).await? else {
                continue;
            };
            if let Some(message) = self
                .store
                .latest_by_subject(user.id, &event.subject)
                .await?
            {
                return Ok(Some(message));
            }
        }

        Ok(None)
    }
}
