//! Outbound routing
//!
//! Routing runs only for messages in `pending`. Recipients are partitioned
//! through the identity directory:
//!
//! - internal addresses get the full message pushed to their owner's live
//!   channel, after which the message moves `pending -> sent`
//! - external addresses are submitted to the relay in one request and the
//!   message stays `pending` until the delivery callback arrives
//!
//! Both legs run concurrently and both finish before `route` returns. Relay
//! failures are logged and reported, never retried.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::directory::IdentityDirectory;
use crate::error::AppResult;
use crate::metrics;
use crate::models::{DeliveryChannel, DeliveryStatus, MessageStatus, MessageView};
use crate::relay::{ExternalRelay, RelayRequest};
use crate::repository::MailStore;
use crate::websocket::{MailEvent, RealtimeNotifier};

/// What a routing call did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    /// Internal addresses whose owner's channel received the message
    pub internal_delivered: Vec<String>,
    /// Relay submission id when the external leg was accepted
    pub external_submission: Option<String>,
    pub external_error: Option<String>,
    /// Aggregate status after routing
    pub status: MessageStatus,
}

#[derive(Debug, Default)]
struct Partition {
    internal: Vec<(String, Uuid)>,
    external: Vec<String>,
}

pub struct OutboundRouter {
    store: Arc<dyn MailStore>,
    directory: Arc<dyn IdentityDirectory>,
    notifier: Arc<dyn RealtimeNotifier>,
    relay: Arc<dyn ExternalRelay>,
    default_from: String,
}

impl OutboundRouter {
    pub fn new(
        store: Arc<dyn MailStore>,
        directory: Arc<dyn IdentityDirectory>,
        notifier: Arc<dyn RealtimeNotifier>,
        relay: Arc<dyn ExternalRelay>,
        default_from: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            relay,
            default_from: default_from.into(),
        }
    }

    pub async fn route(&self, view: &MessageView) -> AppResult<DispatchReport> {
        let message_id = view.id();

        if view.status() != MessageStatus::Pending {
            return Ok(DispatchReport {
                status: view.status(),
                ..Default::default()
            });
        }

        let partition = self.partition(view).await?;
        if partition.internal.is_empty() && partition.external.is_empty() {
            warn!(message_id = %message_id, "pending message has no recipients to route");
            return Ok(DispatchReport {
                status: view.status(),
                ..Default::default()
            });
        }

        info!(
            message_id = %message_id,
            internal = partition.internal.len(),
            external = partition.external.len(),
            "routing message"
        );

        let (internal, external) = tokio::join!(
            self.deliver_internal(view, &partition.internal),
            self.submit_external(view, &partition.external),
        );

        let (internal_delivered, sent_transition) = internal?;
        let (external_submission, external_error) = external;

        let status = match sent_transition {
            Some(status) => status,
            None if internal_delivered.is_empty() => view.status(),
            // a callback got there first; report what is stored
            None => self.store.find_one(message_id).await?.status(),
        };

        Ok(DispatchReport {
            internal_delivered,
            external_submission,
            external_error,
            status,
        })
    }

    /// Distinct addresses in recipient order, split by directory resolution.
    async fn partition(&self, view: &MessageView) -> AppResult<Partition> {
        let mut partition = Partition::default();
        let mut seen: Vec<String> = Vec::with_capacity(view.recipients.len());

        for recipient in &view.recipients {
            let address = recipient.recipient_email.trim();
            let key = address.to_ascii_lowercase();
            if key.is_empty() || seen.contains(&key) {
                continue;
            }
            seen.push(key);

            match self.directory.resolve_by_address(address).await? {
                Some(user) => partition.internal.push((address.to_string(), user.id)),
                None => partition.external.push(address.to_string()),
            }
        }

        Ok(partition)
    }

    async fn deliver_internal(
        &self,
        view: &MessageView,
        targets: &[(String, Uuid)],
    ) -> AppResult<(Vec<String>, Option<MessageStatus>)> {
        if targets.is_empty() {
            return Ok((Vec::new(), None));
        }

        let event = MailEvent::new_email(view.clone());
        let mut delivered = Vec::with_capacity(targets.len());
        for (address, user_id) in targets {
            let reached = self.notifier.push_to_channel(*user_id, &event).await;
            debug!(
                message_id = %view.id(),
                user_id = %user_id,
                subscribers = reached,
                "pushed message to internal recipient"
            );
            delivered.push(address.clone());
        }
        metrics::record_dispatch("internal", "delivered");

        let transitioned = self
            .store
            .transition_status(
                view.id(),
                MessageStatus::Pending,
                MessageStatus::Sent,
                Some(Utc::now()),
            )
            .await?;

        self.store
            .set_delivery(
                view.id(),
                &delivered,
                Some(DeliveryChannel::Internal),
                DeliveryStatus::Delivered,
            )
            .await?;

        Ok((delivered, transitioned.map(|m| m.status)))
    }

    /// Never fails the routing call; errors end up in the report.
    async fn submit_external(
        &self,
        view: &MessageView,
        addresses: &[String],
    ) -> (Option<String>, Option<String>) {
        if addresses.is_empty() {
            return (None, None);
        }

        let from = if view.message.from_email.trim().is_empty() {
            self.default_from.clone()
        } else {
            view.message.from_email.clone()
        };

        let request = RelayRequest {
            from,
            to: addresses.to_vec(),
            subject: view.message.subject.clone(),
            text: view.message.text_content.clone(),
            html: view.message.html_content.clone(),
        };

        match self.relay.send(&request).await {
            Ok(submission_id) => {
                metrics::record_dispatch("external", "submitted");
                info!(
                    message_id = %view.id(),
                    submission_id = %submission_id,
                    recipients = addresses.len(),
                    "submitted message to relay"
                );

                if let Err(e) = self.store.record_submission(view.id(), &submission_id).await {
                    error!(message_id = %view.id(), error = %e, "failed to record relay submission");
                }
                if let Err(e) = self
                    .store
                    .set_delivery(
                        view.id(),
                        addresses,
                        Some(DeliveryChannel::External),
                        DeliveryStatus::Submitted,
                    )
                    .await
                {
                    error!(message_id = %view.id(), error = %e, "failed to mark recipients submitted");
                }

                (Some(submission_id), None)
            }
            Err(e) => {
                metrics::record_dispatch("external", "failed");
                error!(
                    message_id = %view.id(),
                    error = %e,
                    "relay submission failed, message stays pending"
                );

                if let Err(store_err) = self
                    .store
                    .set_delivery(
                        view.id(),
                        addresses,
                        Some(DeliveryChannel::External),
                        DeliveryStatus::Pending,
                    )
                    .await
                {
                    error!(message_id = %view.id(), error = %store_err, "failed to tag external recipients");
                }

                (None, Some(e.to_string()))
            }
        }
    }
}
