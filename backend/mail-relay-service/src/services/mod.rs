pub mod dispatch;
pub mod ingest;
pub mod mail_service;
pub mod reconcile;
pub mod signature;

pub use dispatch::{DispatchReport, OutboundRouter};
pub use ingest::{InboundPipeline, IngestOutcome};
pub use mail_service::{ConversationDetail, MailService, SendOutcome};
pub use reconcile::{DeliveryEvent, DeliveryOutcome, ReconcileOutcome, WebhookError, WebhookReconciler};
pub use signature::{SignatureVerifier, SignedHeaders};
