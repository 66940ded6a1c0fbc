use std::sync::Arc;

use crate::services::{InboundPipeline, MailService, WebhookReconciler};
use crate::websocket::ChannelRegistry;

#[derive(Clone)]
pub struct AppState {
    pub mail: Arc<MailService>,
    pub inbound: Arc<InboundPipeline>,
    pub reconciler: Arc<WebhookReconciler>,
    pub registry: ChannelRegistry,
}
