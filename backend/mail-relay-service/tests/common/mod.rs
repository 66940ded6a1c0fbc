#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use mail_relay_service::directory::{DirectoryUser, IdentityDirectory};
use mail_relay_service::error::{AppError, AppResult};
use mail_relay_service::models::{
    Attachment, Conversation, DeliveryChannel, DeliveryStatus, Message, MessagePatch,
    MessageStatus, MessageView, NewMessage, Recipient, RecipientInput, RecipientType,
    SendMailRequest,
};
use mail_relay_service::parser::MimeMessageParser;
use mail_relay_service::relay::{ExternalRelay, RelayError, RelayRequest};
use mail_relay_service::repository::MailStore;
use mail_relay_service::services::{
    InboundPipeline, MailService, OutboundRouter, SignatureVerifier, WebhookReconciler,
};
use mail_relay_service::state::AppState;
use mail_relay_service::websocket::{ChannelRegistry, MailEvent, RealtimeNotifier};

/// base64("integration-webhook-secret")
pub const WEBHOOK_SECRET: &str = "whsec_aW50ZWdyYXRpb24td2ViaG9vay1zZWNyZXQ=";
pub const DEFAULT_FROM: &str = "onboarding@resend.dev";

#[derive(Default)]
struct StoreInner {
    messages: Vec<Message>,
    recipients: Vec<Recipient>,
    attachments: Vec<Attachment>,
    conversations: HashMap<Uuid, Conversation>,
}

/// `MailStore` kept in memory. Every create is applied all-or-nothing and
/// gets a strictly increasing timestamp.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
    clock: AtomicI64,
    fail_on_recipients: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> DateTime<Utc> {
        let step = self.clock.fetch_add(1, Ordering::SeqCst);
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::seconds(step)
    }

    /// Make the next creates with recipients fail mid-way.
    pub fn fail_on_recipients(&self, fail: bool) {
        self.fail_on_recipients.store(fail, Ordering::SeqCst);
    }

    pub fn message(&self, id: Uuid) -> Option<Message> {
        let inner = self.inner.lock().unwrap();
        inner.messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn recipients_of(&self, id: Uuid) -> Vec<Recipient> {
        let inner = self.inner.lock().unwrap();
        inner
            .recipients
            .iter()
            .filter(|r| r.email_id == id)
            .cloned()
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn conversation_count(&self) -> usize {
        self.inner.lock().unwrap().conversations.len()
    }

    pub fn recipient_count(&self) -> usize {
        self.inner.lock().unwrap().recipients.len()
    }

    fn view(inner: &StoreInner, message: &Message) -> MessageView {
        MessageView {
            message: message.clone(),
            recipients: inner
                .recipients
                .iter()
                .filter(|r| r.email_id == message.id)
                .cloned()
                .collect(),
            attachments: inner
                .attachments
                .iter()
                .filter(|a| a.email_id == message.id)
                .cloned()
                .collect(),
            conversation: None,
        }
    }

    fn live<'a>(inner: &'a mut StoreInner, id: Uuid) -> Option<&'a mut Message> {
        inner
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.deleted_at.is_none())
    }
}

#[async_trait]
impl MailStore for InMemoryStore {
    async fn create_message(&self, new: NewMessage) -> AppResult<MessageView> {
        let now = self.tick();
        let mut inner = self.inner.lock().unwrap();
        let participants = new.participant_addresses();

        let conversation = match new.conversation_id {
            None => Conversation {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                subject: new.subject.clone(),
                participant_emails: participants,
                message_count: 1,
                last_message_at: now,
                created_at: now,
            },
            Some(id) => {
                let existing = inner
                    .conversations
                    .get(&id)
                    .filter(|c| c.user_id == new.user_id)
                    .cloned()
                    .ok_or(AppError::NotFound)?;
                let merged: BTreeSet<String> = existing
                    .participant_emails
                    .iter()
                    .cloned()
                    .chain(participants)
                    .collect();
                Conversation {
                    message_count: existing.message_count + 1,
                    last_message_at: existing.last_message_at.max(now),
                    participant_emails: merged.into_iter().collect(),
                    ..existing
                }
            }
        };

        if self.fail_on_recipients.load(Ordering::SeqCst) && !new.recipients.is_empty() {
            return Err(AppError::Database("recipient insert failed".into()));
        }

        let message = Message {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            conversation_id: Some(conversation.id),
            from_email: new.from_email,
            from_name: new.from_name,
            subject: new.subject,
            text_content: new.text_content,
            html_content: new.html_content,
            priority: new.priority.unwrap_or_default(),
            status: new.status.unwrap_or_default(),
            relay_submission_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sent_at: None,
            scheduled_for: new.scheduled_for,
        };

        let recipients: Vec<Recipient> = new
            .recipients
            .into_iter()
            .map(|r| Recipient {
                id: Uuid::new_v4(),
                email_id: message.id,
                recipient_email: r.address.trim().to_string(),
                recipient_name: r.display_name,
                recipient_type: r.kind,
                contact_id: r.contact_id,
                delivery_channel: None,
                delivery_status: DeliveryStatus::Pending,
            })
            .collect();

        let attachments: Vec<Attachment> = new
            .attachments
            .into_iter()
            .map(|a| Attachment {
                id: Uuid::new_v4(),
                email_id: message.id,
                filename: a.filename,
                file_size: a.file_size,
                mime_type: a.mime_type,
                storage_url: a.storage_url,
                storage_provider: a.storage_provider,
                uploaded_at: a.uploaded_at.unwrap_or(now),
            })
            .collect();

        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        inner.messages.push(message.clone());
        inner.recipients.extend(recipients.iter().cloned());
        inner.attachments.extend(attachments.iter().cloned());

        Ok(MessageView {
            message,
            recipients,
            attachments,
            conversation: Some(conversation),
        })
    }

    async fn find_one(&self, id: Uuid) -> AppResult<MessageView> {
        let inner = self.inner.lock().unwrap();
        let message = inner
            .messages
            .iter()
            .find(|m| m.id == id && m.deleted_at.is_none())
            .ok_or(AppError::NotFound)?;
        let mut view = Self::view(&inner, message);
        view.conversation = message
            .conversation_id
            .and_then(|c| inner.conversations.get(&c).cloned());
        Ok(view)
    }

    async fn find_all(&self) -> AppResult<Vec<MessageView>> {
        let inner = self.inner.lock().unwrap();
        let mut messages: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.deleted_at.is_none())
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(messages.into_iter().map(|m| Self::view(&inner, m)).collect())
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<MessageView>> {
        let inner = self.inner.lock().unwrap();
        let mut messages: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.user_id == user_id && m.deleted_at.is_none())
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(messages.into_iter().map(|m| Self::view(&inner, m)).collect())
    }

    async fn find_by_conversation(&self, conversation_id: Uuid) -> AppResult<Vec<MessageView>> {
        let inner = self.inner.lock().unwrap();
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(AppError::NotFound);
        }
        let mut messages: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == Some(conversation_id) && m.deleted_at.is_none())
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages.into_iter().map(|m| Self::view(&inner, m)).collect())
    }

    async fn find_by_status(&self, status: MessageStatus) -> AppResult<Vec<Message>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.status == status && m.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn find_conversation(&self, id: Uuid) -> AppResult<Conversation> {
        let inner = self.inner.lock().unwrap();
        inner
            .conversations
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn latest_by_subject(&self, user_id: Uuid, subject: &str) -> AppResult<Option<Message>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.user_id == user_id && m.subject == subject && m.deleted_at.is_none())
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn find_by_submission(&self, submission_id: &str) -> AppResult<Option<Message>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .find(|m| {
                m.relay_submission_id.as_deref() == Some(submission_id) && m.deleted_at.is_none()
            })
            .cloned())
    }

    async fn update_fields(&self, id: Uuid, patch: &MessagePatch) -> AppResult<Message> {
        let now = self.tick();
        let mut inner = self.inner.lock().unwrap();
        let message = Self::live(&mut inner, id).ok_or(AppError::NotFound)?;
        if let Some(subject) = &patch.subject {
            message.subject = subject.clone();
        }
        if let Some(text) = &patch.text_content {
            message.text_content = text.clone();
        }
        if let Some(html) = &patch.html_content {
            message.html_content = Some(html.clone());
        }
        if let Some(priority) = patch.priority {
            message.priority = priority;
        }
        if let Some(at) = patch.scheduled_for {
            message.scheduled_for = Some(at);
        }
        message.updated_at = now;
        Ok(message.clone())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Message>> {
        let mut inner = self.inner.lock().unwrap();
        let message = Self::live(&mut inner, id).ok_or(AppError::NotFound)?;
        if message.status != expected {
            return Ok(None);
        }
        message.status = next;
        if sent_at.is_some() {
            message.sent_at = sent_at;
        }
        Ok(Some(message.clone()))
    }

    async fn set_delivery(
        &self,
        id: Uuid,
        addresses: &[String],
        channel: Option<DeliveryChannel>,
        status: DeliveryStatus,
    ) -> AppResult<u64> {
        let wanted: Vec<String> = addresses
            .iter()
            .map(|a| a.trim().to_ascii_lowercase())
            .collect();
        let mut inner = self.inner.lock().unwrap();
        let mut touched = 0;
        for recipient in inner.recipients.iter_mut().filter(|r| r.email_id == id) {
            if wanted.contains(&recipient.recipient_email.to_ascii_lowercase()) {
                recipient.delivery_status = status;
                if channel.is_some() {
                    recipient.delivery_channel = channel;
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn record_submission(&self, id: Uuid, submission_id: &str) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let message = Self::live(&mut inner, id).ok_or(AppError::NotFound)?;
        message.relay_submission_id = Some(submission_id.to_string());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> AppResult<()> {
        let now = self.tick();
        let mut inner = self.inner.lock().unwrap();
        let message = Self::live(&mut inner, id).ok_or(AppError::NotFound)?;
        message.deleted_at = Some(now);
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticDirectory {
    users: Mutex<HashMap<String, DirectoryUser>>,
}

impl StaticDirectory {
    pub fn add(&self, address: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(
            address.to_ascii_lowercase(),
            DirectoryUser {
                id,
                email: address.to_string(),
            },
        );
        id
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn resolve_by_address(&self, address: &str) -> AppResult<Option<DirectoryUser>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(&address.trim().to_ascii_lowercase())
            .cloned())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pushes: Mutex<Vec<(Uuid, MailEvent)>>,
}

impl RecordingNotifier {
    pub fn pushes(&self) -> Vec<(Uuid, MailEvent)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn pushes_to(&self, channel_id: Uuid) -> usize {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == channel_id)
            .count()
    }
}

#[async_trait]
impl RealtimeNotifier for RecordingNotifier {
    async fn push_to_channel(&self, channel_id: Uuid, event: &MailEvent) -> usize {
        self.pushes.lock().unwrap().push((channel_id, event.clone()));
        1
    }
}

#[derive(Default)]
pub struct RecordingRelay {
    requests: Mutex<Vec<RelayRequest>>,
    fail: AtomicBool,
    issued: AtomicUsize,
}

impl RecordingRelay {
    pub fn requests(&self) -> Vec<RelayRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail_with_rejection(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExternalRelay for RecordingRelay {
    async fn send(&self, request: &RelayRequest) -> Result<String, RelayError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Rejected {
                status: 422,
                body: "invalid from address".into(),
            });
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("re_{n:04}"))
    }
}

/// Every service wired against the fakes
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub directory: Arc<StaticDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub relay: Arc<RecordingRelay>,
    pub router: Arc<OutboundRouter>,
    pub mail: Arc<MailService>,
    pub inbound: Arc<InboundPipeline>,
    pub reconciler: Arc<WebhookReconciler>,
    pub verifier: SignatureVerifier,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let directory = Arc::new(StaticDirectory::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let relay = Arc::new(RecordingRelay::default());
        let verifier = SignatureVerifier::new(WEBHOOK_SECRET, 300).unwrap();

        let router = Arc::new(OutboundRouter::new(
            store.clone(),
            directory.clone(),
            notifier.clone(),
            relay.clone(),
            DEFAULT_FROM,
        ));
        let mail = Arc::new(MailService::new(store.clone(), router.clone()));
        let inbound = Arc::new(InboundPipeline::new(
            store.clone(),
            directory.clone(),
            notifier.clone(),
            Arc::new(MimeMessageParser),
        ));
        let reconciler = Arc::new(WebhookReconciler::new(
            store.clone(),
            directory.clone(),
            verifier.clone(),
        ));

        Self {
            store,
            directory,
            notifier,
            relay,
            router,
            mail,
            inbound,
            reconciler,
            verifier,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            mail: self.mail.clone(),
            inbound: self.inbound.clone(),
            reconciler: self.reconciler.clone(),
            registry: ChannelRegistry::new(),
        }
    }

    /// Header lookup carrying a valid signature for `body`.
    pub fn signed_headers(&self, body: &[u8]) -> HashMap<String, String> {
        let timestamp = Utc::now().timestamp().to_string();
        let id = format!("msg_{}", Uuid::new_v4().simple());
        let signature = self.verifier.sign(&id, &timestamp, body).unwrap();

        HashMap::from([
            ("svix-id".to_string(), id),
            ("svix-timestamp".to_string(), timestamp),
            ("svix-signature".to_string(), signature),
        ])
    }
}

pub fn recipient(address: &str, kind: RecipientType) -> RecipientInput {
    RecipientInput {
        recipient_email: address.to_string(),
        recipient_name: None,
        recipient_type: kind,
        contact_id: None,
    }
}

pub fn send_request(
    user_id: Uuid,
    subject: &str,
    status: MessageStatus,
    recipients: Vec<RecipientInput>,
) -> SendMailRequest {
    SendMailRequest {
        user_id,
        from_email: "sender@int.local".to_string(),
        from_name: "Sender".to_string(),
        subject: subject.to_string(),
        text_content: "hello there".to_string(),
        html_content: None,
        priority: None,
        status: Some(status),
        conversation_id: None,
        scheduled_for: None,
        recipients,
        attachments: vec![],
    }
}

pub fn raw_mail(from: &str, to: &str, subject: &str, body: &str) -> String {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain\r\n\r\n{body}\r\n"
    )
}
