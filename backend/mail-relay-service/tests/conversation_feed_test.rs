mod common;

use async_trait::async_trait;
use common::{send_request, Harness};
use mail_relay_service::client::{ConversationFeed, MailSource};
use mail_relay_service::error::{AppError, AppResult};
use mail_relay_service::models::{MessageStatus, MessageView};
use mail_relay_service::threading::group_into_conversations;
use mail_relay_service::websocket::MailEvent;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Serves a fixed snapshot, or fails while `down` is set.
#[derive(Default)]
struct SnapshotSource {
    messages: Mutex<Vec<MessageView>>,
    down: Mutex<bool>,
}

impl SnapshotSource {
    fn set(&self, messages: Vec<MessageView>) {
        *self.messages.lock().unwrap() = messages;
    }

    fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }
}

#[async_trait]
impl MailSource for SnapshotSource {
    async fn fetch_user_messages(&self, _user_id: Uuid) -> AppResult<Vec<MessageView>> {
        if *self.down.lock().unwrap() {
            return Err(AppError::Transport("connection refused".into()));
        }
        Ok(self.messages.lock().unwrap().clone())
    }
}

async fn draft(h: &Harness, user: Uuid, subject: &str, thread: Option<Uuid>) -> MessageView {
    let mut request = send_request(user, subject, MessageStatus::Draft, vec![]);
    request.conversation_id = thread;
    let created = h.mail.send(request).await.unwrap();
    h.mail.find_one(created.message.id()).await.unwrap()
}

#[tokio::test]
async fn load_groups_messages_into_threads() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let first = draft(&h, user, "Thread", None).await;
    let reply = draft(&h, user, "Re: Thread", first.message.conversation_id).await;
    let other = draft(&h, user, "Other", None).await;

    let source = Arc::new(SnapshotSource::default());
    source.set(vec![other.clone(), reply.clone(), first.clone()]);

    let mut feed = ConversationFeed::new(user, source);
    feed.load().await;

    assert!(!feed.is_loading());
    assert!(feed.error().is_none());
    assert_eq!(feed.messages().len(), 3);

    let threads = feed.conversations();
    assert_eq!(threads.len(), 2);
    assert_eq!(Some(threads[0].id), other.message.conversation_id);
    assert_eq!(threads[1].messages[0].id(), first.id());
    assert_eq!(threads[1].messages[1].id(), reply.id());
}

#[tokio::test]
async fn live_push_matches_a_fresh_grouping() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let first = draft(&h, user, "Thread", None).await;
    let other = draft(&h, user, "Other", None).await;

    let source = Arc::new(SnapshotSource::default());
    source.set(vec![first.clone(), other.clone()]);
    let mut feed = ConversationFeed::new(user, source);
    feed.load().await;

    let reply = draft(&h, user, "Re: Thread", first.message.conversation_id).await;
    assert!(feed.apply_live(&MailEvent::new_email(reply.clone())));

    // the reply moves its thread back to the top
    assert_eq!(
        Some(feed.conversations()[0].id),
        first.message.conversation_id
    );
    assert_eq!(feed.conversations()[0].message_count, 2);
    assert_eq!(
        feed.conversations(),
        group_into_conversations(&[first, other, reply]).as_slice()
    );
}

#[tokio::test]
async fn text_frames_are_applied_like_events() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let message = draft(&h, user, "Pushed", None).await;

    let mut feed = ConversationFeed::new(user, Arc::new(SnapshotSource::default()));
    feed.load().await;
    assert!(feed.conversations().is_empty());

    let frame = MailEvent::new_email(message.clone()).to_json().unwrap();
    assert!(feed.apply_frame(&frame));
    assert_eq!(feed.conversations().len(), 1);
    assert_eq!(feed.messages()[0].id(), message.id());

    assert!(!feed.apply_frame("not json"));
    assert!(!feed.apply_frame(&MailEvent::pong().to_json().unwrap()));
    assert!(!feed.apply_live(&MailEvent::connected(user)));
    assert_eq!(feed.messages().len(), 1);
}

#[tokio::test]
async fn failed_reload_keeps_previous_state() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let message = draft(&h, user, "Kept", None).await;

    let source = Arc::new(SnapshotSource::default());
    source.set(vec![message.clone()]);
    let mut feed = ConversationFeed::new(user, source.clone());
    feed.load().await;

    source.set_down(true);
    feed.reload().await;

    assert!(feed.error().unwrap().contains("connection refused"));
    assert!(!feed.is_loading());
    assert_eq!(feed.conversations().len(), 1);
    assert_eq!(feed.messages()[0].id(), message.id());

    source.set_down(false);
    feed.reload().await;
    assert!(feed.error().is_none());
}

#[tokio::test]
async fn disconnect_keeps_the_feed() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let message = draft(&h, user, "Stay", None).await;

    let source = Arc::new(SnapshotSource::default());
    source.set(vec![message]);
    let mut feed = ConversationFeed::new(user, source);
    feed.load().await;

    feed.set_connected(true);
    assert!(feed.is_connected());
    feed.set_connected(false);

    assert!(!feed.is_connected());
    assert_eq!(feed.conversations().len(), 1);
}
