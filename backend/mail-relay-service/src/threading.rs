//! Conversation thread model
//!
//! Pure grouping of messages into conversation threads. Used by the read API
//! (`/users/{id}/conversations`) and by the client feed, which rebuilds the
//! whole view from the flat message list on every live update.
//!
//! The output depends only on the *set* of messages: input order and
//! duplicates do not change it, so grouping an already-grouped list again
//! yields the same threads in the same order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::MessageView;

/// A conversation derived from its member messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub participants: Vec<String>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    /// Oldest first, for reading
    pub messages: Vec<MessageView>,
}

/// Thread key: the conversation id, or the message's own id when unthreaded.
pub fn thread_key(message: &MessageView) -> Uuid {
    message.message.conversation_id.unwrap_or(message.message.id)
}

/// Group messages into threads.
///
/// Messages inside a thread are ordered oldest first; threads are ordered by
/// latest activity, newest first. Ties break on id so the order is total.
/// When the same message id appears more than once the last occurrence wins,
/// which lets a live update replace a stale copy.
pub fn group_into_conversations(messages: &[MessageView]) -> Vec<ConversationThread> {
    let mut last_seen: HashMap<Uuid, usize> = HashMap::with_capacity(messages.len());
    for (idx, message) in messages.iter().enumerate() {
        last_seen.insert(message.id(), idx);
    }

    let mut groups: HashMap<Uuid, Vec<MessageView>> = HashMap::new();
    for (idx, message) in messages.iter().enumerate() {
        if last_seen.get(&message.id()) != Some(&idx) {
            continue;
        }
        groups
            .entry(thread_key(message))
            .or_default()
            .push(message.clone());
    }

    let mut threads: Vec<ConversationThread> = groups
        .into_iter()
        .filter_map(|(id, members)| build_thread(id, members))
        .collect();

    threads.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    threads
}

/// Flatten threads back into their member messages.
pub fn flatten(threads: &[ConversationThread]) -> Vec<MessageView> {
    threads
        .iter()
        .flat_map(|thread| thread.messages.iter().cloned())
        .collect()
}

fn build_thread(id: Uuid, mut members: Vec<MessageView>) -> Option<ConversationThread> {
    members.sort_by(|a, b| {
        a.message
            .created_at
            .cmp(&b.message.created_at)
            .then_with(|| a.id().cmp(&b.id()))
    });

    let first = members.first()?;
    // recomputed from the member set rather than trusted from a stored row
    let last_message_at = members
        .iter()
        .map(|m| m.message.created_at)
        .max()
        .unwrap_or(first.message.created_at);

    let participants: BTreeSet<String> = members
        .iter()
        .flat_map(|m| m.recipients.iter())
        .map(|r| r.recipient_email.trim().to_ascii_lowercase())
        .filter(|address| !address.is_empty())
        .collect();

    Some(ConversationThread {
        id,
        user_id: first.message.user_id,
        subject: first.message.subject.clone(),
        participants: participants.into_iter().collect(),
        last_message_at,
        message_count: members.len(),
        created_at: first.message.created_at,
        messages: members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DeliveryStatus, Message, MessagePriority, MessageStatus, Recipient, RecipientType,
    };
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn message(conversation_id: Option<Uuid>, minutes: i64, to: &[&str]) -> MessageView {
        let id = Uuid::new_v4();
        MessageView {
            message: Message {
                id,
                user_id: Uuid::nil(),
                conversation_id,
                from_email: "me@int.local".into(),
                from_name: "Me".into(),
                subject: format!("subject at {minutes}"),
                text_content: String::new(),
                html_content: None,
                priority: MessagePriority::Low,
                status: MessageStatus::Sent,
                relay_submission_id: None,
                created_at: at(minutes),
                updated_at: at(minutes),
                deleted_at: None,
                sent_at: None,
                scheduled_for: None,
            },
            recipients: to
                .iter()
                .map(|address| Recipient {
                    id: Uuid::new_v4(),
                    email_id: id,
                    recipient_email: address.to_string(),
                    recipient_name: None,
                    recipient_type: RecipientType::To,
                    contact_id: None,
                    delivery_channel: None,
                    delivery_status: DeliveryStatus::Pending,
                })
                .collect(),
            attachments: vec![],
            conversation: None,
        }
    }

    #[test]
    fn groups_by_conversation_and_orders_for_reading() {
        let thread = Uuid::new_v4();
        let later = message(Some(thread), 10, &["b@ext.test"]);
        let earlier = message(Some(thread), 1, &["a@ext.test"]);

        let threads = group_into_conversations(&[later.clone(), earlier.clone()]);

        assert_eq!(threads.len(), 1);
        let only = &threads[0];
        assert_eq!(only.id, thread);
        assert_eq!(only.message_count, 2);
        assert_eq!(only.messages[0].id(), earlier.id());
        assert_eq!(only.messages[1].id(), later.id());
        assert_eq!(only.subject, earlier.message.subject);
        assert_eq!(only.last_message_at, at(10));
        assert_eq!(only.created_at, at(1));
        assert_eq!(only.participants, vec!["a@ext.test", "b@ext.test"]);
    }

    #[test]
    fn unthreaded_message_is_its_own_conversation() {
        let loose = message(None, 3, &[]);
        let threads = group_into_conversations(&[loose.clone()]);

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id, loose.id());
        assert_eq!(threads[0].message_count, 1);
    }

    #[test]
    fn threads_are_listed_newest_activity_first() {
        let old_thread = Uuid::new_v4();
        let new_thread = Uuid::new_v4();
        let messages = vec![
            message(Some(old_thread), 0, &[]),
            message(Some(new_thread), 5, &[]),
            message(Some(old_thread), 2, &[]),
        ];

        let threads = group_into_conversations(&messages);

        assert_eq!(threads[0].id, new_thread);
        assert_eq!(threads[1].id, old_thread);
        assert_eq!(threads[1].last_message_at, at(2));
    }

    #[test]
    fn grouping_is_idempotent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let messages = vec![
            message(Some(a), 4, &["x@ext.test"]),
            message(Some(b), 4, &["y@ext.test"]),
            message(None, 1, &[]),
            message(Some(a), 0, &["z@ext.test"]),
        ];

        let once = group_into_conversations(&messages);
        let twice = group_into_conversations(&flatten(&once));
        assert_eq!(once, twice);

        let mut reversed = messages.clone();
        reversed.reverse();
        assert_eq!(group_into_conversations(&reversed), once);
    }

    #[test]
    fn duplicate_message_keeps_last_copy() {
        let thread = Uuid::new_v4();
        let original = message(Some(thread), 1, &[]);
        let mut updated = original.clone();
        updated.message.status = MessageStatus::Failed;

        let threads = group_into_conversations(&[original, updated.clone()]);

        assert_eq!(threads[0].message_count, 1);
        assert_eq!(threads[0].messages[0].status(), MessageStatus::Failed);
    }
}
