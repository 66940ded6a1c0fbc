use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageView;

/// Frames exchanged on the live mail channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MailEvent {
    /// Server pushes a newly delivered or ingested message
    NewEmail { message: Box<MessageView> },

    /// Connection established confirmation
    Connected { user_id: Uuid, timestamp: i64 },

    Ping { timestamp: i64 },

    Pong { timestamp: i64 },

    Error { code: String, message: String },
}

impl MailEvent {
    pub fn new_email(message: MessageView) -> Self {
        MailEvent::NewEmail {
            message: Box::new(message),
        }
    }

    pub fn connected(user_id: Uuid) -> Self {
        MailEvent::Connected {
            user_id,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn pong() -> Self {
        MailEvent::Pong {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        MailEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
