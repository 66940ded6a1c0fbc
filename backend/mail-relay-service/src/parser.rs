//! Raw-message parser for inbound RFC 5322 mail.

use mail_parser::MessageParser;

use crate::error::{AppError, AppResult};

/// Structured fields extracted from a wire-format message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMail {
    pub from: String,
    pub from_name: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

impl ParsedMail {
    /// First `To` address; the one inbound mail is filed under.
    pub fn primary_recipient(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }
}

pub trait RawMessageParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> AppResult<ParsedMail>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MimeMessageParser;

impl RawMessageParser for MimeMessageParser {
    fn parse(&self, raw: &[u8]) -> AppResult<ParsedMail> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(AppError::Validation("empty message".into()));
        }

        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| AppError::Validation("unparseable message".into()))?;

        let sender = message.from().and_then(|a| a.first());
        let from = sender
            .and_then(|a| a.address())
            .unwrap_or_default()
            .to_string();
        let from_name = sender.and_then(|a| a.name()).unwrap_or_default().to_string();

        let to = message.to().map_or_else(Vec::new, |a| {
            a.iter()
                .filter_map(|a| a.address())
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect()
        });

        Ok(ParsedMail {
            from,
            from_name,
            to,
            subject: message.subject().unwrap_or_default().to_string(),
            text: message
                .body_text(0)
                .map(|body| body.trim_end().to_string())
                .unwrap_or_default(),
        })
    }
}
