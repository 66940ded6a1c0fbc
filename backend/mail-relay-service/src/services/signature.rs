//! Relay callback signatures (Svix scheme)
//!
//! The signed content is `"{id}.{timestamp}.{body}"`, MACed with
//! HMAC-SHA256 under the base64-decoded secret. The signature header holds
//! one or more space-separated `v1,<base64>` entries; any match passes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::reconcile::WebhookError;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";

/// The three signature headers, read under either naming scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub id: String,
    pub timestamp: String,
    pub signature: String,
}

impl SignedHeaders {
    /// `lookup` returns a header value by lowercase name.
    pub fn extract<F>(lookup: F) -> Result<Self, WebhookError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str, alias: &'static str| {
            lookup(name)
                .or_else(|| lookup(alias))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(WebhookError::MissingHeader(name))
        };

        Ok(Self {
            id: read("svix-id", "webhook-id")?,
            timestamp: read("svix-timestamp", "webhook-timestamp")?,
            signature: read("svix-signature", "webhook-signature")?,
        })
    }
}

#[derive(Clone)]
pub struct SignatureVerifier {
    key: Vec<u8>,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: &str, tolerance_secs: i64) -> Result<Self, AppError> {
        let encoded = secret.trim();
        let encoded = encoded.strip_prefix(SECRET_PREFIX).unwrap_or(encoded);
        let key = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Config(format!("webhook secret is not base64: {e}")))?;
        if key.is_empty() {
            return Err(AppError::Config("webhook secret is empty".into()));
        }

        Ok(Self {
            key,
            tolerance_secs,
        })
    }

    pub fn verify(&self, headers: &SignedHeaders, body: &[u8]) -> Result<(), WebhookError> {
        self.verify_at(headers, body, Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        headers: &SignedHeaders,
        body: &[u8],
        now: i64,
    ) -> Result<(), WebhookError> {
        let timestamp: i64 = headers
            .timestamp
            .parse()
            .map_err(|_| WebhookError::MalformedPayload("invalid signature timestamp".into()))?;
        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(WebhookError::StaleTimestamp);
        }

        let mac = self.mac(&headers.id, &headers.timestamp, body)?;

        let matched = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .filter_map(|(_, sig)| STANDARD.decode(sig).ok())
            .any(|candidate| mac.clone().verify_slice(&candidate).is_ok());

        if matched {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }

    /// `v1,<base64>` signature for the given content
    pub fn sign(&self, id: &str, timestamp: &str, body: &[u8]) -> Result<String, WebhookError> {
        let mac = self.mac(id, timestamp, body)?;
        Ok(format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }
}
