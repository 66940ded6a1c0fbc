//! External mail relay
//!
//! `ResendRelay` submits a message to the Resend HTTP API and returns the
//! provider's submission id. Delivery outcomes arrive later through the signed
//! outbound webhook; nothing here retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelayError {
    #[error("relay transport error: {0}")]
    Transport(String),

    #[error("relay rejected submission ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("relay response could not be decoded: {0}")]
    Decode(String),
}

/// One send addressing every external recipient together
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayRequest {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[async_trait]
pub trait ExternalRelay: Send + Sync {
    /// Returns the provider's submission id
    async fn send(&self, request: &RelayRequest) -> Result<String, RelayError>;
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    id: String,
}

pub struct ResendRelay {
    api_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl ResendRelay {
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RelayError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl ExternalRelay for ResendRelay {
    async fn send(&self, request: &RelayRequest) -> Result<String, RelayError> {
        let url = format!("{}/emails", self.api_url);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RelayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let submission: SubmissionResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Decode(e.to_string()))?;

        debug!(
            submission_id = %submission.id,
            recipients = request.to.len(),
            "relay accepted submission"
        );

        Ok(submission.id)
    }
}
