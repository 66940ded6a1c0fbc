use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use super::MailSource;
use crate::error::{AppError, AppResult};
use crate::handlers::ApiResponse;
use crate::models::MessageView;

/// `MailSource` over the service's own read API
pub struct HttpMailSource {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpMailSource {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl MailSource for HttpMailSource {
    async fn fetch_user_messages(&self, user_id: Uuid) -> AppResult<Vec<MessageView>> {
        let url = format!("{}/api/v1/mail/users/{}", self.base_url, user_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "GET {url} returned {}",
                status.as_u16()
            )));
        }

        let body: ApiResponse<Vec<MessageView>> = response
            .json()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        match body.data {
            Some(messages) if body.success => Ok(messages),
            _ => Err(AppError::Transport(
                body.error.unwrap_or_else(|| "empty response".to_string()),
            )),
        }
    }
}
