/// HTTP handlers for the mail relay API
pub mod messages;
pub mod webhooks;
pub mod websocket;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "mail-relay-service",
    }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/mail")
            .configure(webhooks::register_routes)
            .configure(messages::register_routes),
    )
    .configure(websocket::register_routes);
}
