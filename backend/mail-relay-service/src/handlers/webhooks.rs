use actix_web::{web, HttpRequest, HttpResponse};

use super::ApiResponse;
use crate::models::InboundMailRequest;
use crate::services::{ReconcileOutcome, WebhookError};
use crate::state::AppState;

/// POST /api/v1/mail/webhooks/inbound
///
/// Takes `{"raw": "<rfc5322 message>"}`, or the raw message itself as the
/// body. Always answers 200 so the sender's infrastructure never retries.
pub async fn inbound_mail(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let raw = match serde_json::from_slice::<InboundMailRequest>(&body) {
        Ok(request) => request.raw.into_bytes(),
        Err(_) => body.to_vec(),
    };

    let outcome = state.inbound.ingest(&raw).await;
    HttpResponse::Ok().json(ApiResponse::ok(outcome))
}

/// POST /api/v1/mail/webhooks/outbound
pub async fn outbound_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, WebhookError> {
    let headers = req.headers();
    let lookup = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let outcome = state.reconciler.reconcile(lookup, &body).await?;

    let response = match outcome {
        ReconcileOutcome::NotFound => HttpResponse::NotFound().json(ApiResponse {
            success: false,
            data: Some(outcome),
            error: Some("no message matches the delivery event".to_string()),
        }),
        other => HttpResponse::Ok().json(ApiResponse::ok(other)),
    };
    Ok(response)
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhooks/inbound", web::post().to(inbound_mail))
        .route("/webhooks/outbound", web::post().to(outbound_status));
}
