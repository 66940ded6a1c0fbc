use actix_web::{web, HttpResponse};
use uuid::Uuid;

use super::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::models::{MessageStatus, SendMailRequest, TransitionRequest, UpdateMailRequest};
use crate::state::AppState;

/// POST /api/v1/mail
pub async fn send_mail(
    state: web::Data<AppState>,
    body: web::Json<SendMailRequest>,
) -> AppResult<HttpResponse> {
    let outcome = state.mail.send(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(outcome)))
}

/// GET /api/v1/mail
pub async fn list_mail(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let messages = state.mail.find_all().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(messages)))
}

/// GET /api/v1/mail/{id}
pub async fn get_mail(state: web::Data<AppState>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let message = state.mail.find_one(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(message)))
}

/// PATCH /api/v1/mail/{id}
pub async fn update_mail(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateMailRequest>,
) -> AppResult<HttpResponse> {
    let message = state
        .mail
        .update(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(message)))
}

/// POST /api/v1/mail/{id}/status
pub async fn transition_mail(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<TransitionRequest>,
) -> AppResult<HttpResponse> {
    let outcome = state
        .mail
        .transition(path.into_inner(), body.status)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcome)))
}

/// DELETE /api/v1/mail/{id}
pub async fn delete_mail(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    state.mail.remove(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/v1/mail/users/{user_id}
pub async fn list_user_mail(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let messages = state.mail.find_by_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(messages)))
}

/// GET /api/v1/mail/users/{user_id}/conversations
pub async fn list_user_conversations(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let threads = state.mail.conversations_for_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(threads)))
}

/// GET /api/v1/mail/conversations/{id}
pub async fn get_conversation(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let detail = state.mail.conversation(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(detail)))
}

/// GET /api/v1/mail/status/{status}
pub async fn list_by_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let status: MessageStatus = path.parse().map_err(AppError::Validation)?;
    let messages = state.mail.find_by_status(status).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(messages)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(send_mail))
        .route("", web::get().to(list_mail))
        .route("/users/{user_id}", web::get().to(list_user_mail))
        .route(
            "/users/{user_id}/conversations",
            web::get().to(list_user_conversations),
        )
        .route("/conversations/{id}", web::get().to(get_conversation))
        .route("/status/{status}", web::get().to(list_by_status))
        .route("/{id}", web::get().to(get_mail))
        .route("/{id}", web::patch().to(update_mail))
        .route("/{id}", web::delete().to(delete_mail))
        .route("/{id}/status", web::post().to(transition_mail));
}
