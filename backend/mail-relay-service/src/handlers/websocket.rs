use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;
use crate::websocket::session::MailSession;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Uuid,
}

/// GET /ws?user_id=...
///
/// Joins the caller to the live channel named by their user id.
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let user_id = query.user_id;

    let (subscriber_id, rx) = state.registry.add_subscriber(user_id).await;
    let session = MailSession::new(user_id, subscriber_id, state.registry.clone(), rx);

    match ws::start(session, &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            state.registry.remove_subscriber(user_id, subscriber_id).await;
            Err(e)
        }
    }
}

/// GET /ws/status/{user_id}
pub async fn ws_status(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let user_id = path.into_inner();
    let connection_count = state.registry.subscriber_count(user_id).await;

    HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "connected": connection_count > 0,
        "connection_count": connection_count
    }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_handler))
        .route("/ws/status/{user_id}", web::get().to(ws_status));
}
