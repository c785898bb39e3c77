use actix_web::{web, HttpResponse};
use std::collections::HashMap;

use super::count_param;
use crate::ledger::DEFAULT_RECENT_LIMIT;
use crate::state::AppState;

/// GET /logs?limit=N - most recent proxy calls, newest first
pub async fn list_logs(
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let limit = count_param(query.get("limit").map(String::as_str)).unwrap_or(DEFAULT_RECENT_LIMIT);
    HttpResponse::Ok().json(state.ledger.recent(limit))
}

/// DELETE /logs - drop every recorded entry
pub async fn clear_logs(state: web::Data<AppState>) -> HttpResponse {
    state.ledger.clear();
    tracing::info!("usage ledger cleared");
    HttpResponse::Ok().json(serde_json::json!({ "status": "cleared" }))
}

/// GET /stats - aggregate usage statistics
pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.ledger.statistics())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/logs")
            .route(web::get().to(list_logs))
            .route(web::delete().to(clear_logs)),
    )
    .route("/stats", web::get().to(stats));
}
