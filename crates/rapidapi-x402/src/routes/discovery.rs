use actix_web::{web, HttpResponse};
use std::collections::HashMap;

use super::count_param;
use crate::discovery::{build_discovery_page, DISCOVERY_PATH};
use crate::state::AppState;

/// GET /.well-known/x402?limit=&offset= - discovery manifest
pub async fn manifest(
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let limit = count_param(query.get("limit").map(String::as_str));
    let offset = count_param(query.get("offset").map(String::as_str));
    HttpResponse::Ok().json(build_discovery_page(
        &state.catalog,
        &state.config.public_base_url,
        limit,
        offset,
    ))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(DISCOVERY_PATH, web::get().to(manifest));
}
