use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::services::{AppConfig, HttpMethod};
use crate::state::AppState;

/// Public listing entry for one service.
#[derive(Debug, Serialize)]
pub struct CatalogEntry<'a> {
    pub path: String,
    pub method: HttpMethod,
    pub price: &'a str,
    pub description: &'a str,
}

/// Catalog entries in configuration order.
pub fn catalog_entries(config: &AppConfig) -> Vec<CatalogEntry<'_>> {
    config
        .services
        .iter()
        .map(|s| CatalogEntry {
            path: s.route(),
            method: s.method,
            price: s.price.as_str(),
            description: &s.description,
        })
        .collect()
}

/// GET /catalog - every payable endpoint with its price
pub async fn catalog(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(catalog_entries(&state.catalog))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/catalog", web::get().to(catalog));
}
