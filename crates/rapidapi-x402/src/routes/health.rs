use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::GatewayError;
use crate::metrics::metrics_output;
use crate::state::AppState;

/// GET /health - liveness plus `testMode` when payments are bypassed
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let mut response = serde_json::json!({
        "status": "ok",
        "service": "rapidapi-x402",
        "version": env!("CARGO_PKG_VERSION"),
    });

    if state.config.payment_bypass {
        response["testMode"] = serde_json::json!(true);
    }

    HttpResponse::Ok().json(response)
}

/// Compare bearer tokens through their SHA-256 digests so timing depends on
/// neither content nor length.
fn token_matches(presented: &str, expected: &str) -> bool {
    use sha2::{Digest, Sha256};
    Sha256::digest(presented.as_bytes())
        .iter()
        .zip(Sha256::digest(expected.as_bytes()).iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// GET /metrics - Prometheus text format, behind METRICS_TOKEN when set
pub async fn metrics(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    if let Some(expected) = state.config.metrics_token.as_deref() {
        if !bearer_token(&req).is_some_and(|token| token_matches(token, expected)) {
            return Ok(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Bearer token required"
            })));
        }
    }

    let output = metrics_output()
        .map_err(|e| GatewayError::Internal(format!("failed to encode metrics: {e}")))?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(output))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
