use actix_web::{HttpResponse, ResponseError};

use crate::proxy::ProxyError;

/// Body sent to callers when the upstream could not be reached.
pub const UPSTREAM_UNAVAILABLE: &str = "Service temporarily unavailable";

/// Errors surfaced by gateway handlers. Responses never carry internal detail.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Upstream call failed at the transport level
    #[error("proxy error: {0}")]
    Upstream(#[from] ProxyError),

    /// Inbound body declared as JSON could not be parsed
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::Upstream(e) => {
                tracing::error!(error = %e, "upstream call failed");
                HttpResponse::BadGateway().json(serde_json::json!({
                    "error": UPSTREAM_UNAVAILABLE
                }))
            }
            GatewayError::InvalidBody(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid_body",
                "message": msg
            })),
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
