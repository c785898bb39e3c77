//! Payment gate middleware.
//!
//! Requests whose `"<METHOD> <path>"` appears in the payment table must carry
//! a base64-encoded payment payload. The payload is verified before the
//! handler runs and settled only once the handler produced a successful
//! response, so callers are never charged for failed upstream calls.

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpResponse};
use base64::Engine;
use serde_json::Value;

use crate::metrics::PAYMENT_ATTEMPTS;
use crate::payment::{PaymentRequiredBody, PaymentRequirements, SettleResponse, X402_VERSION};
use crate::state::AppState;

/// Payment header names, in lookup order.
pub const PAYMENT_HEADERS: &[&str] = &["payment-signature", "x-payment"];

/// Build the 402 Payment Required HTTP response.
pub fn payment_required_response(requirements: PaymentRequirements, error: &str) -> HttpResponse {
    HttpResponse::PaymentRequired().json(PaymentRequiredBody {
        x402_version: X402_VERSION,
        error: error.to_string(),
        accepts: vec![requirements],
    })
}

/// Decode a payment header (base64 of a JSON payload).
pub fn decode_payment_header(header_value: &str) -> Result<Value, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header_value.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON payload: {e}"))
}

/// Value of the `PAYMENT-RESPONSE` header: base64 of the settlement JSON.
pub fn payment_response_header(settle: &SettleResponse) -> String {
    let response = serde_json::json!({
        "success": settle.success,
        "transaction": settle.transaction,
        "network": settle.network,
        "payer": settle.payer,
    });
    base64::engine::general_purpose::STANDARD.encode(response.to_string())
}

/// actix-web middleware enforcing the payment table in [`AppState`].
pub async fn payment_gate(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
        return next.call(req).await.map(ServiceResponse::map_into_left_body);
    };
    if state.config.payment_bypass {
        return next.call(req).await.map(ServiceResponse::map_into_left_body);
    }

    // Router matches on the requoted path (`/us%65r` is `/user`), not the raw URI.
    let path = req.match_info().as_str().to_owned();
    let key = format!("{} {}", req.method(), path);
    let Some(requirement) = state.payment_routes.get(&key) else {
        return next.call(req).await.map(ServiceResponse::map_into_left_body);
    };

    let resource = format!("{}{}", state.config.public_base_url, path);
    let requirements = PaymentRequirements::for_route(requirement, &resource);

    let header = PAYMENT_HEADERS
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let Some(header) = header else {
        PAYMENT_ATTEMPTS.with_label_values(&["missing"]).inc();
        let resp = payment_required_response(requirements, "X-PAYMENT header is required");
        return Ok(req.into_response(resp).map_into_right_body());
    };

    let payload = match decode_payment_header(&header) {
        Ok(p) => p,
        Err(e) => {
            PAYMENT_ATTEMPTS.with_label_values(&["invalid"]).inc();
            tracing::warn!(error = %e, route = %key, "invalid payment header");
            let resp = payment_required_response(requirements, "invalid payment header");
            return Ok(req.into_response(resp).map_into_right_body());
        }
    };

    match state.facilitator.verify(&payload, &requirements).await {
        Ok(v) if v.is_valid => {
            tracing::debug!(payer = ?v.payer, route = %key, "payment verified");
        }
        Ok(v) => {
            PAYMENT_ATTEMPTS.with_label_values(&["rejected"]).inc();
            let reason = v.invalid_reason.unwrap_or_else(|| "payment rejected".to_string());
            tracing::warn!(payer = ?v.payer, reason = %reason, route = %key, "payment rejected");
            let resp = payment_required_response(requirements, &reason);
            return Ok(req.into_response(resp).map_into_right_body());
        }
        Err(e) => {
            PAYMENT_ATTEMPTS.with_label_values(&["error"]).inc();
            tracing::error!(error = %e, "facilitator communication error");
            let resp = HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "payment processing failed"
            }));
            return Ok(req.into_response(resp).map_into_right_body());
        }
    }

    let mut res = next.call(req).await?;

    // Do not charge for failed calls.
    if res.status().is_client_error() || res.status().is_server_error() {
        PAYMENT_ATTEMPTS.with_label_values(&["unsettled"]).inc();
        return Ok(res.map_into_left_body());
    }

    let failure = match state.facilitator.settle(&payload, &requirements).await {
        Ok(s) if s.success => {
            PAYMENT_ATTEMPTS.with_label_values(&["settled"]).inc();
            tracing::info!(
                payer = ?s.payer,
                transaction = ?s.transaction,
                route = %key,
                "payment settled"
            );
            if let Ok(value) = HeaderValue::from_str(&payment_response_header(&s)) {
                let headers = res.headers_mut();
                headers.insert(HeaderName::from_static("payment-response"), value.clone());
                headers.insert(HeaderName::from_static("x-payment-response"), value);
            }
            return Ok(res.map_into_left_body());
        }
        Ok(s) => s
            .error_reason
            .unwrap_or_else(|| "settlement failed".to_string()),
        Err(e) => {
            tracing::error!(error = %e, "facilitator settlement error");
            "settlement failed".to_string()
        }
    };

    PAYMENT_ATTEMPTS.with_label_values(&["rejected"]).inc();
    tracing::warn!(reason = %failure, route = %key, "payment settlement failed");
    let (req, _) = res.into_parts();
    let resp = payment_required_response(requirements, &failure);
    Ok(ServiceResponse::new(req, resp).map_into_right_body())
}
