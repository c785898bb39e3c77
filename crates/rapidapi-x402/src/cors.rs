//! CORS policy. Browsers need to send the payment headers and read the
//! settlement receipt back.

use actix_cors::Cors;
use actix_web::http::header::{self, HeaderName};

const REQUEST_HEADERS: [&str; 2] = ["x-payment", "payment-signature"];
const RESPONSE_HEADERS: [&str; 2] = ["x-payment-response", "payment-response"];

/// Whether `origin` matches one of `allowed`; `*` matches everything.
pub fn origin_allowed(allowed: &[String], origin: &str) -> bool {
    allowed.iter().any(|a| a == "*" || a == origin)
}

pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    let mut request_headers = vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE];
    request_headers.extend(REQUEST_HEADERS.into_iter().map(HeaderName::from_static));

    Cors::default()
        .allowed_origin_fn(move |origin, _| {
            origin
                .to_str()
                .map(|o| origin_allowed(&allowed, o))
                .unwrap_or(false)
        })
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(request_headers)
        .expose_headers(RESPONSE_HEADERS.into_iter().map(HeaderName::from_static))
        .max_age(3600)
}
