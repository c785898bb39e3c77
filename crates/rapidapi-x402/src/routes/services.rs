//! Per-service proxy routes and the payment table derived from the catalog.

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::GatewayError;
use crate::ledger::{UsageLedger, UsageLogEntry};
use crate::metrics::{PROXY_LATENCY, PROXY_REQUESTS_TOTAL};
use crate::payment::{PaymentRequirement, PaymentRoutes, SCHEME_EXACT};
use crate::proxy::{ProxyBody, ProxyRequest, UpstreamClient};
use crate::services::{AppConfig, ServiceDescriptor};

/// Payment table keyed by `"<METHOD> /<path>"`, one entry per service.
pub fn build_payment_requirements(config: &AppConfig) -> PaymentRoutes {
    config
        .services
        .iter()
        .map(|service| {
            (
                service.route_key(),
                PaymentRequirement {
                    scheme: SCHEME_EXACT.to_string(),
                    price: service.price.as_str().to_string(),
                    network: config.network.clone(),
                    pay_to: config.pay_to.clone(),
                    description: service.description.clone(),
                },
            )
        })
        .collect()
}

/// Keep only plain `key=value` query parameters. Bracketed keys (`a[]`,
/// `a[b]`) and keys given more than once are dropped.
pub fn string_query_params(query: &str) -> Vec<(String, String)> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (key, _) in &pairs {
        *counts.entry(key.as_str()).or_default() += 1;
    }

    pairs
        .iter()
        .filter(|(key, _)| !key.contains('[') && counts.get(key.as_str()) == Some(&1))
        .cloned()
        .collect()
}

/// Inbound JSON body, if one was sent. A body declared as JSON that does not
/// parse is an error.
pub fn json_body(req: &HttpRequest, body: &[u8]) -> Result<Option<Value>, GatewayError> {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);

    if !is_json || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| GatewayError::InvalidBody(format!("malformed JSON body: {e}")))
}

struct ServiceHandler {
    service: ServiceDescriptor,
    upstream: UpstreamClient,
    ledger: Arc<UsageLedger>,
}

impl ServiceHandler {
    async fn handle(&self, req: HttpRequest, body: web::Bytes) -> Result<HttpResponse, GatewayError> {
        let start = Instant::now();
        let request = ProxyRequest {
            query_params: string_query_params(req.query_string()),
            body: json_body(&req, &body)?,
        };
        let caller_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let route = self.service.route();
        let outcome = self.upstream.call(&self.service.backend, &request).await;
        let elapsed = start.elapsed();
        PROXY_LATENCY.observe(elapsed.as_secs_f64());

        let status_code = match &outcome {
            Ok(result) => result.status,
            Err(_) => StatusCode::BAD_GATEWAY.as_u16(),
        };
        let status_label = status_code.to_string();
        PROXY_REQUESTS_TOTAL
            .with_label_values(&[route.as_str(), status_label.as_str()])
            .inc();

        self.ledger.record(UsageLogEntry {
            timestamp: chrono::Utc::now(),
            method: self.service.method.as_str().to_string(),
            path: route,
            backend_host: self.service.backend.host.clone(),
            backend_path: self.service.backend.path.clone(),
            price: self.service.price.as_str().to_string(),
            status_code,
            duration_ms: elapsed.as_millis() as u64,
            caller_agent,
        });

        let result = outcome?;
        let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::BAD_GATEWAY);
        Ok(match result.data {
            ProxyBody::Json(value) => HttpResponseBuilder::new(status).json(value),
            ProxyBody::Text(text) => HttpResponseBuilder::new(status)
                .content_type("text/plain; charset=utf-8")
                .body(text),
        })
    }
}

/// Routing table with one proxy handler per catalog service.
#[derive(Clone)]
pub struct RequestHandlers {
    handlers: Vec<Arc<ServiceHandler>>,
}

impl RequestHandlers {
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Mount every service at `/<path>` for its method.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        for handler in &self.handlers {
            let route = handler.service.route();
            let method = handler.service.method.to_actix();
            let handler = Arc::clone(handler);
            cfg.route(
                &route,
                web::method(method).to(move |req: HttpRequest, body: web::Bytes| {
                    let handler = Arc::clone(&handler);
                    async move { handler.handle(req, body).await }
                }),
            );
        }
    }
}

pub fn build_request_handlers(
    config: &AppConfig,
    upstream: UpstreamClient,
    ledger: Arc<UsageLedger>,
) -> RequestHandlers {
    let handlers = config
        .services
        .iter()
        .map(|service| {
            Arc::new(ServiceHandler {
                service: service.clone(),
                upstream: upstream.clone(),
                ledger: Arc::clone(&ledger),
            })
        })
        .collect();
    RequestHandlers { handlers }
}
