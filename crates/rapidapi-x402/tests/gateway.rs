use actix_web::middleware::from_fn;
use actix_web::{test, web, App};
use base64::Engine;
use futures::future::BoxFuture;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rapidapi_x402::config::GatewayConfig;
use rapidapi_x402::ledger::UsageLedger;
use rapidapi_x402::middleware::payment_gate;
use rapidapi_x402::payment::{
    PaymentError, PaymentFacilitator, PaymentRequirements, SettleResponse, VerifyResponse,
};
use rapidapi_x402::proxy::UpstreamClient;
use rapidapi_x402::routes::{self, services::build_request_handlers, services::RequestHandlers};
use rapidapi_x402::services::AppConfig;
use rapidapi_x402::state::AppState;

/// Facilitator double that records how often it was asked to settle.
#[derive(Default)]
struct StubFacilitator {
    reject: bool,
    fail_settle: bool,
    verified: AtomicUsize,
    settled: AtomicUsize,
}

impl PaymentFacilitator for StubFacilitator {
    fn verify<'a>(
        &'a self,
        _payload: &'a Value,
        _requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<VerifyResponse, PaymentError>> {
        self.verified.fetch_add(1, Ordering::SeqCst);
        let response = VerifyResponse {
            is_valid: !self.reject,
            invalid_reason: self.reject.then(|| "insufficient funds".to_string()),
            payer: Some("0xpayer".to_string()),
        };
        Box::pin(async move { Ok(response) })
    }

    fn settle<'a>(
        &'a self,
        _payload: &'a Value,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettleResponse, PaymentError>> {
        self.settled.fetch_add(1, Ordering::SeqCst);
        let response = SettleResponse {
            success: !self.fail_settle,
            error_reason: self.fail_settle.then(|| "nonce already used".to_string()),
            payer: Some("0xpayer".to_string()),
            transaction: Some("0xtx".to_string()),
            network: requirements.network.clone(),
        };
        Box::pin(async move { Ok(response) })
    }
}

fn gateway_config(bypass: bool, metrics_token: Option<&'static str>) -> GatewayConfig {
    GatewayConfig::from_vars(move |key: &str| match key {
        "RAPIDAPI_KEY" => Some("test-key".to_string()),
        "PUBLIC_BASE_URL" => Some("https://gw.test".to_string()),
        "PAYMENT_BYPASS" if bypass => Some("true".to_string()),
        "METRICS_TOKEN" => metrics_token.map(str::to_string),
        _ => None,
    })
    .unwrap()
}

fn catalog(host: &str) -> AppConfig {
    AppConfig::try_from(json!({
        "payTo": "0xpayee",
        "network": "base-sepolia",
        "services": [
            {
                "path": "user",
                "method": "GET",
                "price": "$0.001",
                "description": "Twitter user lookup",
                "rapidapi": { "host": host, "path": "/user", "method": "GET" }
            },
            {
                "path": "instagram/posts",
                "method": "POST",
                "price": "$0.002",
                "description": "Instagram posts",
                "rapidapi": { "host": host, "path": "/api/instagram/posts", "method": "POST" }
            }
        ]
    }))
    .unwrap()
}

struct Harness {
    state: web::Data<AppState>,
    handlers: RequestHandlers,
    ledger: Arc<UsageLedger>,
    facilitator: Arc<StubFacilitator>,
}

fn harness(host: &str, bypass: bool, facilitator: StubFacilitator) -> Harness {
    harness_with(host, gateway_config(bypass, None), facilitator)
}

fn harness_with(host: &str, config: GatewayConfig, facilitator: StubFacilitator) -> Harness {
    let catalog = Arc::new(catalog(host));
    let ledger = Arc::new(UsageLedger::new());
    let facilitator = Arc::new(facilitator);
    let upstream = UpstreamClient::new(reqwest::Client::new(), "test-key").with_plain_http();
    let handlers = build_request_handlers(&catalog, upstream, Arc::clone(&ledger));
    let state = web::Data::new(AppState::new(
        config,
        catalog,
        Arc::clone(&ledger),
        facilitator.clone(),
    ));
    Harness {
        state,
        handlers,
        ledger,
        facilitator,
    }
}

macro_rules! gateway_app {
    ($h:expr) => {{
        let handlers = $h.handlers.clone();
        test::init_service(
            App::new()
                .app_data($h.state.clone())
                .wrap(from_fn(payment_gate))
                .configure(routes::health::configure)
                .configure(routes::catalog::configure)
                .configure(routes::usage::configure)
                .configure(routes::discovery::configure)
                .configure(move |cfg| handlers.configure(cfg)),
        )
        .await
    }};
}

fn payment_header() -> String {
    base64::engine::general_purpose::STANDARD
        .encode(json!({"x402Version": 1, "scheme": "exact", "payload": {}}).to_string())
}

#[actix_rt::test]
async fn test_health_and_catalog() {
    let h = harness("127.0.0.1:1", false, StubFacilitator::default());
    let app = gateway_app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "rapidapi-x402");
    assert!(body.get("testMode").is_none());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/catalog").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body,
        json!([
            {"path": "/user", "method": "GET", "price": "$0.001", "description": "Twitter user lookup"},
            {"path": "/instagram/posts", "method": "POST", "price": "$0.002", "description": "Instagram posts"}
        ])
    );
}

#[actix_rt::test]
async fn test_bypass_reports_test_mode_and_skips_payment() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let h = harness(&server.address().to_string(), true, StubFacilitator::default());
    let app = gateway_app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["testMode"], true);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/user").to_request()).await;
    assert_eq!(resp.status(), 200);
    mock.assert_calls_async(1).await;
    assert_eq!(h.facilitator.verified.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn test_missing_payment_returns_402() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200);
        })
        .await;

    let h = harness(&server.address().to_string(), false, StubFacilitator::default());
    let app = gateway_app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/user").to_request()).await;
    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["x402Version"], 1);
    let accepts = &body["accepts"][0];
    assert_eq!(accepts["scheme"], "exact");
    assert_eq!(accepts["maxAmountRequired"], "1000");
    assert_eq!(accepts["resource"], "https://gw.test/user");
    assert_eq!(accepts["payTo"], "0xpayee");

    mock.assert_calls_async(0).await;
    assert!(h.ledger.is_empty());
}

#[actix_rt::test]
async fn test_percent_encoded_path_still_requires_payment() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let h = harness(&server.address().to_string(), false, StubFacilitator::default());
    let app = gateway_app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/us%65r").to_request()).await;
    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["accepts"][0]["resource"], "https://gw.test/user");

    mock.assert_calls_async(0).await;
    assert_eq!(h.facilitator.verified.load(Ordering::SeqCst), 0);
    assert!(h.ledger.is_empty());

    let req = test::TestRequest::get()
        .uri("/us%65r")
        .insert_header(("X-PAYMENT", payment_header()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    mock.assert_calls_async(1).await;
    assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 1);
}

#[actix_rt::test]
async fn test_undecodable_payment_header_returns_402() {
    let h = harness("127.0.0.1:1", false, StubFacilitator::default());
    let app = gateway_app!(h);

    let req = test::TestRequest::get()
        .uri("/user")
        .insert_header(("X-PAYMENT", "%%%not-base64"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    assert_eq!(h.facilitator.verified.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn test_rejected_payment_returns_reason() {
    let h = harness(
        "127.0.0.1:1",
        false,
        StubFacilitator {
            reject: true,
            ..Default::default()
        },
    );
    let app = gateway_app!(h);

    let req = test::TestRequest::get()
        .uri("/user")
        .insert_header(("PAYMENT-SIGNATURE", payment_header()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "insufficient funds");
    assert!(h.ledger.is_empty());
}

#[actix_rt::test]
async fn test_paid_request_is_proxied_and_settled() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/user")
                .query_param("username", "jack")
                .header("x-rapidapi-key", "test-key")
                .header("x-rapidapi-host", server.address().to_string());
            then.status(200).json_body(json!({"id": 12, "name": "jack"}));
        })
        .await;

    let h = harness(&server.address().to_string(), false, StubFacilitator::default());
    let app = gateway_app!(h);

    let req = test::TestRequest::get()
        .uri("/user?username=jack&tags[]=a")
        .insert_header(("X-PAYMENT", payment_header()))
        .insert_header(("User-Agent", "agent/1.0"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("payment-response"));
    assert!(resp.headers().contains_key("x-payment-response"));
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"id": 12, "name": "jack"}));

    mock.assert_calls_async(1).await;
    assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 1);

    let entries = h.ledger.recent(10);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].method, "GET");
    assert_eq!(entries[0].path, "/user");
    assert_eq!(entries[0].status_code, 200);
    assert_eq!(entries[0].price, "$0.001");
    assert_eq!(entries[0].caller_agent.as_deref(), Some("agent/1.0"));
}

#[actix_rt::test]
async fn test_post_body_is_forwarded() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/instagram/posts")
                .header("content-type", "application/json")
                .json_body(json!({"username": "nasa"}));
            then.status(200).json_body(json!({"posts": []}));
        })
        .await;

    let h = harness(&server.address().to_string(), true, StubFacilitator::default());
    let app = gateway_app!(h);

    let req = test::TestRequest::post()
        .uri("/instagram/posts")
        .set_json(json!({"username": "nasa"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    mock.assert_calls_async(1).await;
}

#[actix_rt::test]
async fn test_malformed_json_body_is_rejected_before_proxying() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/instagram/posts");
            then.status(200);
        })
        .await;

    let h = harness(&server.address().to_string(), false, StubFacilitator::default());
    let app = gateway_app!(h);

    let req = test::TestRequest::post()
        .uri("/instagram/posts")
        .insert_header(("X-PAYMENT", payment_header()))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    mock.assert_calls_async(0).await;
    assert!(h.ledger.is_empty());
    assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn test_upstream_error_status_is_not_settled() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(500)
                .header("content-type", "text/plain")
                .body("backend exploded");
        })
        .await;

    let h = harness(&server.address().to_string(), false, StubFacilitator::default());
    let app = gateway_app!(h);

    let req = test::TestRequest::get()
        .uri("/user")
        .insert_header(("X-PAYMENT", payment_header()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
    assert!(!resp.headers().contains_key("payment-response"));
    let body = test::read_body(resp).await;
    assert_eq!(body, "backend exploded");

    assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.recent(1)[0].status_code, 500);
}

#[actix_rt::test]
async fn test_failed_settlement_returns_402() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let h = harness(
        &server.address().to_string(),
        false,
        StubFacilitator {
            fail_settle: true,
            ..Default::default()
        },
    );
    let app = gateway_app!(h);

    let req = test::TestRequest::get()
        .uri("/user")
        .insert_header(("X-PAYMENT", payment_header()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "nonce already used");
}

#[actix_rt::test]
async fn test_unreachable_backend_is_masked_and_recorded() {
    let h = harness("127.0.0.1:1", false, StubFacilitator::default());
    let app = gateway_app!(h);

    let req = test::TestRequest::get()
        .uri("/user")
        .insert_header(("X-PAYMENT", payment_header()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"error": "Service temporarily unavailable"}));

    assert_eq!(h.facilitator.settled.load(Ordering::SeqCst), 0);
    let entries = h.ledger.recent(10);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status_code, 502);
}

#[actix_rt::test]
async fn test_logs_stats_and_clear() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let h = harness(&server.address().to_string(), true, StubFacilitator::default());
    let app = gateway_app!(h);

    for _ in 0..3 {
        let resp = test::call_service(&app, test::TestRequest::get().uri("/user").to_request()).await;
        assert_eq!(resp.status(), 200);
    }

    let resp = test::call_service(&app, test::TestRequest::get().uri("/logs?limit=2").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body.as_array().map(Vec::len), Some(2));
    assert_eq!(body[0]["path"], "/user");
    assert_eq!(body[0]["statusCode"], 200);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/logs?limit=abc").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    let resp = test::call_service(&app, test::TestRequest::get().uri("/stats").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["totalRequests"], 3);
    assert_eq!(body["totalCost"], "0.0030");
    assert_eq!(body["byEndpoint"][0]["endpoint"], "GET /user");
    assert_eq!(body["byEndpoint"][0]["count"], 3);
    assert_eq!(body["byHost"][0]["host"], server.address().to_string());

    let resp = test::call_service(&app, test::TestRequest::delete().uri("/logs").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "cleared");
    assert!(h.ledger.is_empty());
}

#[actix_rt::test]
async fn test_discovery_manifest() {
    let h = harness("127.0.0.1:1", false, StubFacilitator::default());
    let app = gateway_app!(h);

    let req = test::TestRequest::get()
        .uri("/.well-known/x402?limit=500&offset=1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["pagination"], json!({"total": 2, "offset": 1, "limit": 100}));
    assert_eq!(body["resources"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["resources"][0]["resource"], "https://gw.test/instagram/posts");
    assert_eq!(body["resources"][0]["accepts"][0]["maxAmountRequired"], "2");
    assert_eq!(body["resources"][0]["accepts"][0]["network"], "base");
}

#[actix_rt::test]
async fn test_metrics_requires_token_when_configured() {
    let h = harness_with(
        "127.0.0.1:1",
        gateway_config(false, Some("s3cret")),
        StubFacilitator::default(),
    );
    let app = gateway_app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer s3cret"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}
