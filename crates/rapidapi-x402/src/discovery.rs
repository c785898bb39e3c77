//! Discovery manifest for x402-aware service registries.
//!
//! A pure transformation of the catalog into a paginated list of payable
//! resources. Amounts use a fixed conversion: the dollar price times 1000.

use serde::Serialize;
use serde_json::{json, Value};

use crate::payment::{MAX_TIMEOUT_SECONDS, SCHEME_EXACT, USDC_BASE, X402_VERSION};
use crate::services::{AppConfig, ServiceDescriptor};

/// Where the manifest is served.
pub const DISCOVERY_PATH: &str = "/.well-known/x402";

/// Network label advertised in every payment option.
pub const DISCOVERY_NETWORK: &str = "base";

/// Settlement asset advertised in every payment option.
pub const DISCOVERY_ASSET: &str = USDC_BASE;

pub const MAX_PAGE_SIZE: usize = 100;

const AMOUNT_FACTOR: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOption {
    pub scheme: &'static str,
    pub network: &'static str,
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub mime_type: &'static str,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: &'static str,
    pub output_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResource {
    pub resource: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub x402_version: u32,
    pub description: String,
    pub accepts: Vec<PaymentOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPage {
    pub x402_version: u32,
    pub resources: Vec<DiscoveryResource>,
    pub pagination: Pagination,
}

/// `round(price * 1000)` as a decimal string.
pub fn discovery_amount(service: &ServiceDescriptor) -> String {
    format!("{}", (service.price.value() * AMOUNT_FACTOR).round() as u64)
}

fn describe(service: &ServiceDescriptor, config: &AppConfig, base_url: &str) -> DiscoveryResource {
    let resource = format!("{}/{}", base_url.trim_end_matches('/'), service.path);
    DiscoveryResource {
        resource: resource.clone(),
        kind: "http",
        x402_version: X402_VERSION,
        description: service.description.clone(),
        accepts: vec![PaymentOption {
            scheme: SCHEME_EXACT,
            network: DISCOVERY_NETWORK,
            max_amount_required: discovery_amount(service),
            resource,
            description: service.description.clone(),
            mime_type: "application/json",
            pay_to: config.pay_to.clone(),
            max_timeout_seconds: MAX_TIMEOUT_SECONDS,
            asset: DISCOVERY_ASSET,
            output_schema: json!({
                "input": { "type": "http", "method": service.method.as_str() },
                "output": { "type": "json" },
            }),
        }],
    }
}

/// One page of the manifest. `limit` defaults to and is capped at
/// [`MAX_PAGE_SIZE`] (0 counts as absent); `offset` defaults to 0.
pub fn build_discovery_page(
    config: &AppConfig,
    base_url: &str,
    limit: Option<usize>,
    offset: Option<usize>,
) -> DiscoveryPage {
    let limit = limit
        .filter(|l| *l > 0)
        .unwrap_or(MAX_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0);

    let resources = config
        .services
        .iter()
        .skip(offset)
        .take(limit)
        .map(|service| describe(service, config, base_url))
        .collect();

    DiscoveryPage {
        x402_version: X402_VERSION,
        resources,
        pagination: Pagination {
            total: config.services.len(),
            offset,
            limit,
        },
    }
}
