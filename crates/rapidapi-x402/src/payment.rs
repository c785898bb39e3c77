//! x402 payment types and the facilitator seam.
//!
//! The gateway never verifies payment proofs itself. It hands the opaque
//! payment payload and the route's requirements to a [`PaymentFacilitator`];
//! [`FacilitatorClient`] is the HTTP implementation used in production.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::price_value;

/// x402 protocol version spoken by the gateway.
pub const X402_VERSION: u32 = 1;

/// Only the `exact` scheme is offered.
pub const SCHEME_EXACT: &str = "exact";

/// Decimal places of the USDC settlement token.
pub const TOKEN_DECIMALS: u32 = 6;

/// Settlement window advertised to payers.
pub const MAX_TIMEOUT_SECONDS: u64 = 60;

/// USDC on Base mainnet.
pub const USDC_BASE: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

/// USDC on Base Sepolia.
pub const USDC_BASE_SEPOLIA: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

/// USDC contract for a network label or CAIP-2 id. Unknown networks fall
/// back to Base mainnet.
pub fn asset_for_network(network: &str) -> &'static str {
    match network {
        "base-sepolia" | "eip155:84532" => USDC_BASE_SEPOLIA,
        _ => USDC_BASE,
    }
}

/// Payment terms of one gated route, as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: String,
    pub price: String,
    pub network: String,
    pub pay_to: String,
    pub description: String,
}

/// Payment table handed to the gate, keyed by `"<METHOD> /<path>"`.
pub type PaymentRoutes = std::collections::BTreeMap<String, PaymentRequirement>;

/// Wire form of the requirements sent in 402 bodies and to the facilitator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl PaymentRequirements {
    /// Expand a configured requirement for the resource at `resource`.
    pub fn for_route(requirement: &PaymentRequirement, resource: &str) -> Self {
        Self {
            scheme: requirement.scheme.clone(),
            network: requirement.network.clone(),
            max_amount_required: price_to_token_units(&requirement.price),
            resource: resource.to_string(),
            description: requirement.description.clone(),
            mime_type: "application/json".to_string(),
            pay_to: requirement.pay_to.clone(),
            max_timeout_seconds: MAX_TIMEOUT_SECONDS,
            asset: asset_for_network(&requirement.network).to_string(),
            extra: Some(serde_json::json!({ "name": "USDC", "version": "2" })),
        }
    }
}

/// `"$0.001"` → `"1000"` in 6-decimal token units. Unparseable prices map to 0.
pub fn price_to_token_units(price: &str) -> String {
    let value = price_value(price).unwrap_or(0.0);
    let units = (value * 10f64.powi(TOKEN_DECIMALS as i32)).round();
    format!("{}", units as u64)
}

/// Body of a 402 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub x402_version: u32,
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
}

/// Facilitator answer to `/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Facilitator answer to `/settle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default)]
    pub network: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("facilitator request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("facilitator returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid facilitator response: {0}")]
    InvalidResponse(String),
}

/// Verifies and settles payment payloads on the gateway's behalf.
///
/// The payload is passed through untouched; its structure belongs to the
/// payment scheme, not to the gateway.
pub trait PaymentFacilitator: Send + Sync {
    fn verify<'a>(
        &'a self,
        payload: &'a Value,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<VerifyResponse, PaymentError>>;

    fn settle<'a>(
        &'a self,
        payload: &'a Value,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettleResponse, PaymentError>>;
}

/// Remote facilitator reached over HTTP (`/verify`, `/settle`).
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl FacilitatorClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<T, PaymentError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let body = serde_json::json!({
            "x402Version": X402_VERSION,
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| PaymentError::InvalidResponse(e.to_string()))
    }
}

impl PaymentFacilitator for FacilitatorClient {
    fn verify<'a>(
        &'a self,
        payload: &'a Value,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<VerifyResponse, PaymentError>> {
        Box::pin(self.post("verify", payload, requirements))
    }

    fn settle<'a>(
        &'a self,
        payload: &'a Value,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettleResponse, PaymentError>> {
        Box::pin(self.post("settle", payload, requirements))
    }
}
