use std::env;
use url::Url;

const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";
const DEFAULT_PORT: u16 = 4000;
const DEFAULT_SERVICES_PATH: &str = "./services.json";

/// Process-level settings. The service catalog itself lives in a separate
/// JSON document (see [`crate::services`]).
#[derive(Clone)]
pub struct GatewayConfig {
    /// RapidAPI credential sent upstream as `x-rapidapi-key`
    pub rapidapi_key: String,
    /// Facilitator URL for payment verification and settlement
    pub facilitator_url: String,
    /// Server port
    pub port: u16,
    /// Path of the service catalog JSON document
    pub services_path: String,
    /// Skip payment verification entirely (test deployments only)
    pub payment_bypass: bool,
    /// Externally visible base URL used for resource URLs
    pub public_base_url: String,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
    /// Call backends over plain HTTP instead of HTTPS
    pub upstream_plain_http: bool,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("rapidapi_key", &"[REDACTED]")
            .field("facilitator_url", &self.facilitator_url)
            .field("port", &self.port)
            .field("services_path", &self.services_path)
            .field("payment_bypass", &self.payment_bypass)
            .field("public_base_url", &self.public_base_url)
            .field("allowed_origins", &self.allowed_origins)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("upstream_plain_http", &self.upstream_plain_http)
            .finish()
    }
}

fn flag(value: Option<String>) -> bool {
    value.map(|v| v == "true" || v == "1").unwrap_or(false)
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Required: upstream credential
        let rapidapi_key = var("RAPIDAPI_KEY").ok_or(ConfigError::MissingRequired("RAPIDAPI_KEY"))?;

        let facilitator_url =
            var("FACILITATOR_URL").unwrap_or_else(|| DEFAULT_FACILITATOR_URL.to_string());
        Url::parse(&facilitator_url)
            .map_err(|_| ConfigError::InvalidUrl(facilitator_url.clone()))?;

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let services_path =
            var("SERVICES_CONFIG").unwrap_or_else(|| DEFAULT_SERVICES_PATH.to_string());

        let payment_bypass = flag(var("PAYMENT_BYPASS"));

        let public_base_url = var("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();
        Url::parse(&public_base_url)
            .map_err(|_| ConfigError::InvalidUrl(public_base_url.clone()))?;

        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let metrics_token = var("METRICS_TOKEN");
        let upstream_plain_http = flag(var("UPSTREAM_INSECURE_HTTP"));

        if payment_bypass {
            tracing::warn!(
                "PAYMENT_BYPASS=true: paid endpoints are served WITHOUT payment. \
                 DO NOT use this in production!"
            );
        }

        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            rapidapi_key,
            facilitator_url,
            port,
            services_path,
            payment_bypass,
            public_base_url,
            allowed_origins,
            metrics_token,
            upstream_plain_http,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),
}
