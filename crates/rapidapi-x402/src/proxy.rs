use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::services::Backend;

/// Header carrying the RapidAPI credential.
pub const RAPIDAPI_KEY_HEADER: &str = "x-rapidapi-key";
/// Header naming the RapidAPI backend host.
pub const RAPIDAPI_HOST_HEADER: &str = "x-rapidapi-host";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to serialize request body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Generic inbound request as seen by the proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    pub query_params: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Upstream response payload: parsed JSON or raw text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProxyBody {
    Json(Value),
    Text(String),
}

/// Outcome of one upstream call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyResult {
    pub status: u16,
    pub data: ProxyBody,
}

/// Outbound client for RapidAPI backends. Cheap to clone; owns the credential.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    api_key: Arc<str>,
    scheme: &'static str,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("api_key", &"[REDACTED]")
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: Arc::from(api_key.into()),
            scheme: "https",
        }
    }

    /// Talk plain HTTP to backends (local mocks and sidecars).
    pub fn with_plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    /// `<scheme>://<host><path>` with `query` applied; a key that is already
    /// present is overwritten in place.
    pub fn target_url(&self, backend: &Backend, query: &[(String, String)]) -> Result<Url, ProxyError> {
        let path = if backend.path.starts_with('/') {
            backend.path.clone()
        } else {
            format!("/{}", backend.path)
        };
        let raw = format!("{}://{}{}", self.scheme, backend.host, path);
        let mut url = Url::parse(&raw).map_err(|source| ProxyError::InvalidUrl { url: raw, source })?;

        if query.is_empty() {
            return Ok(url);
        }

        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        for (key, value) in query {
            match pairs.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => pairs.push((key.clone(), value.clone())),
            }
        }
        url.query_pairs_mut().clear().extend_pairs(&pairs);
        Ok(url)
    }

    /// Build the outbound request without sending it.
    pub fn build_request(
        &self,
        backend: &Backend,
        request: &ProxyRequest,
    ) -> Result<reqwest::Request, ProxyError> {
        let url = self.target_url(backend, &request.query_params)?;

        let mut builder = self
            .http
            .request(backend.method.to_reqwest(), url)
            .header(RAPIDAPI_KEY_HEADER, self.api_key.as_ref())
            .header(RAPIDAPI_HOST_HEADER, backend.host.as_str());

        // Only body-carrying verbs forward the caller's payload.
        if let Some(body) = request.body.as_ref().filter(|_| backend.method.accepts_body()) {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        Ok(builder.build()?)
    }

    /// Issue exactly one call to `backend` and normalize the response.
    pub async fn call(&self, backend: &Backend, request: &ProxyRequest) -> Result<ProxyResult, ProxyError> {
        let outbound = self.build_request(backend, request)?;
        let response = self.http.execute(outbound).await?;

        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        let data = if is_json {
            ProxyBody::Json(response.json::<Value>().await?)
        } else {
            ProxyBody::Text(response.text().await?)
        };

        Ok(ProxyResult { status, data })
    }
}
