//! Service catalog: the declarative list of payable proxy endpoints.
//!
//! The catalog is a JSON document that is validated field by field into an
//! immutable [`AppConfig`]. Nothing is defaulted: one bad field rejects the
//! whole document and the gateway refuses to start.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Top-level segments served by the gateway itself.
const RESERVED_SEGMENTS: &[&str] = &["health", "catalog", "logs", "stats", "metrics", ".well-known"];

/// Router syntax and URL delimiters; a path must match requests literally.
const FORBIDDEN_PATH_CHARS: &[char] = &['{', '}', '*', '?', '#', '%'];

/// HTTP verbs a service (or its backend) may be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Case-insensitive parse of a verb name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether an outbound request with this verb carries a JSON body.
    pub fn accepts_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    pub fn to_actix(self) -> actix_web::http::Method {
        match self {
            Self::Get => actix_web::http::Method::GET,
            Self::Post => actix_web::http::Method::POST,
            Self::Put => actix_web::http::Method::PUT,
            Self::Patch => actix_web::http::Method::PATCH,
            Self::Delete => actix_web::http::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A currency-formatted price such as `"$0.001"`, kept verbatim together
/// with its numeric value.
#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    raw: String,
    value: f64,
}

impl Price {
    pub fn parse(raw: &str) -> Option<Self> {
        let value = price_value(raw)?;
        Some(Self {
            raw: raw.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Numeric value of a price string with the currency symbol stripped.
/// Returns `None` for anything that is not a finite, non-negative decimal.
pub fn price_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let number = trimmed.strip_prefix('$').unwrap_or(trimmed).trim();
    let value: f64 = number.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Upstream API a service forwards to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Backend {
    pub host: String,
    pub path: String,
    pub method: HttpMethod,
}

/// One exposed, payable endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    /// Route segment without the leading slash, e.g. `instagram/profile`.
    pub path: String,
    pub method: HttpMethod,
    pub price: Price,
    pub description: String,
    pub backend: Backend,
}

impl ServiceDescriptor {
    /// Route as mounted on the gateway, e.g. `/instagram/profile`.
    pub fn route(&self) -> String {
        format!("/{}", self.path)
    }

    /// Payment table key, e.g. `GET /user`.
    pub fn route_key(&self) -> String {
        format!("{} /{}", self.method, self.path)
    }
}

/// The whole service catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub pay_to: String,
    pub network: String,
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceConfigError {
    #[error("failed to read service config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse service config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config validation error: {0}")]
    Validation(String),
}

fn invalid(msg: impl Into<String>) -> ServiceConfigError {
    ServiceConfigError::Validation(msg.into())
}

/// Non-empty string field of a JSON object.
fn string_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Read and validate the service catalog at `path`.
pub fn load_app_config(path: impl AsRef<Path>) -> Result<AppConfig, ServiceConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ServiceConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    AppConfig::from_json_str(&raw)
}

impl AppConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ServiceConfigError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::try_from(value)
    }
}

impl TryFrom<Value> for AppConfig {
    type Error = ServiceConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let root = value
            .as_object()
            .ok_or_else(|| invalid("config root must be an object with 'payTo', 'network' and 'services'"))?;

        let pay_to = string_field(root, "payTo").ok_or_else(|| invalid("missing or invalid 'payTo'"))?;
        let network =
            string_field(root, "network").ok_or_else(|| invalid("missing or invalid 'network'"))?;

        let entries = root
            .get("services")
            .and_then(Value::as_array)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| invalid("'services' must be a non-empty array"))?;

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(entries.len());
        for entry in entries {
            let service = parse_service(entry)?;
            if !seen.insert(service.path.clone()) {
                return Err(invalid(format!("duplicate service 'path': {}", service.path)));
            }
            services.push(service);
        }

        Ok(Self {
            pay_to: pay_to.to_string(),
            network: network.to_string(),
            services,
        })
    }
}

fn parse_service(entry: &Value) -> Result<ServiceDescriptor, ServiceConfigError> {
    let obj = entry
        .as_object()
        .ok_or_else(|| invalid("each entry in 'services' must be an object"))?;

    let path = string_field(obj, "path")
        .map(|p| p.trim().trim_start_matches('/'))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| invalid("each service must have a 'path'"))?;

    let first_segment = path.split('/').next().unwrap_or_default();
    if path
        .chars()
        .any(|c| c.is_whitespace() || FORBIDDEN_PATH_CHARS.contains(&c))
    {
        return Err(invalid(format!(
            "service 'path' {path} may only contain literal URL segments"
        )));
    }

    if RESERVED_SEGMENTS.contains(&first_segment) {
        return Err(invalid(format!(
            "service 'path' {path} collides with a built-in route"
        )));
    }

    let method_raw =
        string_field(obj, "method").ok_or_else(|| invalid("each service must have a 'method'"))?;
    let method = HttpMethod::parse(method_raw).ok_or_else(|| {
        invalid(format!("service {path} has an unsupported 'method': {method_raw}"))
    })?;

    let price_raw =
        string_field(obj, "price").ok_or_else(|| invalid("each service must have a 'price'"))?;
    let price = Price::parse(price_raw)
        .ok_or_else(|| invalid(format!("service {path} has an invalid 'price': {price_raw}")))?;

    let description = string_field(obj, "description")
        .ok_or_else(|| invalid("each service must have a 'description'"))?;

    let backend = obj
        .get("rapidapi")
        .or_else(|| obj.get("backend"))
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("each service must have a 'rapidapi' backend config"))?;

    let (host, backend_path, backend_method) = match (
        string_field(backend, "host"),
        string_field(backend, "path"),
        string_field(backend, "method"),
    ) {
        (Some(h), Some(p), Some(m)) => (h, p, m),
        _ => return Err(invalid("'rapidapi' must have host, path, and method")),
    };
    let backend_method = HttpMethod::parse(backend_method).ok_or_else(|| {
        invalid(format!(
            "'rapidapi' method for service {path} is not supported: {backend_method}"
        ))
    })?;

    Ok(ServiceDescriptor {
        path: path.to_string(),
        method,
        price,
        description: description.to_string(),
        backend: Backend {
            host: host.trim().to_string(),
            path: backend_path.trim().to_string(),
            method: backend_method,
        },
    })
}
