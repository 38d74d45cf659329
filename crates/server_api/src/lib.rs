use std::{sync::Arc, time::Duration, time::Instant};

use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde_json::Value;
use shared::{
    error::GatewayError,
    protocol::{Method, ResourceRequest},
};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

mod address;
mod resources;

pub use address::{resolve_addressing, Addressing};
pub use resources::{default_resources, ResourceConfig, ResourceRegistry};

pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Top-level error body fields checked, in order, for a backend message.
const ERROR_MESSAGE_FIELDS: [&str; 3] = ["message", "error", "detail"];

pub type GatewayResult = Result<GatewayResponse, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayConfigError {
    #[error("invalid backend base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("backend base url '{0}' cannot carry resource paths")]
    CannotBeABase(String),
    #[error("resource '{0}' needs a non-empty name and path")]
    InvalidResource(String),
    #[error("resource '{0}' is configured twice")]
    DuplicateResource(String),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub resources: Vec<ResourceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".into(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
            resources: default_resources(),
        }
    }
}

/// Successful backend reply, forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Value,
}

/// A request whose backend address has been worked out but not yet sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub method: Method,
    pub addressing: Addressing,
    pub url: Url,
}

/// Relays resource requests to the REST backend, one outbound call per
/// inbound call. Holds no per-request state.
#[derive(Clone)]
pub struct ForwardingGateway {
    http: Client,
    base_url: Url,
    resources: Arc<ResourceRegistry>,
}

impl ForwardingGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayConfigError::CannotBeABase(config.base_url));
        }
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url,
            resources: Arc::new(ResourceRegistry::new(config.resources)?),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.get(name)
    }

    pub fn resolve(&self, request: &ResourceRequest) -> Result<ResolvedTarget, GatewayError> {
        let resource = self.lookup(&request.resource)?;
        let addressing = resolve_addressing(request)?;
        let url = address::target_url(&self.base_url, resource, &addressing)?;
        Ok(ResolvedTarget {
            method: request.method,
            addressing,
            url,
        })
    }

    /// Forwards `request` with the caller's `Authorization` header (sent as
    /// an empty value when absent) and normalizes the outcome.
    pub async fn forward(
        &self,
        request: ResourceRequest,
        authorization: Option<&str>,
    ) -> GatewayResult {
        let resource = self.lookup(&request.resource)?;
        let target = self.resolve(&request)?;
        let started = Instant::now();

        let mut outbound = self
            .http
            .request(reqwest_method(target.method), target.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, authorization.unwrap_or_default());
        if let Some(body) = &request.body {
            outbound = outbound.json(body);
        }

        let response = outbound.send().await.map_err(|error| {
            error!(
                method = %target.method,
                url = %target.url,
                %error,
                "gateway: backend unreachable"
            );
            GatewayError::Internal
        })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.bytes().await.unwrap_or_default();
            let message = extract_error_message(&raw).unwrap_or_else(|| {
                format!("Failed to {} {}", target.method.verb(), resource.label())
            });
            warn!(
                method = %target.method,
                url = %target.url,
                status = status.as_u16(),
                %message,
                "gateway: backend rejected request"
            );
            return Err(GatewayError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let raw = response.bytes().await.map_err(|error| {
            error!(url = %target.url, %error, "gateway: failed to read backend body");
            GatewayError::Internal
        })?;
        let body = if raw.is_empty() && target.method == Method::Delete {
            Value::Null
        } else {
            serde_json::from_slice(&raw).map_err(|error| {
                error!(url = %target.url, %error, "gateway: backend body is not JSON");
                GatewayError::Internal
            })?
        };

        let status = success_status(target.method);
        info!(
            method = %target.method,
            url = %target.url,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gateway: forwarded"
        );
        Ok(GatewayResponse { status, body })
    }

    fn lookup(&self, name: &str) -> Result<&ResourceConfig, GatewayError> {
        self.resources
            .get(name)
            .ok_or_else(|| GatewayError::UnknownResource {
                resource: name.to_string(),
            })
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn success_status(method: Method) -> u16 {
    match method {
        Method::Post => 201,
        _ => 200,
    }
}

/// Best-effort message extraction from a backend error body. Backends
/// disagree on the field name, so the first string among
/// `ERROR_MESSAGE_FIELDS` wins.
pub fn extract_error_message(raw: &[u8]) -> Option<String> {
    let Value::Object(fields) = serde_json::from_slice::<Value>(raw).ok()? else {
        return None;
    };
    ERROR_MESSAGE_FIELDS.iter().find_map(|name| match fields.get(*name) {
        Some(Value::String(message)) if !message.is_empty() => Some(message.clone()),
        _ => None,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
