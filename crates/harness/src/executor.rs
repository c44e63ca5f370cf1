//! HTTP request executor
//!
//! Issues one request per call, times it from send until the full body has
//! arrived, and records the built-in HTTP metrics. Transport failures never
//! reach the caller as errors: they come back as a [`RequestResult`] with
//! status 0 so the virtual user keeps running and the failure is counted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::{builtin, MetricError, MetricKind, MetricRegistry, Tags};

/// Status reported for requests that never produced a response
pub const STATUS_NETWORK_ERROR: u16 = 0;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NetworkError {
    /// No response within the request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// TCP connect failed or was refused
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Host name could not be resolved
    #[error("dns lookup failed: {0}")]
    Dns(String),

    /// The request could not be built (bad URL, bad header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// One request to issue
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Tags attached to every sample this request produces
    pub tags: Tags,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Value of the `Host` header, if one was set explicitly
    pub fn host_header(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("host"))
            .map(|(_, value)| value.as_str())
    }
}

/// What a transport hands back for a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Outcome of one request, immutable once produced
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    /// HTTP status, or [`STATUS_NETWORK_ERROR`] when no response arrived
    pub status: u16,
    /// Absent when the transport failed
    pub body: Option<String>,
    pub duration: Duration,
    pub tags: Tags,
    pub error: Option<NetworkError>,
}

impl RequestResult {
    /// Synthetic result for a request that failed in transport
    pub fn network_failure(error: NetworkError, duration: Duration, tags: Tags) -> Self {
        Self {
            status: STATUS_NETWORK_ERROR,
            body: None,
            duration,
            tags,
            error: Some(error),
        }
    }

    pub fn is_network_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Default expected-status rule: 200–399 succeed, everything else fails
    pub fn is_failed(&self) -> bool {
        !(200..400).contains(&self.status)
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, String::len)
    }
}

/// Seam between the executor and the network
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the exchange, including reading the whole body
    async fn send(&self, request: &RequestSpec) -> Result<RawResponse, NetworkError>;
}

/// [`Transport`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with connection reuse, no redirects and the given timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NetworkError::Other(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestSpec) -> Result<RawResponse, NetworkError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify_reqwest_error)?;

        Ok(RawResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> NetworkError {
    if error.is_timeout() {
        // reqwest does not report which limit fired; the executor's own
        // timeout carries the configured value
        return NetworkError::Timeout(Duration::ZERO);
    }
    if error.is_builder() {
        return NetworkError::InvalidRequest(error.to_string());
    }

    let chain = error_chain(&error);
    if chain.contains("dns error") || chain.contains("failed to lookup address") {
        NetworkError::Dns(chain)
    } else if error.is_connect() {
        NetworkError::ConnectionRefused(chain)
    } else {
        NetworkError::Other(chain)
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(err) = source {
        parts.push(err.to_string());
        source = err.source();
    }
    parts.join(": ")
}

/// Issues requests and records the HTTP built-in metrics
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    registry: Arc<MetricRegistry>,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<MetricRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Perform one request and record its metrics
    ///
    /// Only metric integrity errors are returned; network failures are part
    /// of the returned [`RequestResult`].
    pub async fn execute(&self, request: RequestSpec) -> Result<RequestResult, MetricError> {
        let mut tags = request.tags.clone();
        tags.insert("method".to_string(), request.method.as_str().to_string());
        tags.insert("url".to_string(), request.url.clone());
        if let Some(host) = request.host_header() {
            tags.insert("host".to_string(), host.to_string());
        } else if let Ok(url) = url::Url::parse(&request.url) {
            if let Some(host) = url.host_str() {
                tags.insert("host".to_string(), host.to_string());
            }
        }

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.transport.send(&request)).await;
        let duration = start.elapsed();

        let mut result = match outcome {
            Ok(Ok(raw)) => RequestResult {
                status: raw.status,
                body: Some(raw.body),
                duration,
                tags,
                error: None,
            },
            Ok(Err(NetworkError::Timeout(_))) | Err(_) => {
                RequestResult::network_failure(NetworkError::Timeout(self.timeout), duration, tags)
            }
            Ok(Err(error)) => RequestResult::network_failure(error, duration, tags),
        };
        debug!(url = %request.url, status = result.status, ?duration, "Request completed");
        result
            .tags
            .insert("status".to_string(), result.status.to_string());

        self.record(&result)?;

        if let Some(error) = &result.error {
            warn!(url = %request.url, error = %error, "Request failed in transport");
        }

        Ok(result)
    }

    fn record(&self, result: &RequestResult) -> Result<(), MetricError> {
        let registry = &self.registry;
        let tags = &result.tags;

        registry.record_tagged(builtin::HTTP_REQS, MetricKind::Counter, 1.0, tags)?;
        registry.record_tagged(
            builtin::HTTP_REQ_DURATION,
            MetricKind::Trend,
            result.duration,
            tags,
        )?;
        registry.record_tagged(
            builtin::HTTP_REQ_FAILED,
            MetricKind::Rate,
            result.is_failed(),
            tags,
        )?;
        registry.record_tagged(
            builtin::DATA_RECEIVED,
            MetricKind::Counter,
            result.body_len() as f64,
            tags,
        )?;

        Ok(())
    }
}
