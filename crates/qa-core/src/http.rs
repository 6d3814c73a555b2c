//! HTTP client shared by the prober, the workflow executor and the load
//! engine.
//!
//! Every request carries the correlation header and, unless told
//! otherwise, the configured API key. Requests are bounded by the
//! configured timeout; no component retries through this client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::Method;
use serde_json::Value;

use crate::config::HttpConfig;
use crate::error::{QaError, QaResult};
use crate::ids::{CorrelationId, CORRELATION_HEADER};

/// How the API key header is set on a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ApiKey {
    /// Use the configured key.
    #[default]
    Configured,
    /// Send no key at all.
    Omit,
    /// Send this key instead of the configured one.
    Override(String),
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub correlation_id: CorrelationId,
    pub api_key: ApiKey,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            correlation_id,
            api_key: ApiKey::Configured,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: ApiKey) -> Self {
        self.api_key = api_key;
        self
    }
}

/// Response as seen by the pipeline: status, decoded body and latency.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// JSON body, or the raw text as a JSON string when the body is not JSON
    pub body: Value,
    pub latency: Duration,
}

impl ApiResponse {
    /// Look a value up by JSON pointer (`/items/0/id`).
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.body.pointer(pointer)
    }

    /// Short description of the response for diagnostics.
    pub fn summary(&self) -> String {
        let mut body = self.body.to_string();
        if body.len() > 200 {
            let mut cut = 200;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("...");
        }
        format!("status={} body={}", self.status, body)
    }
}

/// Carries an [`ApiRequest`] to its target. Implemented by
/// [`ServiceClient`]; tests substitute in-process fakes.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> QaResult<ApiResponse>;
}

/// Thin wrapper over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    api_key_header: HeaderName,
    api_key: String,
    timeout: Duration,
}

impl ServiceClient {
    /// Build a client from the HTTP section of the configuration.
    pub fn new(config: &HttpConfig) -> QaResult<Self> {
        let api_key_header = HeaderName::from_bytes(config.api_key_header.as_bytes())
            .map_err(|e| QaError::validation(format!("invalid api key header: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(256)
            .build()?;

        Ok(Self {
            client,
            api_key_header,
            api_key: config.api_key.clone(),
            timeout: config.request_timeout(),
        })
    }

    /// Configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn headers(&self, request: &ApiRequest) -> QaResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CORRELATION_HEADER,
            HeaderValue::from_str(&request.correlation_id.to_string())
                .map_err(|e| QaError::internal(e.to_string()))?,
        );

        let key = match &request.api_key {
            ApiKey::Configured => Some(self.api_key.as_str()),
            ApiKey::Override(key) => Some(key.as_str()),
            ApiKey::Omit => None,
        };
        if let Some(key) = key {
            headers.insert(
                self.api_key_header.clone(),
                HeaderValue::from_str(key)
                    .map_err(|e| QaError::validation(format!("invalid api key: {e}")))?,
            );
        }
        Ok(headers)
    }

    /// Issue a single request. Any HTTP status is returned as a response;
    /// only timeouts and transport failures are errors.
    pub async fn send(&self, request: ApiRequest) -> QaResult<ApiResponse> {
        let headers = self.headers(&request)?;
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let result = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        }
        .await;
        let latency = started.elapsed();

        let (status, bytes) = result.map_err(|e| {
            if e.is_timeout() {
                QaError::RequestTimeout {
                    after: self.timeout,
                }
            } else {
                QaError::Transport(e.to_string())
            }
        })?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        tracing::trace!(
            method = %request.method,
            url = %request.url,
            status,
            latency_ms = latency.as_millis() as u64,
            correlation_id = %request.correlation_id,
            "request completed"
        );

        Ok(ApiResponse {
            status,
            body,
            latency,
        })
    }
}

#[async_trait]
impl ApiTransport for ServiceClient {
    async fn send(&self, request: ApiRequest) -> QaResult<ApiResponse> {
        ServiceClient::send(self, request).await
    }
}
