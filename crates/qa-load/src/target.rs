use std::collections::BTreeMap;

use async_trait::async_trait;
use qa_core::{ApiRequest, ApiResponse, CorrelationId, Method, QaConfig, QaError, QaResult, ServiceClient};
use serde_json::Value;

/// One concrete request produced by a worker.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    pub operation: String,
    pub service: String,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub correlation_id: CorrelationId,
}

/// The system under load.
#[async_trait]
pub trait LoadTarget: Send + Sync {
    /// Issue one request. Never retried by the caller.
    async fn execute(&self, request: TargetRequest) -> QaResult<ApiResponse>;
}

/// Live HTTP target resolving service keys to base URLs.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    client: ServiceClient,
    base_urls: BTreeMap<String, String>,
}

impl HttpTarget {
    pub fn new(client: ServiceClient, base_urls: BTreeMap<String, String>) -> Self {
        Self { client, base_urls }
    }

    pub fn from_config(config: &QaConfig) -> QaResult<Self> {
        let client = ServiceClient::new(&config.http)?;
        let base_urls = config
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service.base_url.trim_end_matches('/').to_string()))
            .collect();
        Ok(Self::new(client, base_urls))
    }
}

#[async_trait]
impl LoadTarget for HttpTarget {
    async fn execute(&self, request: TargetRequest) -> QaResult<ApiResponse> {
        let base = self
            .base_urls
            .get(&request.service)
            .ok_or_else(|| QaError::validation(format!("no base URL for service `{}`", request.service)))?;

        let mut api_request = ApiRequest::new(request.method, format!("{base}{}", request.path), request.correlation_id);
        if let Some(body) = request.body {
            api_request = api_request.with_body(body);
        }
        self.client.send(api_request).await
    }
}
