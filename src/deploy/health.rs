//! HTTP probes against a deployed service

use crate::deploy::HttpMethod;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Base URL of a running service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub base_url: String,
}

impl ServiceEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Absolute URL for a path such as `/healthz`
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// A single request to the service
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

/// Response status and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport for probes and validation requests
///
/// An `Err` is a transport failure (refused, reset, timed out); an HTTP
/// error status is still `Ok`.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, String>;
}

/// `reqwest`-backed client
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    client: Client,
}

impl HttpServiceClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

impl Default for HttpServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, String> {
        debug!("{} {}", request.method.as_str(), request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        }
        .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(ProbeResponse { status, body })
    }
}
