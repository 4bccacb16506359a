//! HTTP client capability.
//!
//! The engine never talks to the network directly — it dispatches through an
//! injected [`HttpClient`]. Connection pooling, TLS and retries all belong to
//! the implementation behind the trait. [`ReqwestClient`] is the stock
//! adapter; tests inject mocks.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::script::Method;

/// A fully rendered request, ready to dispatch.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// Captured response with fixed fields. Header names are lowercased on
/// capture so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub latency: Duration,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// A failed dispatch: connection refused, DNS failure, timeout. Local to one
/// step — never aborts the run.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// The capability the execution engine requires from its collaborator.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn issue(&self, request: HttpRequest) -> Result<Response, TransportError>;
}

/// Stock adapter over a pooled [`reqwest::Client`].
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        ReqwestClient { inner: reqwest::Client::new() }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn issue(&self, request: HttpRequest) -> Result<Response, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError { message: e.to_string() })?;

        let mut builder = self
            .inner
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError { message: e.to_string() })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError { message: e.to_string() })?;

        Ok(Response { status, headers, body, latency: start.elapsed() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = Response {
            status: 200,
            headers,
            body: String::new(),
            latency: Duration::from_millis(1),
        };
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);
    }
}
