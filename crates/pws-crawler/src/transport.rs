use std::collections::HashMap;
use std::fmt;
use std::io::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::config::CrawlerConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// Everything needed to issue one attempt of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: vec![],
            proxy: None,
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { body: String, status: u16 },
    SoftBlocked { reason: String },
    HardError { cause: TransportError },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_soft_blocked(&self) -> bool {
        matches!(self, Self::SoftBlocked { .. })
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { status, body } => write!(f, "status {status} ({} bytes)", body.len()),
            Self::SoftBlocked { reason } => write!(f, "soft-blocked: {reason}"),
            Self::HardError { cause } => write!(f, "{cause}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("couldn't read body: {0}")]
    Body(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no client configured for proxy {0}")]
    UnknownProxy(String),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    fn from_reqwest(e: reqwest::Error, limit: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(limit)
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else if e.is_body() || e.is_decode() {
            Self::Body(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Recognizes a response that was refused by anti-bot logic.
#[derive(Clone)]
pub enum BlockMarker {
    Contains(String),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl BlockMarker {
    pub fn contains(marker: impl Into<String>) -> Self {
        Self::Contains(marker.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Returns the block reason when `body` matches.
    pub fn check(&self, body: &str) -> Option<String> {
        match self {
            Self::Contains(marker) if body.contains(marker.as_str()) => {
                Some(format!("body contains marker {marker:?}"))
            }
            Self::Predicate(f) if f(body) => Some(String::from("body matched block predicate")),
            _ => None,
        }
    }
}

impl fmt::Debug for BlockMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains(marker) => f.debug_tuple("Contains").field(marker).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Markers take precedence over the status code.
pub fn classify(status: u16, body: String, markers: &[BlockMarker]) -> FetchOutcome {
    if let Some(reason) = markers.iter().find_map(|m| m.check(&body)) {
        return FetchOutcome::SoftBlocked {
            reason: format!("{reason} (status {status})"),
        };
    }
    if (200..300).contains(&status) {
        FetchOutcome::Success { body, status }
    } else {
        FetchOutcome::HardError {
            cause: TransportError::Status(status),
        }
    }
}

/// A single request, no retries and no sleeping.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, spec: &RequestSpec) -> FetchOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    clients: HashMap<Option<String>, reqwest::Client>,
    markers: Vec<BlockMarker>,
}

impl HttpTransport {
    pub fn new(config: &CrawlerConfig) -> anyhow::Result<Self> {
        let mut clients = HashMap::new();
        let direct = [None];
        let proxies = if config.proxies.is_empty() {
            &direct[..]
        } else {
            &config.proxies[..]
        };
        for proxy in proxies {
            if clients.contains_key(proxy) {
                continue;
            }
            let mut builder = reqwest::ClientBuilder::new()
                .gzip(true)
                .deflate(true)
                .pool_max_idle_per_host(config.pool_max_idle_per_host)
                .timeout(config.timeout());
            if let Some(proxy) = proxy {
                builder = builder.proxy(reqwest::Proxy::all(proxy)?);
            }
            clients.insert(proxy.clone(), builder.build()?);
        }

        let markers = config
            .block_markers
            .iter()
            .map(|m| BlockMarker::contains(m.as_str()))
            .collect();

        Ok(Self { clients, markers })
    }

    pub fn with_marker(mut self, marker: BlockMarker) -> Self {
        self.markers.push(marker);
        self
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        spec: &RequestSpec,
    ) -> Result<(u16, String), TransportError> {
        let mut req = match spec.method {
            Method::Get => client.get(&spec.url),
            Method::Post => client.post(&spec.url),
        }
        .timeout(spec.timeout);
        for (name, value) in &spec.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, spec.timeout))?;
        let status = resp.status().as_u16();

        let page = match resp.headers().get(CONTENT_TYPE) {
            Some(c) if c == "application/x-gzip" || c == "application/gzip" => {
                let compressed = resp
                    .bytes()
                    .await
                    .map_err(|e| TransportError::from_reqwest(e, spec.timeout))?;
                let mut gz = GzDecoder::new(&compressed[..]);
                let mut page = String::new();
                gz.read_to_string(&mut page)
                    .map_err(|e| TransportError::Body(e.to_string()))?;
                page
            }
            _ => resp
                .text()
                .await
                .map_err(|e| TransportError::from_reqwest(e, spec.timeout))?,
        };

        Ok((status, page))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, spec: &RequestSpec) -> FetchOutcome {
        let Some(client) = self.clients.get(&spec.proxy) else {
            return FetchOutcome::HardError {
                cause: TransportError::UnknownProxy(spec.proxy.clone().unwrap_or_default()),
            };
        };

        match timeout(spec.timeout, self.send(client, spec)).await {
            Ok(Ok((status, body))) => classify(status, body, &self.markers),
            Ok(Err(cause)) => FetchOutcome::HardError { cause },
            Err(_) => FetchOutcome::HardError {
                cause: TransportError::Timeout(spec.timeout),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_wins_over_status() {
        let markers = [BlockMarker::contains("检测到异常请求")];

        let outcome = classify(200, "<p>检测到异常请求</p>".into(), &markers);
        assert!(outcome.is_soft_blocked());

        let outcome = classify(403, "检测到异常请求".into(), &markers);
        assert!(outcome.is_soft_blocked());
    }

    #[test]
    fn non_2xx_is_hard_error() {
        assert_eq!(
            classify(404, "not here".into(), &[]),
            FetchOutcome::HardError {
                cause: TransportError::Status(404)
            }
        );
        assert_eq!(
            classify(204, String::new(), &[]),
            FetchOutcome::Success {
                body: String::new(),
                status: 204
            }
        );
    }

    #[test]
    fn predicate_marker() {
        let marker = BlockMarker::predicate(|body| body.len() < 10);
        assert!(marker.check("tiny").is_some());
        assert!(marker.check("a perfectly normal page").is_none());
    }
}
