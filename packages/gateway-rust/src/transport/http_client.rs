//! [`HttpTransport`] implementation over a pooled `reqwest` client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use receptionist_core::Body;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{HttpTransport, OutboundRequest, TransportResponse};

/// Client-wide transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Whole-request timeout; `None` disables it.
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("receptionist/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Production transport. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the TLS backend or resolver
    /// cannot be initialized.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(TransportError::Client)?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let OutboundRequest {
            method,
            url,
            headers,
            query,
            body,
            timeout,
        } = request;

        let mut builder = self.client.request(method.clone(), url.as_str());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        builder = match body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Text(text)) => builder.body(text),
            None => builder,
        };
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|source| {
            if source.is_timeout() {
                TransportError::Timeout { url: url.clone() }
            } else {
                TransportError::Request {
                    url: url.clone(),
                    source,
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await.map_err(|source| {
            if source.is_timeout() {
                TransportError::Timeout { url: url.clone() }
            } else {
                TransportError::Body {
                    url: url.clone(),
                    source,
                }
            }
        })?;

        debug!(%method, %url, status, bytes = body.len(), "upstream responded");
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn collect_headers(map: &HeaderMap) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in map {
        let value = String::from_utf8_lossy(value.as_bytes());
        headers
            .entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    headers
}
