//! Outbound HTTP seam.
//!
//! The gateway talks to upstream APIs only through [`HttpTransport`], so
//! tests can swap in a scripted transport while production uses
//! [`ReqwestTransport`].

pub mod http_client;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use receptionist_core::Body;

use crate::error::TransportError;

pub use http_client::{ReqwestTransport, TransportConfig};

/// A fully resolved request ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Body>,
    /// Per-request override of the transport's timeout.
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }
}

/// Raw upstream response: status, lowercase headers, undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase; repeated headers are joined with `", "`.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl TransportResponse {
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

/// Sends one request and returns the upstream's response, whatever its
/// status. Only connection-level failures are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}
