//! Configuration for the callback ingestion server.

use std::time::Duration;

/// Bind address and request limits for the ingestion server.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time a single delivery may take before `408` is returned.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight deliveries to finish.
    pub drain_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback() {
        let config = IngestConfig::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
