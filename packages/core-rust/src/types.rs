use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters shown by [`Body::preview`] in log lines.
pub const PREVIEW_CHARS: usize = 200;

/// Payload carried by a request or response: decoded JSON or raw text.
///
/// The variant is preserved through storage, so a `text/plain` response
/// whose content happens to look like JSON is never re-read as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Body {
    /// Body decoded from a JSON content type.
    Json(serde_json::Value),
    /// Raw text, either declared as non-JSON or kept after a failed decode.
    Text(String),
}

impl Body {
    /// Returns the JSON value if this body was decoded as JSON.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Returns the raw text if this body was kept as text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    /// Single-line rendering truncated to `max_chars`, for log output.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let rendered = self.to_string().replace('\n', "");
        if rendered.chars().count() <= max_chars {
            rendered
        } else {
            rendered.chars().take(max_chars).collect()
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Canonical cached record of one completed outbound call.
///
/// Created once per cache miss, persisted by the active cache store and
/// never mutated afterwards. The lookup key is `url` alone, so requests
/// with different methods to the same URL share a cache slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
    /// HTTP status code returned by the upstream.
    pub status: u16,
    /// Request method, upper-case (`GET`, `POST`, ...).
    pub method: String,
    /// Headers sent with the request (not the response headers).
    pub headers: Option<BTreeMap<String, String>>,
    /// Fully resolved request URL. Cache key.
    pub url: String,
    /// Outgoing payload, if any.
    pub body: Option<Body>,
    /// Decoded response body.
    pub response: Body,
    /// When the response was received.
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for RequestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = self
            .body
            .as_ref()
            .map_or_else(|| "None".to_owned(), |b| b.preview(PREVIEW_CHARS));
        write!(
            f,
            "[{}] {} {} -> {} | body={}",
            self.timestamp.to_rfc3339(),
            self.method.to_uppercase(),
            self.url,
            self.status,
            preview
        )
    }
}

/// An externally pushed event, recorded with the request schema plus
/// the event name and its optional source.
///
/// Stored in its own table/bucket, never mixed with [`RequestEntry`] rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEntry {
    #[serde(flatten)]
    pub entry: RequestEntry,
    /// Event name, e.g. `"signup"`.
    pub event: String,
    /// Who delivered the event, when known.
    pub source: Option<String>,
}

impl fmt::Display for CallbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = self
            .entry
            .body
            .as_ref()
            .map_or_else(|| "None".to_owned(), |b| b.preview(PREVIEW_CHARS));
        write!(
            f,
            "[{}] {} {} {} <- {} | source={} | body={}",
            self.entry.timestamp.to_rfc3339(),
            self.event.to_uppercase(),
            self.entry.method.to_uppercase(),
            self.entry.url,
            self.entry.status,
            self.source.as_deref().unwrap_or("None"),
            preview
        )
    }
}

/// Normalized response returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    /// Response headers, lower-case names. Empty for cache hits, since
    /// only the request headers are persisted.
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    pub received_at: DateTime<Utc>,
    /// `true` when served from the cache store without a network call.
    pub from_cache: bool,
}

impl Response {
    /// Rebuilds a response from a cached entry.
    #[must_use]
    pub fn from_entry(entry: &RequestEntry) -> Self {
        Self {
            status: entry.status,
            headers: BTreeMap::new(),
            body: entry.response.clone(),
            received_at: entry.timestamp,
            from_cache: true,
        }
    }

    /// Whether the status code is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn sample_entry() -> RequestEntry {
        RequestEntry {
            status: 200,
            method: "GET".to_string(),
            headers: Some(BTreeMap::from([(
                "Accept".to_string(),
                "application/json".to_string(),
            )])),
            url: "https://api.test/v1/status".to_string(),
            body: None,
            response: Body::Json(json!({"ok": true})),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn text_body_keeps_variant_through_json() {
        let body = Body::Text("{\"looks\":\"like json\"}".to_string());
        let encoded = serde_json::to_string(&body).unwrap();
        let decoded: Body = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, body);
        assert!(!decoded.is_json());
    }

    #[test]
    fn preview_truncates_and_strips_newlines() {
        let body = Body::Text(format!("line one\n{}", "x".repeat(300)));
        let preview = body.preview(PREVIEW_CHARS);
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
        assert!(!preview.contains('\n'));
    }

    #[test]
    fn callback_entry_serializes_flat() {
        let callback = CallbackEntry {
            entry: sample_entry(),
            event: "signup".to_string(),
            source: Some("stripe".to_string()),
        };
        let value = serde_json::to_value(&callback).unwrap();
        assert_eq!(value["event"], "signup");
        assert_eq!(value["url"], "https://api.test/v1/status");
        assert_eq!(value["status"], 200);

        let back: CallbackEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, callback);
    }

    #[test]
    fn response_from_entry_is_marked_cached() {
        let entry = sample_entry();
        let response = Response::from_entry(&entry);
        assert!(response.from_cache);
        assert!(response.is_success());
        assert_eq!(response.body, entry.response);
        assert_eq!(response.received_at, entry.timestamp);
    }

    #[test]
    fn entry_display_mentions_method_and_url() {
        let rendered = sample_entry().to_string();
        assert!(rendered.contains("GET https://api.test/v1/status -> 200"));
    }
}
