//! Response body decoding.

use receptionist_core::Body;
use tracing::warn;

/// Decodes an upstream body according to its content type.
///
/// A content type containing `json` is parsed as JSON. Anything else, or
/// JSON that fails to parse, is kept as text. Never fails; a failed parse
/// logs a warning. Invalid UTF-8 is replaced lossily.
#[must_use]
pub fn decode_payload(content_type: Option<&str>, bytes: &[u8]) -> Body {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let declared_json = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    if !declared_json || text.is_empty() {
        return Body::Text(text);
    }

    match serde_json::from_str(&text) {
        Ok(value) => Body::Json(value),
        Err(err) => {
            warn!(
                content_type = content_type.unwrap_or_default(),
                error = %err,
                "response declared JSON but did not parse; keeping raw text"
            );
            Body::Text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::capture_warnings;

    #[test]
    fn json_content_type_is_parsed() {
        let body = decode_payload(Some("application/json; charset=utf-8"), br#"{"ok":true}"#);
        assert_eq!(body, Body::Json(json!({"ok": true})));
    }

    #[test]
    fn vendor_json_types_count_as_json() {
        let body = decode_payload(Some("application/vnd.api+JSON"), b"[1,2]");
        assert_eq!(body, Body::Json(json!([1, 2])));
    }

    #[test]
    fn text_plain_is_never_parsed() {
        let body = decode_payload(Some("text/plain"), br#"{"ok":true}"#);
        assert_eq!(body, Body::Text(r#"{"ok":true}"#.to_string()));
    }

    #[test]
    fn malformed_json_falls_back_to_text_with_a_warning() {
        let (warnings, _guard) = capture_warnings();
        let body = decode_payload(Some("application/json"), b"{not json");
        assert_eq!(body, Body::Text("{not json".to_string()));
        assert_eq!(warnings.messages().len(), 1);
        assert!(warnings.contains("did not parse"));
    }

    #[test]
    fn missing_content_type_is_text() {
        assert_eq!(decode_payload(None, b"hello"), Body::Text("hello".into()));
    }

    #[test]
    fn empty_json_body_is_empty_text() {
        let (warnings, _guard) = capture_warnings();
        assert_eq!(
            decode_payload(Some("application/json"), b""),
            Body::Text(String::new())
        );
        assert!(warnings.messages().is_empty());
    }
}
