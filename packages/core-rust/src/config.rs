//! API definition loading.
//!
//! An API definition is a TOML document with three sections:
//!
//! ```toml
//! [headers]
//! Authorization = "Bearer $TOKEN"
//!
//! [url]
//! base = "https://api.example.com"
//!
//! [url.routes]
//! status = "/v1/status"
//!
//! [vars]
//! token = "abc123"
//! ```
//!
//! Every `$NAME` in `headers` and `url` (recursively through nested tables)
//! is replaced by the value of the `vars` entry whose upper-cased key is
//! `NAME`. Keys are matched literally, so `api-key` is referenced as
//! `$API-KEY`, and a longer key wins over its prefix. Substitution happens
//! once, at load time. Unknown placeholders are left intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::headers::HeaderSet;
use crate::routes::RouteTable;

/// Errors from loading an API definition. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read API definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse API definition: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to convert API definition: {0}")]
    Convert(#[from] serde_json::Error),
    #[error("API definition is missing `{0}`")]
    Missing(&'static str),
    #[error("API definition field `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Headers, routes and variables for one upstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiDefinition {
    pub headers: HeaderSet,
    pub routes: RouteTable,
    /// Raw variables as configured, keyed as written.
    pub vars: BTreeMap<String, String>,
}

impl ApiDefinition {
    /// Assembles a definition programmatically, without variables.
    #[must_use]
    pub fn new(headers: HeaderSet, routes: RouteTable) -> Self {
        Self {
            headers,
            routes,
            vars: BTreeMap::new(),
        }
    }

    /// Reads and parses a TOML API definition from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let definition = Self::from_toml_str(&text)?;
        debug!(
            path = %path.display(),
            routes = definition.routes.routes().len(),
            headers = definition.headers.len(),
            "loaded API definition"
        );
        Ok(definition)
    }

    /// Parses a TOML API definition.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not TOML or lacks `url.base`.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = text.parse()?;
        Self::from_value(serde_json::to_value(table)?)
    }

    /// Builds a definition from an already-parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `url` or `url.base` is absent or mistyped.
    pub fn from_value(mut document: JsonValue) -> Result<Self, ConfigError> {
        let root = document.as_object_mut().ok_or(ConfigError::Invalid {
            field: "<root>",
            reason: "expected a table".to_owned(),
        })?;

        let vars = match root.get("vars") {
            None => BTreeMap::new(),
            Some(JsonValue::Object(raw)) => collect_vars(raw),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    field: "vars",
                    reason: format!("expected a table, found {other}"),
                })
            }
        };
        let lookup: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect();

        if let Some(headers) = root.get_mut("headers") {
            substitute_vars(headers, &lookup);
        }
        let url = root.get_mut("url").ok_or(ConfigError::Missing("url"))?;
        substitute_vars(url, &lookup);

        let url = url.as_object().ok_or(ConfigError::Invalid {
            field: "url",
            reason: "expected a table".to_owned(),
        })?;
        let base = match url.get("base") {
            Some(JsonValue::String(base)) => base.clone(),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    field: "url.base",
                    reason: format!("expected a string, found {other}"),
                })
            }
            None => return Err(ConfigError::Missing("url.base")),
        };
        let routes = match url.get("routes") {
            None => RouteTable::new(base, BTreeMap::new()),
            Some(JsonValue::Object(raw)) => RouteTable::from_values(base, raw),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    field: "url.routes",
                    reason: format!("expected a table, found {other}"),
                })
            }
        };

        let headers = match root.get("headers") {
            None => HeaderSet::default(),
            Some(JsonValue::Object(raw)) => HeaderSet::from_values(raw),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    field: "headers",
                    reason: format!("expected a table, found {other}"),
                })
            }
        };

        Ok(Self {
            headers,
            routes,
            vars,
        })
    }
}

fn collect_vars(raw: &Map<String, JsonValue>) -> BTreeMap<String, String> {
    raw.iter()
        .filter_map(|(key, value)| match value {
            JsonValue::String(s) => Some((key.clone(), s.clone())),
            JsonValue::Number(_) | JsonValue::Bool(_) => Some((key.clone(), value.to_string())),
            other => {
                warn!(var = %key, value = %other, "ignoring non-scalar variable");
                None
            }
        })
        .collect()
}

/// Replaces `$NAME` placeholders in every string reachable from `value`.
///
/// `vars` must be keyed by the upper-cased variable name.
pub fn substitute_vars(value: &mut JsonValue, vars: &BTreeMap<String, String>) {
    if let Some(pattern) = placeholder_pattern(vars) {
        replace_placeholders(value, &pattern, vars);
    }
}

/// Matches `$` followed by any known key, longest key first.
fn placeholder_pattern(vars: &BTreeMap<String, String>) -> Option<Regex> {
    let mut keys: Vec<&str> = vars
        .keys()
        .map(String::as_str)
        .filter(|key| !key.is_empty())
        .collect();
    if keys.is_empty() {
        return None;
    }
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = keys
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&format!(r"\$({alternation})")) {
        Ok(pattern) => Some(pattern),
        Err(err) => {
            warn!(
                error = %err,
                "variable placeholders could not be compiled; skipping substitution"
            );
            None
        }
    }
}

fn replace_placeholders(value: &mut JsonValue, pattern: &Regex, vars: &BTreeMap<String, String>) {
    match value {
        JsonValue::String(s) => {
            if s.contains('$') {
                let replaced = pattern.replace_all(s, |caps: &Captures<'_>| {
                    vars.get(&caps[1])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_owned())
                });
                *s = replaced.into_owned();
            }
        }
        JsonValue::Object(map) => {
            for nested in map.values_mut() {
                replace_placeholders(nested, pattern, vars);
            }
        }
        JsonValue::Array(items) => {
            for nested in items {
                replace_placeholders(nested, pattern, vars);
            }
        }
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::headers::DEFAULT_ACCEPT;

    const SAMPLE: &str = r#"
        [headers]
        Authorization = "Bearer $TOKEN"
        User-Agent = "receptionist/$VERSION"

        [url]
        base = "https://$HOST"

        [url.routes]
        status = "/v1/status"
        account = "/v1/accounts/$ACCOUNT/{id}"

        [vars]
        token = "abc123"
        host = "api.test"
        version = 2
        account = "acme"
    "#;

    #[test]
    fn vars_are_substituted_into_headers_and_routes() {
        let api = ApiDefinition::from_toml_str(SAMPLE).unwrap();
        assert_eq!(api.headers.get("Authorization"), Some("Bearer abc123"));
        assert_eq!(api.headers.get("User-Agent"), Some("receptionist/2"));
        assert_eq!(api.headers.accept(), DEFAULT_ACCEPT);
        assert_eq!(api.routes.base(), "https://api.test");
        assert_eq!(api.routes.resolve("status"), "https://api.test/v1/status");
        assert_eq!(
            api.routes.resolve("account"),
            "https://api.test/v1/accounts/acme/{id}"
        );
        assert_eq!(api.vars.get("token").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn unknown_placeholders_are_left_intact() {
        let mut value = serde_json::json!({"a": "$MISSING/$KNOWN", "n": {"deep": ["$KNOWN"]}});
        let vars = BTreeMap::from([("KNOWN".to_string(), "yes".to_string())]);
        substitute_vars(&mut value, &vars);
        assert_eq!(value["a"], "$MISSING/yes");
        assert_eq!(value["n"]["deep"][0], "yes");
    }

    #[test]
    fn longer_names_are_not_clobbered_by_prefixes() {
        let mut value = serde_json::json!("$API_KEY and $API");
        let vars = BTreeMap::from([
            ("API".to_string(), "short".to_string()),
            ("API_KEY".to_string(), "long".to_string()),
        ]);
        substitute_vars(&mut value, &vars);
        assert_eq!(value, "long and short");
    }

    #[test]
    fn hyphenated_keys_are_substituted() {
        let api = ApiDefinition::from_toml_str(
            r#"
            [headers]
            X-Api-Key = "$API-KEY"

            [url]
            base = "https://x.test"

            [vars]
            api-key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(api.headers.get("X-Api-Key"), Some("secret"));
    }

    #[test]
    fn placeholder_followed_by_name_characters_is_substituted() {
        let mut value = serde_json::json!("$TOKEN_SUFFIX");
        let vars = BTreeMap::from([("TOKEN".to_string(), "abc123".to_string())]);
        substitute_vars(&mut value, &vars);
        assert_eq!(value, "abc123_SUFFIX");
    }

    #[test]
    fn no_vars_leaves_dollars_alone() {
        let mut value = serde_json::json!({"price": "$5 and $TOKEN"});
        substitute_vars(&mut value, &BTreeMap::new());
        assert_eq!(value["price"], "$5 and $TOKEN");
    }

    #[test]
    fn headers_and_vars_are_optional() {
        let api = ApiDefinition::from_toml_str("[url]\nbase = \"https://x.test\"\n").unwrap();
        assert_eq!(api.headers.len(), 1);
        assert!(api.routes.routes().is_empty());
        assert!(api.vars.is_empty());
    }

    #[test]
    fn missing_url_section_is_fatal() {
        let err = ApiDefinition::from_toml_str("[headers]\nA = \"b\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Missing("url")));
    }

    #[test]
    fn missing_base_is_fatal() {
        let err = ApiDefinition::from_toml_str("[url.routes]\na = \"/a\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Missing("url.base")));
    }

    #[test]
    fn unparsable_toml_is_fatal() {
        let err = ApiDefinition::from_toml_str("[url\nbase = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let api = ApiDefinition::load(file.path()).unwrap();
        assert_eq!(api.routes.resolve("status"), "https://api.test/v1/status");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = ApiDefinition::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
