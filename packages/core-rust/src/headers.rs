//! Outbound header set with a guaranteed `Accept` entry.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use tracing::error;

use crate::validation::ValidationResult;

/// Content type negotiated when no `Accept` header is configured.
pub const DEFAULT_ACCEPT: &str = "application/json";

const ACCEPT: &str = "Accept";

/// Headers attached to every outbound request of one gateway.
///
/// After construction `Accept` is always present and non-empty. Malformed
/// entries are logged and repaired or dropped rather than rejected; the
/// findings are kept in [`HeaderSet::validation`] for callers that want to
/// be strict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    entries: BTreeMap<String, String>,
    validation: ValidationResult,
}

impl HeaderSet {
    /// Builds a header set, defaulting `Accept` to [`DEFAULT_ACCEPT`].
    #[must_use]
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self::with_accept(entries, None)
    }

    /// Builds a header set with an explicit `Accept` override.
    ///
    /// The override wins over any configured `Accept` entry. Without it, a
    /// configured non-empty `Accept` (matched case-insensitively) is kept.
    #[must_use]
    pub fn with_accept(entries: BTreeMap<String, String>, accept: Option<String>) -> Self {
        let mut errors = Vec::new();
        let mut cleaned = BTreeMap::new();
        for (name, value) in entries {
            if let Some(reason) = invalid_header(&name, &value) {
                errors.push(reason);
                continue;
            }
            cleaned.insert(name, value);
        }
        Self::finish(cleaned, accept, errors)
    }

    /// Builds a header set from loosely typed configuration values.
    ///
    /// Scalars (numbers, booleans) are stringified and recorded as
    /// validation errors; nulls, arrays and tables are dropped.
    #[must_use]
    pub fn from_values(raw: &serde_json::Map<String, JsonValue>) -> Self {
        let mut errors = Vec::new();
        let mut entries = BTreeMap::new();
        for (name, value) in raw {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => {
                    errors.push(format!("header {name:?} is not a string: {n}"));
                    n.to_string()
                }
                JsonValue::Bool(b) => {
                    errors.push(format!("header {name:?} is not a string: {b}"));
                    b.to_string()
                }
                other => {
                    errors.push(format!("header {name:?} has unsupported value {other}"));
                    continue;
                }
            };
            if let Some(reason) = invalid_header(name, &value) {
                errors.push(reason);
                continue;
            }
            entries.insert(name.clone(), value);
        }
        Self::finish(entries, None, errors)
    }

    fn finish(
        mut entries: BTreeMap<String, String>,
        accept: Option<String>,
        mut errors: Vec<String>,
    ) -> Self {
        let configured = entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(ACCEPT))
            .map(|(name, value)| (name.clone(), value.clone()));

        let accept = match (accept.filter(|a| !a.trim().is_empty()), configured) {
            (Some(explicit), Some((name, _))) => {
                entries.remove(&name);
                explicit
            }
            (Some(explicit), None) => explicit,
            (None, Some((name, value))) if !value.trim().is_empty() => {
                entries.remove(&name);
                value
            }
            (None, Some((name, _))) => {
                errors.push(format!("header {name:?} is empty, using {DEFAULT_ACCEPT}"));
                entries.remove(&name);
                DEFAULT_ACCEPT.to_owned()
            }
            (None, None) => DEFAULT_ACCEPT.to_owned(),
        };
        entries.insert(ACCEPT.to_owned(), accept);

        let validation = ValidationResult::from_errors(errors);
        for reason in validation.errors() {
            error!(reason = %reason, "invalid header");
        }

        Self {
            entries,
            validation,
        }
    }

    /// Looks up a header by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// The negotiated `Accept` value. Never empty.
    #[must_use]
    pub fn accept(&self) -> &str {
        self.get(ACCEPT).unwrap_or(DEFAULT_ACCEPT)
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Findings of the soft validation performed at construction.
    #[must_use]
    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }
}

impl Default for HeaderSet {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

fn invalid_header(name: &str, value: &str) -> Option<String> {
    if name.trim().is_empty() {
        return Some("header with empty name".to_owned());
    }
    if name.chars().any(|c| c.is_whitespace() || c == ':') {
        return Some(format!("header name {name:?} contains whitespace or ':'"));
    }
    if value.contains(['\r', '\n']) {
        return Some(format!("header {name:?} value contains a line break"));
    }
    None
}
