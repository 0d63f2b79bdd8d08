//! Symbolic route names resolved against a base URL.
//!
//! Unknown names are not an error: they pass through unchanged and are
//! treated as literal (already absolute) URLs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::error;

use crate::validation::ValidationResult;

/// Values substituted into `{name}` placeholders of a resolved path.
pub type FormatParams = BTreeMap<String, String>;

/// Errors from substituting format parameters into a route template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteFormatError {
    #[error("route {template:?} references missing parameter {name:?}")]
    MissingParameter { name: String, template: String },
    #[error("route {template:?} has an unbalanced brace")]
    Malformed { template: String },
}

/// Base URL plus a map of route names to path suffixes.
///
/// Built once from configuration and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    base: String,
    routes: BTreeMap<String, String>,
    #[serde(skip)]
    validation: ValidationResult,
}

impl RouteTable {
    #[must_use]
    pub fn new(base: impl Into<String>, routes: BTreeMap<String, String>) -> Self {
        let mut errors = Vec::new();
        let routes = routes
            .into_iter()
            .filter(|(name, _)| {
                let ok = !name.trim().is_empty();
                if !ok {
                    errors.push("route with empty name".to_owned());
                }
                ok
            })
            .collect();
        Self::finish(base.into(), routes, errors)
    }

    /// Builds a route table from loosely typed configuration values.
    ///
    /// Numeric or boolean suffixes are stringified; other non-string values
    /// are dropped. Every repair is logged and recorded.
    #[must_use]
    pub fn from_values(base: impl Into<String>, raw: &serde_json::Map<String, JsonValue>) -> Self {
        let mut errors = Vec::new();
        let mut routes = BTreeMap::new();
        for (name, value) in raw {
            let suffix = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(_) | JsonValue::Bool(_) => {
                    errors.push(format!("route {name:?} is not a string: {value}"));
                    value.to_string()
                }
                other => {
                    errors.push(format!("route {name:?} has unsupported value {other}"));
                    continue;
                }
            };
            if name.trim().is_empty() {
                errors.push("route with empty name".to_owned());
                continue;
            }
            routes.insert(name.clone(), suffix);
        }
        Self::finish(base.into(), routes, errors)
    }

    fn finish(base: String, routes: BTreeMap<String, String>, errors: Vec<String>) -> Self {
        let validation = ValidationResult::from_errors(errors);
        for reason in validation.errors() {
            error!(reason = %reason, "invalid route");
        }
        Self {
            base,
            routes,
            validation,
        }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn routes(&self) -> &BTreeMap<String, String> {
        &self.routes
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Findings of the soft validation performed at construction.
    #[must_use]
    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    /// Resolves `name` to `base + suffix`, or returns `name` unchanged.
    #[must_use]
    pub fn resolve(&self, name: &str) -> String {
        match self.routes.get(name) {
            Some(suffix) => format!("{}{}", self.base, suffix),
            None => name.to_owned(),
        }
    }

    /// Resolves `name`, substitutes `params` into its placeholders and
    /// appends the literal `append` suffix.
    ///
    /// Substitution only runs when `params` is non-empty, so paths with
    /// literal braces are untouched by plain lookups.
    ///
    /// # Errors
    ///
    /// Returns [`RouteFormatError`] if a placeholder has no matching
    /// parameter or a brace is unbalanced.
    pub fn resolve_with(
        &self,
        name: &str,
        params: Option<&FormatParams>,
        append: &str,
    ) -> Result<String, RouteFormatError> {
        let mut path = self.resolve(name);
        if let Some(params) = params.filter(|p| !p.is_empty()) {
            path = format_template(&path, params)?;
        }
        path.push_str(append);
        Ok(path)
    }
}

/// Replaces `{name}` placeholders in `template` with values from `params`.
///
/// `{{` and `}}` produce literal braces.
///
/// # Errors
///
/// Returns [`RouteFormatError::MissingParameter`] for a placeholder without
/// a value and [`RouteFormatError::Malformed`] for an unbalanced brace.
pub fn format_template(template: &str, params: &FormatParams) -> Result<String, RouteFormatError> {
    let malformed = || RouteFormatError::Malformed {
        template: template.to_owned(),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(malformed()),
                        Some(ch) => name.push(ch),
                    }
                }
                let value = params
                    .get(&name)
                    .ok_or_else(|| RouteFormatError::MissingParameter {
                        name: name.clone(),
                        template: template.to_owned(),
                    })?;
                out.push_str(value);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(malformed()),
            _ => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(
            "https://api.test",
            BTreeMap::from([
                ("status".to_string(), "/v1/status".to_string()),
                ("user".to_string(), "/v1/users/{id}".to_string()),
            ]),
        )
    }

    fn params(pairs: &[(&str, &str)]) -> FormatParams {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn known_route_joins_base_and_suffix() {
        assert_eq!(table().resolve("status"), "https://api.test/v1/status");
    }

    #[test]
    fn unknown_route_passes_through() {
        let literal = "https://elsewhere.test/ping";
        assert_eq!(table().resolve(literal), literal);
    }

    #[test]
    fn placeholders_are_substituted() {
        let url = table()
            .resolve_with("user", Some(&params(&[("id", "42")])), "")
            .unwrap();
        assert_eq!(url, "https://api.test/v1/users/42");
    }

    #[test]
    fn append_goes_after_substitution() {
        let url = table()
            .resolve_with("user", Some(&params(&[("id", "7")])), "/posts?page=2")
            .unwrap();
        assert_eq!(url, "https://api.test/v1/users/7/posts?page=2");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = table()
            .resolve_with("user", Some(&params(&[("other", "1")])), "")
            .unwrap_err();
        assert_eq!(
            err,
            RouteFormatError::MissingParameter {
                name: "id".to_string(),
                template: "https://api.test/v1/users/{id}".to_string(),
            }
        );
    }

    #[test]
    fn empty_params_skip_substitution() {
        let url = table()
            .resolve_with("user", Some(&FormatParams::new()), "")
            .unwrap();
        assert_eq!(url, "https://api.test/v1/users/{id}");
    }

    #[test]
    fn escaped_braces_are_literal() {
        let out = format_template("/a/{{raw}}/{id}", &params(&[("id", "9")])).unwrap();
        assert_eq!(out, "/a/{raw}/9");
    }

    #[test]
    fn unbalanced_braces_are_malformed() {
        let p = params(&[("id", "1")]);
        assert!(matches!(
            format_template("/a/{id", &p),
            Err(RouteFormatError::Malformed { .. })
        ));
        assert!(matches!(
            format_template("/a/id}", &p),
            Err(RouteFormatError::Malformed { .. })
        ));
    }

    #[test]
    fn non_string_route_values_are_repaired_softly() {
        let raw = json!({"status": "/v1/status", "version": 2, "nested": {"a": "b"}});
        let table = RouteTable::from_values("https://api.test", raw.as_object().unwrap());
        assert_eq!(table.resolve("version"), "https://api.test2");
        assert!(!table.contains("nested"));
        assert_eq!(table.validation().errors().len(), 2);
    }

    proptest! {
        #[test]
        fn registered_names_resolve_to_base_plus_suffix(
            name in "[a-z]{1,12}",
            suffix in "/[a-z0-9/]{0,20}",
        ) {
            let routes = RouteTable::new(
                "https://api.test",
                BTreeMap::from([(name.clone(), suffix.clone())]),
            );
            prop_assert_eq!(routes.resolve(&name), format!("https://api.test{suffix}"));
        }

        #[test]
        fn unregistered_names_resolve_to_themselves(name in "[A-Za-z0-9:/._-]{1,40}") {
            let routes = table();
            prop_assume!(!routes.contains(&name));
            prop_assert_eq!(routes.resolve(&name), name);
        }
    }
}
