//! Cache key construction.
//!
//! Keys have the shape `{namespace}:{resource}:{params}` where `params` is either `all` or the
//! `key=value` pairs joined by `:` in ascending key order. Invalidation patterns are written against
//! the same shape, so this module is the single place that decides what a key looks like.
//!
//! Parameter names and values are escaped so that no value can reproduce another parameter set:
//! `%`, the separators `:` and `=`, and the glob metacharacters `* ? [ ] \` become `%XX`.

use std::borrow::{Borrow, Cow};
use std::sync::Arc;

use serde_json::Value;

/// Parameter segment used when a request carries no parameters.
pub const ALL_PARAMS: &str = "all";

const SEPARATOR: char = ':';

/// Builds namespaced cache keys and invalidation patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    namespace: Arc<str>,
}

impl KeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Arc::from(namespace.into()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the key for `resource` and a parameter set.
    ///
    /// `null` values are dropped, so `{page: 1, name: null}` and `{page: 1}` share a key. Input
    /// order never matters.
    pub fn build<I, K, V>(&self, resource: &str, params: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Borrow<Value>,
    {
        let mut pairs: Vec<(String, String)> = params
            .into_iter()
            .filter_map(|(key, value)| {
                render_value(value.borrow()).map(|rendered| {
                    (
                        escape_segment(key.as_ref()).into_owned(),
                        escape_segment(&rendered).into_owned(),
                    )
                })
            })
            .collect();

        if pairs.is_empty() {
            return format!("{}{SEPARATOR}{resource}{SEPARATOR}{ALL_PARAMS}", self.namespace);
        }

        pairs.sort_unstable();

        let mut key = format!("{}{SEPARATOR}{resource}", self.namespace);
        for (name, value) in &pairs {
            key.push(SEPARATOR);
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        key
    }

    /// Scope a namespace-relative glob (`products:*`) under this namespace.
    ///
    /// Patterns that already start with `{namespace}:` are returned unchanged.
    pub fn pattern(&self, pattern: &str) -> String {
        match pattern.strip_prefix(self.namespace()) {
            Some(rest) if rest.starts_with(SEPARATOR) => pattern.to_string(),
            _ => format!("{}{SEPARATOR}{pattern}", self.namespace),
        }
    }

    /// Glob covering every key this builder can produce.
    pub fn namespace_pattern(&self) -> String {
        format!("{}{SEPARATOR}*", self.namespace)
    }
}

const ESCAPED: [char; 8] = ['%', ':', '=', '*', '?', '[', ']', '\\'];

/// Percent-encode the characters that carry meaning in keys or `MATCH` patterns.
fn escape_segment(text: &str) -> Cow<'_, str> {
    if !text.contains(ESCAPED) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if ESCAPED.contains(&ch) {
            escaped.push_str(&format!("%{:02X}", ch as u32));
        } else {
            escaped.push(ch);
        }
    }
    Cow::Owned(escaped)
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        composite => Some(composite.to_string()),
    }
}
