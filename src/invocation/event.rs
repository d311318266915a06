//! Invocation event and context built from an incoming request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structured request data passed to a handler.
///
/// Currently limited to query parameters: the request's query string is
/// parsed into a string-to-string map, built fresh for every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationEvent {
    /// Query parameters, keyed by name. Duplicate keys resolve
    /// last-value-wins.
    #[serde(rename = "queryStringParameters", default)]
    pub query_string_parameters: HashMap<String, String>,
}

impl InvocationEvent {
    /// Create an event with no query parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an event from a raw query string (without the leading `?`).
    ///
    /// Parsing is best-effort and never fails: percent- and plus-encoding
    /// are decoded, pairs without a value map to the empty string, and
    /// duplicate keys keep the last value.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = HashMap::new();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                params.insert(key.into_owned(), value.into_owned());
            }
        }
        Self {
            query_string_parameters: params,
        }
    }

    /// Look up a single query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query_string_parameters.get(name).map(String::as_str)
    }
}

/// Empty placeholder passed alongside the event, reserved for future
/// invocation metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationContext {}

impl InvocationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }
}
