//! The structured result a handler returns.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_status_code() -> u16 {
    200
}

/// Result produced by a handler invocation.
///
/// Every field except `body` is optional on the wire; `body` is required by
/// the handler contract and its absence is treated as a contract violation
/// by the dispatcher (not here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    /// HTTP status code, 200 when the handler leaves it out.
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// When true, `body` holds base64-encoded binary data.
    #[serde(default)]
    pub is_base64_encoded: bool,
    /// Response headers, written verbatim and taking precedence over the
    /// renderer's defaults.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Response body. Mandatory; `None` or empty is a contract violation.
    #[serde(default)]
    pub body: Option<String>,
}

impl InvocationResult {
    /// Create an empty 200 result with no body set yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a 200 result with a `text/plain` body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new()
            .header("Content-Type", "text/plain")
            .body(body)
    }

    /// Create a 200 result with a JSON body.
    pub fn json<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new()
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(data)?))
    }

    /// Set the status code.
    pub fn status(mut self, code: u16) -> Self {
        self.status_code = code;
        self
    }

    /// Add a response header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a UTF-8 text body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a binary body, base64-encoding it and flagging the encoding.
    pub fn base64_body(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.body = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        self.is_base64_encoded = true;
        self
    }
}

impl Default for InvocationResult {
    fn default() -> Self {
        Self {
            status_code: 200,
            is_base64_encoded: false,
            headers: HashMap::new(),
            body: None,
        }
    }
}
