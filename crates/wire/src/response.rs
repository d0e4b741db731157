// SPDX-License-Identifier: MIT

//! Response shape and the structured wire error.

use serde::{Deserialize, Serialize};

use fm_core::{CoreError, ErrorKind};

/// Structured error surfaced to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
}

impl From<CoreError> for WireError {
    fn from(err: CoreError) -> Self {
        Self { kind: err.kind, retriable: err.retriable(), message: err.message }
    }
}

impl WireError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::invalid_input(message).into()
    }
}

/// One outgoing response, `id` echoed from the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: serde_json::Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self { id, ok: true, result: Some(result), error: None }
    }

    pub fn failure(id: serde_json::Value, error: WireError) -> Self {
        Self { id, ok: false, result: None, error: Some(error) }
    }
}
