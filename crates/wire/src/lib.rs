// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! fm-wire: the tool protocol spoken over standard streams.
//!
//! Wire format: one JSON value per line. Requests carry `{id, tool, args}`,
//! responses `{id, ok, result|error}`. Errors carry
//! `{kind, message, retriable}`.

mod request;
mod response;

pub use request::{
    AnswerArgs, ApplyDiffArgs, CancelArgs, DiffArgs, DispatchArgs, RejectDiffArgs, Request,
    RevisionArgs, SetTaskStatusArgs, StatusArgs, TailLogArgs, ToolName,
};
pub use response::{Response, WireError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request line: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Decode one request line.
pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Encode a response as one line (no trailing newline).
pub fn encode_response(response: &Response) -> String {
    // A Response is plain data; serialization cannot fail.
    serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"id":null,"ok":false,"error":{"kind":"fatal","message":"encode failure","retriable":false}}"#
            .to_string()
    })
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
