//! Error types for mcp-peer
//!
//! ## JSON-RPC Error Codes
//!
//! Standard JSON-RPC 2.0 error codes are defined in the specification:
//! <https://www.jsonrpc.org/specification#error_object>
//!
//! | Code   | Message          | Meaning                                      |
//! |--------|------------------|----------------------------------------------|
//! | -32700 | Parse error      | Invalid JSON was received                    |
//! | -32600 | Invalid Request  | The JSON sent is not a valid Request         |
//! | -32601 | Method not found | The method does not exist / is not available |
//! | -32602 | Invalid params   | Invalid method parameter(s)                  |
//! | -32603 | Internal error   | Internal JSON-RPC error                      |
//!
//! Only errors that belong on the wire become a [`JsonRpcError`]. Everything
//! local to one peer (transport failures, result-type mismatches on the
//! client) stays in [`Error`] and never leaves the process.

use serde::{Deserialize, Serialize};

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Unknown method: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for JsonRpcError {}

/// Transport-level failures, as reported by [`Transport`](crate::Transport)
/// implementations.
///
/// `Transient` is the distinguished "try again shortly" condition (the
/// EAGAIN analogue); the dispatch loops back off briefly and retry instead
/// of tearing down. Every other variant terminates the loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport temporarily unavailable")]
    Transient,

    #[error("transport closed")]
    Closed,

    #[error("failed to connect: {0}")]
    ConnectionFailed(String),

    #[error("transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the dispatch loop should retry after a short backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient)
    }
}

/// mcp-peer error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("JSON-RPC error: {0}")]
    JsonRpc(JsonRpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response arrived and decoded as JSON, but could not be narrowed to
    /// the result type the caller requested. This is a programmer error on
    /// the caller's side and is never placed on the wire.
    #[error("Response type mismatch for '{method}': {message}")]
    TypeMismatch { method: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Convert into the error object that goes on the wire.
    ///
    /// Typed protocol errors pass through unchanged; everything else is
    /// wrapped as `InternalError` so local detail does not leak structure.
    pub fn into_jsonrpc(self) -> JsonRpcError {
        match self {
            Error::JsonRpc(err) => err,
            other => JsonRpcError::internal_error(other.to_string()),
        }
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Error::JsonRpc(err)
    }
}

/// Result type alias for mcp-peer
pub type Result<T> = std::result::Result<T, Error>;
