//! Frame classification and canonical encoding
//!
//! One inbound byte frame is one JSON-RPC envelope. Classification on
//! receive follows the envelope shape, not the method name:
//!
//! 1. object with `id` and `result`/`error` -> [`Frame::Response`]
//! 2. object with `id` and `method`         -> [`Frame::Request`]
//! 3. object with `method` and no `id`      -> [`Frame::Notification`]
//! 4. anything else                         -> [`FrameError`]
//!
//! Rule 1 is checked first, so a frame that would satisfy both 1 and 3
//! (impossible under JSON-RPC, but wire data is untrusted) classifies as a
//! response. For rule 4 any present `id` is recovered best-effort so a
//! parse-error response can still be correlated.
//!
//! Outbound encoding is canonical: object keys are emitted in lexicographic
//! order (encoding routes through `serde_json::Value`, whose map is ordered)
//! and forward slashes are never escaped, so equal inputs always produce
//! byte-identical frames.

use serde::Serialize;
use serde_json::Value;

use crate::error::JsonRpcError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// A classified inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// An unclassifiable frame, with any id that could be recovered from it.
#[derive(Debug, Clone)]
pub struct FrameError {
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl FrameError {
    fn new(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self { id, error }
    }
}

/// Best-effort extraction of an `id` field from an arbitrary JSON value.
fn recover_id(value: &Value) -> Option<RequestId> {
    value
        .get("id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
}

/// Classify one inbound frame.
pub fn classify(bytes: &[u8]) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        FrameError::new(None, JsonRpcError::parse_error(format!("Invalid JSON: {}", e)))
    })?;

    if !value.is_object() {
        return Err(FrameError::new(
            None,
            JsonRpcError::parse_error("Frame is not a JSON object"),
        ));
    }

    let has_id = value.get("id").is_some();
    let has_method = value.get("method").is_some();
    let has_outcome = value.get("result").is_some() || value.get("error").is_some();

    if has_id && has_outcome {
        return serde_json::from_value(value.clone())
            .map(Frame::Response)
            .map_err(|e| {
                FrameError::new(
                    recover_id(&value),
                    JsonRpcError::parse_error(format!("Malformed response: {}", e)),
                )
            });
    }

    if has_id && has_method {
        return serde_json::from_value(value.clone())
            .map(Frame::Request)
            .map_err(|e| {
                FrameError::new(
                    recover_id(&value),
                    JsonRpcError::parse_error(format!("Malformed request: {}", e)),
                )
            });
    }

    if has_method {
        return serde_json::from_value(value.clone())
            .map(Frame::Notification)
            .map_err(|e| {
                FrameError::new(None, JsonRpcError::parse_error(format!("Malformed notification: {}", e)))
            });
    }

    Err(FrameError::new(
        recover_id(&value),
        JsonRpcError::parse_error("Frame is not a request, response, or notification"),
    ))
}

/// Encode a frame canonically: lexicographic key order, no slash escaping.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, serde_json::Error> {
    // serde_json's Value map is BTree-backed, so serializing through it
    // sorts object keys regardless of struct field order.
    let value = serde_json::to_value(frame)?;
    serde_json::to_vec(&value)
}
