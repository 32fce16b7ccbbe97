//! Line framing for JSON-RPC envelopes.
//!
//! One JSON object per line, UTF-8, `\n`-terminated. Encoding is infallible
//! (compact JSON escapes embedded newlines). Decoding never panics: anything
//! that is not a well-formed envelope comes back as a [`DecodeError`] so the
//! read loop can log it and keep going.

use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{
    Envelope, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    ResponseOutcome, JSONRPC_VERSION,
};

/// A line that is not valid JSON or not a JSON-RPC envelope.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("undecodable line: {reason}")]
pub struct DecodeError {
    pub reason: String,
    /// The offending input, as received.
    pub raw: String,
}

impl DecodeError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

/// Convert an envelope into its wire JSON value.
pub fn to_value(envelope: &Envelope) -> Value {
    match envelope {
        Envelope::Request(req) => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": req.id,
            "method": req.method,
            "params": req.params,
        }),
        Envelope::Notification(note) => {
            let mut obj = Map::new();
            obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
            obj.insert("method".into(), Value::from(note.method.clone()));
            if let Some(params) = &note.params {
                obj.insert("params".into(), params.clone());
            }
            Value::Object(obj)
        }
        Envelope::Response(resp) => match &resp.outcome {
            ResponseOutcome::Result(result) => serde_json::json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": resp.id,
                "result": result,
            }),
            ResponseOutcome::Error(err) => serde_json::json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": resp.id,
                "error": err,
            }),
        },
    }
}

/// Encode an envelope as one newline-terminated line.
pub fn encode(envelope: &Envelope) -> String {
    let mut line = to_value(envelope).to_string();
    line.push('\n');
    line
}

/// Decode one line (with or without its trailing newline).
pub fn decode(line: &str) -> Result<Envelope, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::new("empty line", line));
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| DecodeError::new(format!("invalid JSON: {e}"), line))?;

    from_value(value).map_err(|reason| DecodeError::new(reason, line))
}

/// Classify an already-parsed JSON value as an envelope.
pub fn from_value(value: Value) -> Result<Envelope, String> {
    let Value::Object(mut obj) = value else {
        return Err("top-level value is not an object".into());
    };

    if let Some(version) = obj.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Err(format!("unsupported jsonrpc version: {version}"));
        }
    }

    let id = match obj.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<RequestId>(raw)
                .map_err(|_| "id must be an integer or a string".to_string())?,
        ),
    };

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err("method must be a string".into());
        };
        let params = obj.remove("params");
        return Ok(match id {
            Some(id) => Envelope::Request(JsonRpcRequest::new(
                id,
                &method,
                params.unwrap_or(Value::Null),
            )),
            None => Envelope::Notification(JsonRpcNotification::new(&method, params)),
        });
    }

    let Some(id) = id else {
        return Err("neither a request, a notification, nor a response".into());
    };

    let result = obj.remove("result");
    let error = obj.remove("error");
    let outcome = match (result, error) {
        (Some(result), None) => ResponseOutcome::Result(result),
        (None, Some(error)) | (Some(Value::Null), Some(error)) => {
            let error: JsonRpcError = serde_json::from_value(error)
                .map_err(|e| format!("malformed error object: {e}"))?;
            ResponseOutcome::Error(error)
        }
        (Some(_), Some(_)) => return Err("response carries both result and error".into()),
        (None, None) => return Err("response carries neither result nor error".into()),
    };

    Ok(Envelope::Response(JsonRpcResponse { id, outcome }))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
