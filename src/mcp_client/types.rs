//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 envelopes, provider descriptors, and MCP protocol structures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, McpError};

/// JSON-RPC protocol version carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-08-01";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// A request identifier. Ours are always numeric; providers may echo strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Str(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Str(s.to_string())
    }
}

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request. `null` params become an empty object.
    pub fn new(id: RequestId, method: &str, params: serde_json::Value) -> Self {
        let params = match params {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id; never answered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message. Exactly one of result/error is present.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub outcome: ResponseOutcome,
}

/// The terminal payload of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(serde_json::Value),
    Error(JsonRpcError),
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Result(result),
        }
    }

    pub fn failure(id: RequestId, code: i64, message: &str) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Error(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Any single decoded line of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

// ─── Provider Descriptors ────────────────────────────────────────────────────

/// Which transport a provider is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Process,
    Http,
}

/// How to launch a process provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessLaunch {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessLaunch {
    /// Build a launch spec from an argument vector (`argv[0]` is the program).
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: HashMap::new(),
            cwd: None,
        })
    }
}

/// Transport-specific launch information.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchSpec {
    Process(ProcessLaunch),
    Http { url: String },
}

/// Immutable description of one provider, the source of truth for how to
/// reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub launch: LaunchSpec,
    /// When `true`, a start failure is logged and the provider skipped.
    pub optional: bool,
    /// Per-provider override of the registry's call timeout.
    pub call_timeout: Option<Duration>,
}

impl ProviderDescriptor {
    pub fn process(name: &str, argv: &[&str]) -> Self {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let launch = ProcessLaunch::from_argv(&argv).unwrap_or(ProcessLaunch {
            program: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        });
        Self {
            name: name.to_string(),
            launch: LaunchSpec::Process(launch),
            optional: false,
            call_timeout: None,
        }
    }

    pub fn http(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            launch: LaunchSpec::Http {
                url: url.to_string(),
            },
            optional: false,
            call_timeout: None,
        }
    }

    /// Mark this provider optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn kind(&self) -> TransportKind {
        match self.launch {
            LaunchSpec::Process(_) => TransportKind::Process,
            LaunchSpec::Http { .. } => TransportKind::Http,
        }
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// A failed call presented as data rather than as an error value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallFailure {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
}

impl From<&McpError> for CallFailure {
    fn from(err: &McpError) -> Self {
        let message = match err {
            McpError::RemoteError { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            code: err.remote_code(),
            message,
        }
    }
}

/// Result of a tool call execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub server: String,
    pub tool_name: String,
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<CallFailure>,
    pub execution_time_ms: u64,
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// HTTP exchange failed before a JSON-RPC response was obtained.
    pub const HTTP_TRANSPORT_ERROR: i64 = -32000;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
