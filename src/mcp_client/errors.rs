//! MCP Client error types.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A provider process or connection could not be established, or the
    /// `initialize` handshake did not complete.
    #[error("failed to start server '{name}': {reason}")]
    StartupFailed { name: String, reason: String },

    /// The call target is not a ready provider in the registry.
    #[error("server not available: '{name}'")]
    ProviderUnavailable { name: String },

    /// No matching reply arrived within the call bound.
    #[error("call '{method}' to server '{server}' timed out after {elapsed_ms}ms")]
    Timeout {
        server: String,
        method: String,
        elapsed_ms: u64,
    },

    /// The provider answered with a JSON-RPC error, or the HTTP exchange
    /// failed in a way that produced no usable response.
    #[error("server '{server}' error [{code}]: {message}")]
    RemoteError {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The connection ended while the request was outstanding.
    #[error("transport to server '{server}' closed: {reason}")]
    TransportClosed { server: String, reason: String },

    /// Configuration error (missing servers, bad config file).
    #[error("config error: {reason}")]
    Config { reason: String },
}

/// Machine-readable failure category, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StartupError,
    ProviderUnavailable,
    TimeoutError,
    RemoteError,
    TransportClosed,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StartupError => "startup_error",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::RemoteError => "remote_error",
            ErrorKind::TransportClosed => "transport_closed",
            ErrorKind::ConfigError => "config_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl McpError {
    /// The failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::StartupFailed { .. } => ErrorKind::StartupError,
            McpError::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            McpError::Timeout { .. } => ErrorKind::TimeoutError,
            McpError::RemoteError { .. } => ErrorKind::RemoteError,
            McpError::TransportClosed { .. } => ErrorKind::TransportClosed,
            McpError::Config { .. } => ErrorKind::ConfigError,
        }
    }

    /// The provider-supplied JSON-RPC error code, if any.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            McpError::RemoteError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a caller could reasonably retry the same call.
    ///
    /// The client itself never retries; this only informs caller policy.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            McpError::Timeout { .. } | McpError::TransportClosed { .. }
        )
    }
}
