//! The transport abstraction shared by process and HTTP providers.
//!
//! Both transports expose `start`/`call`/`stop`, so the registry never needs
//! to know how a provider is reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::audit::AuditSink;
use super::errors::McpError;
use super::http::HttpTransport;
use super::stdio::StdioTransport;
use super::types::{
    JsonRpcResponse, LaunchSpec, ProviderDescriptor, ResponseOutcome, TransportKind,
    PROTOCOL_VERSION,
};

/// A connection to one provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The provider name this transport talks to.
    fn server_name(&self) -> &str;

    fn kind(&self) -> TransportKind;

    /// Establish the connection and perform the `initialize` handshake.
    ///
    /// Returns the provider's `initialize` result. Any failure is reported as
    /// `McpError::StartupFailed`.
    async fn start(&self) -> Result<serde_json::Value, McpError>;

    /// Issue one request and wait for its reply, at most `timeout`.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError>;

    /// Release the connection. Never fails; calling it twice is harmless.
    async fn stop(&self);
}

/// Construct the transport matching a descriptor's launch spec.
pub fn for_descriptor(
    descriptor: &ProviderDescriptor,
    audit: Arc<AuditSink>,
    init_timeout: Duration,
) -> Arc<dyn Transport> {
    match &descriptor.launch {
        LaunchSpec::Process(launch) => Arc::new(StdioTransport::new(
            &descriptor.name,
            launch.clone(),
            audit,
            init_timeout,
        )),
        LaunchSpec::Http { url } => Arc::new(HttpTransport::new(
            &descriptor.name,
            url,
            audit,
            init_timeout,
        )),
    }
}

/// Parameters sent with the `initialize` handshake.
pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {},
    })
}

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(
    server: &str,
    response: JsonRpcResponse,
) -> Result<serde_json::Value, McpError> {
    match response.outcome {
        ResponseOutcome::Result(value) => Ok(value),
        ResponseOutcome::Error(err) => Err(McpError::RemoteError {
            server: server.to_string(),
            code: err.code,
            message: err.message,
            data: err.data,
        }),
    }
}

/// Rewrap a handshake failure as a start-up failure.
pub(crate) fn startup_error(server: &str, err: McpError) -> McpError {
    match err {
        McpError::StartupFailed { .. } => err,
        McpError::Timeout { elapsed_ms, .. } => McpError::StartupFailed {
            name: server.to_string(),
            reason: format!("initialization timed out after {elapsed_ms}ms"),
        },
        other => McpError::StartupFailed {
            name: server.to_string(),
            reason: format!("initialization failed: {other}"),
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
