//! MCP client: JSON-RPC transports and the provider registry.
//!
//! This module handles:
//! - Framing JSON-RPC 2.0 envelopes as one JSON object per line
//! - Multiplexing concurrent requests over one process's stdio, correlating
//!   replies by id and failing in-flight calls when the stream ends
//! - Stateless JSON-RPC over HTTP POST behind the same `Transport` trait
//! - Starting named providers with optional/required semantics
//! - Auditing every exchanged envelope to a per-day JSONL file

pub mod audit;
pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod pending;
pub mod registry;
pub mod stdio;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use audit::AuditSink;
pub use client::{ClientSettings, McpClient, ProviderStatus, StartReport};
pub use config::{find_config_path, load_config, BridgeConfig};
pub use errors::{ErrorKind, McpError};
pub use lifecycle::ProviderState;
pub use registry::ToolRegistry;
pub use transport::Transport;
pub use types::{CallFailure, McpToolDefinition, ProviderDescriptor, ToolCallResult};
