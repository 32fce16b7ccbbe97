//! MCP client: the provider registry and single call entry point.
//!
//! Starts every configured provider in order, tracks each one's lifecycle
//! state, and routes `call(server, method, params)` to the right transport.
//! Lifecycle operations take `&mut self`; calls take `&self` and may run
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::audit::AuditSink;
use super::config::BridgeConfig;
use super::errors::{ErrorKind, McpError};
use super::lifecycle::ProviderState;
use super::registry::ToolRegistry;
use super::transport::{self, Transport};
use super::types::{
    error_codes, CallFailure, InitializeResult, McpToolDefinition, ProviderDescriptor,
    ToolCallResult, ToolsListResult, TransportKind,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default bound on a single call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the `initialize` handshake.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry-wide timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub call_timeout: Duration,
    pub init_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Outcome of [`McpClient::start_all`] when no required provider failed.
#[derive(Debug, Default)]
pub struct StartReport {
    /// Providers that reached `Ready`, in start order.
    pub started: Vec<String>,
    /// Optional providers that failed to start.
    pub skipped: Vec<(String, McpError)>,
}

/// Snapshot of one provider for display.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub transport: TransportKind,
    pub state: ProviderState,
    pub optional: bool,
    /// `serverInfo` the provider reported during the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct ProviderSlot {
    descriptor: ProviderDescriptor,
    state: ProviderState,
    transport: Option<Arc<dyn Transport>>,
    initialize_result: Option<serde_json::Value>,
    failure: Option<String>,
}

impl ProviderSlot {
    fn transition(&mut self, next: ProviderState) {
        if self.state.can_transition_to(next) {
            tracing::debug!(server = %self.descriptor.name, from = %self.state, to = %next, "provider state change");
            self.state = next;
        } else {
            tracing::warn!(server = %self.descriptor.name, from = %self.state, to = %next, "ignoring illegal provider state change");
        }
    }
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Registry of named providers.
pub struct McpClient {
    /// Providers in configuration order.
    providers: Vec<ProviderSlot>,
    index: HashMap<String, usize>,
    audit: Arc<AuditSink>,
    settings: ClientSettings,
    /// Tools discovered by the last [`McpClient::refresh_tools`].
    pub registry: ToolRegistry,
}

impl McpClient {
    /// Create a registry with default timeouts. Provider names must be unique.
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        audit: Arc<AuditSink>,
    ) -> Result<Self, McpError> {
        Self::with_settings(descriptors, audit, ClientSettings::default())
    }

    pub fn with_settings(
        descriptors: Vec<ProviderDescriptor>,
        audit: Arc<AuditSink>,
        settings: ClientSettings,
    ) -> Result<Self, McpError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        let mut providers = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.into_iter().enumerate() {
            if index.insert(descriptor.name.clone(), i).is_some() {
                return Err(McpError::Config {
                    reason: format!("duplicate server name '{}'", descriptor.name),
                });
            }
            providers.push(ProviderSlot {
                descriptor,
                state: ProviderState::Unstarted,
                transport: None,
                initialize_result: None,
                failure: None,
            });
        }

        Ok(Self {
            providers,
            index,
            audit,
            settings,
            registry: ToolRegistry::new(),
        })
    }

    /// Create a registry from a loaded config file.
    pub fn from_config(config: &BridgeConfig, audit: Arc<AuditSink>) -> Result<Self, McpError> {
        let defaults = ClientSettings::default();
        let settings = ClientSettings {
            call_timeout: config.call_timeout.unwrap_or(defaults.call_timeout),
            init_timeout: config.init_timeout.unwrap_or(defaults.init_timeout),
        };
        Self::with_settings(config.servers.clone(), audit, settings)
    }

    fn slot(&self, name: &str) -> Option<&ProviderSlot> {
        self.index.get(name).map(|&i| &self.providers[i])
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start every unstarted provider, in configuration order.
    ///
    /// An optional provider that fails is logged and skipped. A required one
    /// aborts start-up: providers already started are stopped, the rest are
    /// left unstarted, and its `StartupFailed` error is returned.
    pub async fn start_all(&mut self) -> Result<StartReport, McpError> {
        let mut report = StartReport::default();

        for i in 0..self.providers.len() {
            if self.providers[i].state != ProviderState::Unstarted {
                continue;
            }

            let slot = &mut self.providers[i];
            slot.transition(ProviderState::Starting);
            let transport = transport::for_descriptor(
                &slot.descriptor,
                Arc::clone(&self.audit),
                self.settings.init_timeout,
            );
            let started = Instant::now();

            match transport.start().await {
                Ok(init) => {
                    let info = parse_initialize(&init);
                    tracing::info!(
                        server = %slot.descriptor.name,
                        transport = ?slot.descriptor.kind(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        protocol_version = info.protocol_version.as_deref().unwrap_or("unknown"),
                        server_info = describe_server(&info).as_deref().unwrap_or("unknown"),
                        "provider ready"
                    );
                    slot.transport = Some(transport);
                    slot.initialize_result = Some(init);
                    slot.transition(ProviderState::Ready);
                    report.started.push(slot.descriptor.name.clone());
                }
                Err(e) => {
                    transport.stop().await;
                    slot.failure = Some(e.to_string());
                    slot.transition(ProviderState::Failed);

                    if slot.descriptor.optional {
                        tracing::warn!(
                            server = %slot.descriptor.name,
                            error = %e,
                            "optional provider failed to start, continuing without it"
                        );
                        report.skipped.push((slot.descriptor.name.clone(), e));
                        continue;
                    }

                    tracing::error!(
                        server = %slot.descriptor.name,
                        error = %e,
                        "required provider failed to start, aborting start-up"
                    );
                    self.stop_all().await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            "provider start-up complete"
        );
        Ok(report)
    }

    /// Stop every ready provider. Returns the names stopped; safe to repeat.
    pub async fn stop_all(&mut self) -> Vec<String> {
        let mut stopped = Vec::new();
        for slot in &mut self.providers {
            if slot.state != ProviderState::Ready {
                continue;
            }
            if let Some(transport) = slot.transport.take() {
                transport.stop().await;
            }
            slot.transition(ProviderState::Stopped);
            stopped.push(slot.descriptor.name.clone());
        }
        self.registry.clear();
        if !stopped.is_empty() {
            tracing::info!(count = stopped.len(), servers = ?stopped, "providers stopped");
        }
        stopped
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Call `method` on provider `server` with the configured timeout.
    pub async fn call(
        &self,
        server: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        self.call_with_timeout(server, method, params, None).await
    }

    /// Call with an explicit timeout overriding the provider's default.
    pub async fn call_with_timeout(
        &self,
        server: &str,
        method: &str,
        params: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, McpError> {
        let unavailable = || McpError::ProviderUnavailable {
            name: server.to_string(),
        };
        let slot = self.slot(server).ok_or_else(unavailable)?;
        if slot.state != ProviderState::Ready {
            return Err(unavailable());
        }
        let transport = slot.transport.as_ref().ok_or_else(unavailable)?;

        let timeout = timeout
            .or(slot.descriptor.call_timeout)
            .unwrap_or(self.settings.call_timeout);

        let started = Instant::now();
        let result = transport.call(method, params, timeout).await;
        tracing::debug!(
            server,
            method,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "call finished"
        );
        result
    }

    /// List the tools a provider exposes.
    pub async fn tools_list(&self, server: &str) -> Result<Vec<McpToolDefinition>, McpError> {
        let result = self.call(server, "tools/list", serde_json::json!({})).await?;
        let parsed: ToolsListResult =
            serde_json::from_value(result).map_err(|e| McpError::RemoteError {
                server: server.to_string(),
                code: error_codes::INTERNAL_ERROR,
                message: format!("malformed tools/list result: {e}"),
                data: None,
            })?;
        Ok(parsed.tools)
    }

    /// Invoke a tool through `tools/call`, reporting failure as data.
    ///
    /// A result flagged `isError: true` by the provider counts as a failure.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> ToolCallResult {
        let start = Instant::now();
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        let outcome = self.call(server, "tools/call", params).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let (success, result, error) = match outcome {
            Ok(result) if is_tool_error(&result) => {
                let failure = CallFailure {
                    kind: ErrorKind::RemoteError,
                    code: None,
                    message: tool_error_text(&result),
                };
                (false, Some(result), Some(failure))
            }
            Ok(result) => (true, Some(result), None),
            Err(e) => {
                tracing::warn!(server, tool, error = %e, "tool call failed");
                (false, None, Some(CallFailure::from(&e)))
            }
        };

        ToolCallResult {
            server: server.to_string(),
            tool_name: tool.to_string(),
            success,
            result,
            error,
            execution_time_ms: elapsed,
        }
    }

    /// Invoke a tool by qualified name (`server.tool`).
    ///
    /// Names found in the tool registry resolve to their registered owner;
    /// anything else is split at the first dot.
    pub async fn call_qualified_tool(
        &self,
        qualified: &str,
        arguments: serde_json::Value,
    ) -> ToolCallResult {
        let target = self
            .registry
            .resolve(qualified)
            .or_else(|| qualified.split_once('.'));

        match target {
            Some((server, tool)) => self.call_tool(server, tool, arguments).await,
            None => {
                let err = McpError::ProviderUnavailable {
                    name: qualified.to_string(),
                };
                ToolCallResult {
                    server: String::new(),
                    tool_name: qualified.to_string(),
                    success: false,
                    result: None,
                    error: Some(CallFailure::from(&err)),
                    execution_time_ms: 0,
                }
            }
        }
    }

    /// Rebuild the tool registry from every ready provider.
    ///
    /// A provider whose listing fails is logged and left out. Returns the
    /// number of tools registered.
    pub async fn refresh_tools(&mut self) -> usize {
        let mut registry = ToolRegistry::new();
        for name in self.running_servers() {
            match self.tools_list(&name).await {
                Ok(tools) => {
                    registry.register_server_tools(&name, tools);
                    let count = registry.tools_for_server(&name);
                    tracing::info!(server = %name, count, "registered tools");
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to list tools");
                }
            }
        }
        self.registry = registry;
        self.registry.len()
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn provider_state(&self, name: &str) -> Option<ProviderState> {
        self.slot(name).map(|slot| slot.state)
    }

    /// The `initialize` result a ready provider returned.
    pub fn initialize_result(&self, name: &str) -> Option<&serde_json::Value> {
        self.slot(name).and_then(|slot| slot.initialize_result.as_ref())
    }

    /// Why a provider failed to start, if it did.
    pub fn failure(&self, name: &str) -> Option<&str> {
        self.slot(name).and_then(|slot| slot.failure.as_deref())
    }

    /// Names of ready providers, in configuration order.
    pub fn running_servers(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|slot| slot.state == ProviderState::Ready)
            .map(|slot| slot.descriptor.name.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|slot| ProviderStatus {
                name: slot.descriptor.name.clone(),
                transport: slot.descriptor.kind(),
                state: slot.state,
                optional: slot.descriptor.optional,
                server_info: slot
                    .initialize_result
                    .as_ref()
                    .and_then(|init| describe_server(&parse_initialize(init))),
                error: slot.failure.clone(),
            })
            .collect()
    }

    pub fn audit(&self) -> &Arc<AuditSink> {
        &self.audit
    }

    pub fn settings(&self) -> ClientSettings {
        self.settings
    }
}

/// Typed view of an `initialize` result. Unknown shapes yield the default.
fn parse_initialize(init: &serde_json::Value) -> InitializeResult {
    serde_json::from_value(init.clone()).unwrap_or_default()
}

/// `name version` from the handshake's `serverInfo`.
fn describe_server(info: &InitializeResult) -> Option<String> {
    let server = info.server_info.as_ref()?;
    match (server.name.as_deref(), server.version.as_deref()) {
        (Some(name), Some(version)) => Some(format!("{name} {version}")),
        (Some(name), None) => Some(name.to_string()),
        (None, Some(version)) => Some(format!("unnamed {version}")),
        (None, None) => None,
    }
}

fn is_tool_error(result: &serde_json::Value) -> bool {
    result.get("isError").and_then(|v| v.as_bool()) == Some(true)
}

/// Join the text parts of a `tools/call` content array.
fn tool_error_text(result: &serde_json::Value) -> String {
    let text: Vec<&str> = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();
    if text.is_empty() {
        "tool reported an error".to_string()
    } else {
        text.join("\n")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    /// Mount a minimal MCP provider on a mock HTTP server.
    async fn mock_provider() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(|req: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let id = body["id"].clone();
                let reply = match body["method"].as_str().unwrap_or_default() {
                    "initialize" => serde_json::json!({"result": {"serverInfo": {"name": "mock"}}}),
                    "tools/list" => serde_json::json!({"result": {"tools": [
                        {"name": "echo", "description": "Echo arguments", "inputSchema": {"type": "object"}},
                        {"name": "fail", "description": "Always fails"}
                    ]}}),
                    "tools/call" => match body["params"]["name"].as_str().unwrap_or_default() {
                        "echo" => serde_json::json!({"result": {
                            "content": [{"type": "text", "text": body["params"]["arguments"].to_string()}]
                        }}),
                        "fail" => serde_json::json!({"result": {
                            "isError": true,
                            "content": [{"type": "text", "text": "disk full"}]
                        }}),
                        _ => serde_json::json!({"error": {"code": -32601, "message": "Unknown tool"}}),
                    },
                    _ => serde_json::json!({"error": {"code": -32601, "message": "Method not found"}}),
                };
                let mut envelope = reply;
                envelope["jsonrpc"] = "2.0".into();
                envelope["id"] = id;
                ResponseTemplate::new(200).set_body_json(envelope)
            })
            .mount(&server)
            .await;
        server
    }

    fn fast_settings() -> ClientSettings {
        ClientSettings {
            call_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(2),
        }
    }

    fn client(descriptors: Vec<ProviderDescriptor>) -> McpClient {
        McpClient::with_settings(descriptors, Arc::new(AuditSink::disabled()), fast_settings())
            .unwrap()
    }

    const MISSING_BINARY: &str = "definitely-not-a-real-provider-binary";

    #[test]
    fn test_duplicate_names_rejected() {
        let result = McpClient::new(
            vec![
                ProviderDescriptor::process("fs", &["a"]),
                ProviderDescriptor::process("fs", &["b"]),
            ],
            Arc::new(AuditSink::disabled()),
        );
        assert!(matches!(result, Err(McpError::Config { .. })));
    }

    #[test]
    fn test_default_settings() {
        let settings = ClientSettings::default();
        assert_eq!(settings.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(settings.init_timeout, DEFAULT_INIT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_call_unknown_or_unstarted_is_unavailable() {
        let client = client(vec![ProviderDescriptor::process("fs", &["fs"])]);
        for name in ["fs", "nope"] {
            let err = client
                .call(name, "tools/list", serde_json::json!({}))
                .await
                .unwrap_err();
            assert!(matches!(err, McpError::ProviderUnavailable { .. }));
        }
        assert_eq!(client.provider_state("fs"), Some(ProviderState::Unstarted));
    }

    #[tokio::test]
    async fn test_optional_failure_is_skipped() {
        let mock = mock_provider().await;
        let mut client = client(vec![
            ProviderDescriptor::process("broken", &[MISSING_BINARY]).optional(),
            ProviderDescriptor::http("remote", &mock.uri()),
        ]);

        let report = client.start_all().await.unwrap();
        assert_eq!(report.started, vec!["remote"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "broken");

        assert_eq!(client.provider_state("broken"), Some(ProviderState::Failed));
        assert!(client.failure("broken").is_some());
        assert_eq!(client.running_servers(), vec!["remote"]);
        assert_eq!(
            client.initialize_result("remote").unwrap()["serverInfo"]["name"],
            "mock"
        );
        let statuses = client.statuses();
        assert_eq!(statuses[1].server_info.as_deref(), Some("mock"));
        assert!(statuses[0].server_info.is_none());

        let err = client
            .call("broken", "tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);

        let tools = client.tools_list("remote").await.unwrap();
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn test_required_failure_aborts_start_up() {
        let mock = mock_provider().await;
        let mut client = client(vec![
            ProviderDescriptor::http("first", &mock.uri()),
            ProviderDescriptor::process("required", &[MISSING_BINARY]),
            ProviderDescriptor::http("last", &mock.uri()),
        ]);

        let err = client.start_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StartupError);

        assert_eq!(client.provider_state("first"), Some(ProviderState::Stopped));
        assert_eq!(client.provider_state("required"), Some(ProviderState::Failed));
        assert_eq!(client.provider_state("last"), Some(ProviderState::Unstarted));
        assert!(client.running_servers().is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_reports_failures_as_data() {
        let mock = mock_provider().await;
        let mut client = client(vec![ProviderDescriptor::http("remote", &mock.uri())]);
        client.start_all().await.unwrap();

        let ok = client
            .call_tool("remote", "echo", serde_json::json!({"text": "hi"}))
            .await;
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.server, "remote");

        let flagged = client.call_tool("remote", "fail", serde_json::json!({})).await;
        assert!(!flagged.success);
        assert_eq!(flagged.error.as_ref().unwrap().message, "disk full");

        let unknown = client.call_tool("remote", "nope", serde_json::json!({})).await;
        let failure = unknown.error.unwrap();
        assert_eq!(failure.kind, ErrorKind::RemoteError);
        assert_eq!(failure.code, Some(-32601));
        assert_eq!(failure.message, "Unknown tool");

        let missing = client.call_tool("ghost", "echo", serde_json::json!({})).await;
        assert_eq!(missing.error.unwrap().kind, ErrorKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_refresh_tools_and_qualified_call() {
        let mock = mock_provider().await;
        let mut client = client(vec![ProviderDescriptor::http("remote", &mock.uri())]);
        client.start_all().await.unwrap();

        assert_eq!(client.refresh_tools().await, 2);
        assert_eq!(client.registry.tool_names(), vec!["remote.echo", "remote.fail"]);

        let result = client
            .call_qualified_tool("remote.echo", serde_json::json!({"n": 1}))
            .await;
        assert!(result.success);

        let bad = client.call_qualified_tool("noseparator", serde_json::json!({})).await;
        assert!(!bad.success);
    }

    #[tokio::test]
    async fn test_stop_all_is_idempotent() {
        let mock = mock_provider().await;
        let mut client = client(vec![ProviderDescriptor::http("remote", &mock.uri())]);
        client.start_all().await.unwrap();
        client.refresh_tools().await;

        assert_eq!(client.stop_all().await, vec!["remote"]);
        assert!(client.stop_all().await.is_empty());
        assert!(client.registry.is_empty());
        assert_eq!(client.provider_state("remote"), Some(ProviderState::Stopped));

        let err = client
            .call("remote", "tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ProviderUnavailable { .. }));
    }

    #[test]
    fn test_tool_error_text() {
        let result = serde_json::json!({
            "isError": true,
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        });
        assert!(is_tool_error(&result));
        assert_eq!(tool_error_text(&result), "a\nb");
        assert_eq!(
            tool_error_text(&serde_json::json!({"isError": true})),
            "tool reported an error"
        );
        assert!(!is_tool_error(&serde_json::json!({"content": []})));
    }

    #[test]
    fn test_describe_server_from_initialize_result() {
        let full = parse_initialize(&serde_json::json!({
            "protocolVersion": "2024-08-01",
            "serverInfo": {"name": "fs", "version": "1.2.0"},
        }));
        assert_eq!(full.protocol_version.as_deref(), Some("2024-08-01"));
        assert_eq!(describe_server(&full).as_deref(), Some("fs 1.2.0"));

        let bare = parse_initialize(&serde_json::json!({"capabilities": {}}));
        assert!(describe_server(&bare).is_none());

        let odd = parse_initialize(&serde_json::json!("not an object"));
        assert!(odd.protocol_version.is_none());
    }
}
