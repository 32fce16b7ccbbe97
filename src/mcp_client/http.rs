//! JSON-RPC over HTTP POST.
//!
//! Each call is one self-contained request/response exchange, so there is no
//! pending table and no background reader. Failures of the exchange itself are
//! folded into the same error taxonomy the process transport uses.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::audit::{AuditSink, Direction};
use super::codec;
use super::errors::McpError;
use super::transport::{extract_result, initialize_params, startup_error, Transport};
use super::types::{error_codes, Envelope, JsonRpcRequest, JsonRpcResponse, RequestId, TransportKind};

/// Stateless JSON-RPC transport to a provider reachable at a URL.
pub struct HttpTransport {
    name: String,
    /// The configured URL without trailing slashes, as recorded in the audit log.
    base_url: String,
    /// Where requests are POSTed: `base_url` + `/`.
    endpoint: String,
    init_timeout: Duration,
    audit: Arc<AuditSink>,
    client: Mutex<Option<reqwest::Client>>,
    next_id: AtomicI64,
    stopped: AtomicBool,
}

impl HttpTransport {
    pub fn new(name: &str, url: &str, audit: Arc<AuditSink>, init_timeout: Duration) -> Self {
        let base_url = url.trim_end_matches('/').to_string();
        let endpoint = format!("{base_url}/");
        Self {
            name: name.to_string(),
            base_url,
            endpoint,
            init_timeout,
            audit,
            client: Mutex::new(None),
            next_id: AtomicI64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    /// The URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn http_client(&self) -> Result<reqwest::Client, McpError> {
        let guard = self.client.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or_else(|| McpError::TransportClosed {
            server: self.name.clone(),
            reason: "transport is not running".into(),
        })
    }

    fn remote(&self, code: i64, message: impl Into<String>) -> McpError {
        McpError::RemoteError {
            server: self.name.clone(),
            code,
            message: message.into(),
            data: None,
        }
    }

    /// POST one request and decode the reply envelope.
    async fn exchange(
        &self,
        client: &reqwest::Client,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let body = codec::to_value(&Envelope::Request(JsonRpcRequest::new(
            id.clone(),
            method,
            params,
        )));
        self.audit
            .record_http(&self.name, Direction::Send, &self.base_url, &body);

        let started = Instant::now();
        let send_error = |e: reqwest::Error| {
            if e.is_timeout() {
                McpError::Timeout {
                    server: self.name.clone(),
                    method: method.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                self.remote(
                    error_codes::HTTP_TRANSPORT_ERROR,
                    format!("HTTP request failed: {e}"),
                )
            }
        };

        let response = client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        let status = response.status();
        let text = response.text().await.map_err(send_error)?;

        tracing::debug!(
            server = %self.name,
            id = %id,
            method,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http exchange complete"
        );

        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                self.audit.record_garbled(&self.name, &text);
                tracing::warn!(server = %self.name, status = status.as_u16(), error = %e, "undecodable HTTP response body");
                return Err(if status.is_success() {
                    self.remote(
                        error_codes::PARSE_ERROR,
                        format!("invalid JSON in HTTP response: {e}"),
                    )
                } else {
                    self.remote(i64::from(status.as_u16()), text)
                });
            }
        };
        self.audit
            .record_http(&self.name, Direction::Recv, &self.base_url, &value);

        let response = match codec::from_value(value) {
            Ok(Envelope::Response(response)) => response,
            Ok(_) | Err(_) if !status.is_success() => {
                return Err(self.remote(i64::from(status.as_u16()), text));
            }
            Ok(_) => {
                return Err(self.remote(
                    error_codes::INVALID_REQUEST,
                    "HTTP response is not a JSON-RPC response",
                ))
            }
            Err(reason) => return Err(self.remote(error_codes::PARSE_ERROR, reason)),
        };

        if !status.is_success() && !response.is_error() {
            return Err(self.remote(i64::from(status.as_u16()), text));
        }
        if response.id != id {
            return Err(self.remote(
                error_codes::INTERNAL_ERROR,
                format!("response id {} does not match request id {id}", response.id),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn start(&self) -> Result<serde_json::Value, McpError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(McpError::StartupFailed {
                name: self.name.clone(),
                reason: format!("unsupported URL '{}'", self.base_url),
            });
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.init_timeout)
            .build()
            .map_err(|e| McpError::StartupFailed {
                name: self.name.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let handshake = self
            .exchange(&client, "initialize", initialize_params(), self.init_timeout)
            .await
            .and_then(|response| extract_result(&self.name, response));

        match handshake {
            Ok(result) => {
                *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);
                tracing::info!(server = %self.name, url = %self.base_url, "http provider initialized");
                Ok(result)
            }
            Err(e) => Err(startup_error(&self.name, e)),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        let client = self.http_client()?;
        let response = self.exchange(&client, method, params, timeout).await?;
        extract_result(&self.name, response)
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let had_client = self
            .client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if had_client {
            tracing::info!(server = %self.name, "http provider stopped");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
