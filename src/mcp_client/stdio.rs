//! JSON-RPC over a child process's stdio.
//!
//! One line of JSON per message in each direction. Any number of requests may
//! be outstanding at once: callers register in the [`PendingTable`], queue
//! their line for the writer task, and wait on their own slot while a single
//! background task reads stdout and hands each response to its caller by id.
//!
//! The writer task owns stdin and writes each queued line to completion, so a
//! caller that gives up mid-write never leaves a partial line on the pipe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::audit::{AuditSink, Direction};
use super::codec;
use super::errors::McpError;
use super::lifecycle;
use super::pending::{PendingTable, Resolution};
use super::transport::{extract_result, initialize_params, startup_error, Transport};
use super::types::{
    Envelope, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProcessLaunch, TransportKind,
};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lines queued for the writer task before callers wait for room.
const OUTBOX_CAPACITY: usize = 64;

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a provider process's stdio.
pub struct StdioTransport {
    name: String,
    /// `None` when the streams were supplied directly.
    launch: Option<ProcessLaunch>,
    init_timeout: Duration,
    audit: Arc<AuditSink>,
    pending: Arc<PendingTable>,
    /// Sender half of the writer task's queue. Dropping it closes stdin.
    outbox: StdMutex<Option<mpsc::Sender<String>>>,
    child: Mutex<Option<Child>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl StdioTransport {
    /// A transport that spawns `launch` when started.
    pub fn new(
        name: &str,
        launch: ProcessLaunch,
        audit: Arc<AuditSink>,
        init_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            launch: Some(launch),
            init_timeout,
            audit,
            pending: Arc::new(PendingTable::new(name)),
            outbox: StdMutex::new(None),
            child: Mutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// A transport over already-open streams, reading immediately.
    ///
    /// `start()` on such a transport performs only the handshake. Must be
    /// called from within a tokio runtime.
    pub fn from_streams<R, W>(name: &str, reader: R, writer: W, audit: Arc<AuditSink>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Self {
            name: name.to_string(),
            launch: None,
            init_timeout: super::client::DEFAULT_INIT_TIMEOUT,
            audit,
            pending: Arc::new(PendingTable::new(name)),
            outbox: StdMutex::new(None),
            child: Mutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        };
        transport.spawn_writer(Box::new(writer));
        transport.spawn_reader(reader);
        transport
    }

    /// Bound on the `initialize` handshake.
    pub fn with_init_timeout(mut self, init_timeout: Duration) -> Self {
        self.init_timeout = init_timeout;
        self
    }

    fn spawn_writer(&self, writer: BoxedWriter) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        *self.outbox.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        let handle = tokio::spawn(write_loop(
            self.name.clone(),
            writer,
            rx,
            Arc::clone(&self.pending),
        ));
        self.track(handle);
    }

    fn spawn_reader<R>(&self, reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let handle = tokio::spawn(read_loop(
            self.name.clone(),
            reader,
            Arc::clone(&self.pending),
            Arc::clone(&self.audit),
        ));
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Send a request and wait for its response, at most `timeout`.
    ///
    /// The pending entry is registered before the line is queued so a reply
    /// can never arrive ahead of its entry. The bound covers queueing and the
    /// wait. On timeout the entry is removed and any late reply is discarded
    /// by the read loop.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut slot = self.pending.register(method)?;
        let id = slot.id().clone();
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let envelope = Envelope::Request(request);

        self.audit
            .record_message(&self.name, Direction::Send, &codec::to_value(&envelope));

        let started = Instant::now();
        let exchange = async {
            self.send_line(codec::encode(&envelope)).await?;
            tracing::debug!(server = %self.name, id = %id, method, "request queued");
            slot.wait().await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let oldest = self.pending.oldest();
                tracing::warn!(
                    server = %self.name,
                    id = %id,
                    method,
                    elapsed_ms,
                    outstanding = self.pending.len(),
                    oldest_id = ?oldest.as_ref().map(|(id, _, _)| id.to_string()),
                    oldest_age_ms = ?oldest.as_ref().map(|(_, _, age)| age.as_millis()),
                    "request timed out"
                );
                Err(McpError::Timeout {
                    server: self.name.clone(),
                    method: method.to_string(),
                    elapsed_ms,
                })
            }
        }
    }

    /// Send a notification (no response expected).
    ///
    /// Queueing is bounded by the init timeout.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let envelope = Envelope::Notification(JsonRpcNotification::new(method, params));
        self.audit
            .record_message(&self.name, Direction::Send, &codec::to_value(&envelope));

        let started = Instant::now();
        tokio::time::timeout(self.init_timeout, self.send_line(codec::encode(&envelope)))
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name.clone(),
                method: method.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            })?
    }

    /// Hand a complete line to the writer task.
    async fn send_line(&self, line: String) -> Result<(), McpError> {
        let outbox = self
            .outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let closed = |reason: &str| McpError::TransportClosed {
            server: self.name.clone(),
            reason: reason.to_string(),
        };
        let Some(outbox) = outbox else {
            return Err(closed("transport is not running"));
        };
        outbox
            .send(line)
            .await
            .map_err(|_| closed("stdin writer has stopped"))
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the read side is still open.
    pub fn is_alive(&self) -> bool {
        !self.pending.is_closed() && !self.stopped.load(Ordering::SeqCst)
    }

    async fn spawn_and_attach(&self, launch: &ProcessLaunch) -> Result<(), McpError> {
        let mut child = lifecycle::spawn_process(&self.name, launch)?;

        let missing = |pipe: &str| McpError::StartupFailed {
            name: self.name.clone(),
            reason: format!("no {pipe} handle"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        self.spawn_writer(Box::new(stdin));
        self.spawn_reader(stdout);
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn handshake(&self) -> Result<serde_json::Value, McpError> {
        let response = self
            .request("initialize", initialize_params(), self.init_timeout)
            .await?;
        let result = extract_result(&self.name, response)?;
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Collect stderr from a process that failed its handshake.
    async fn failure_stderr(&self) -> String {
        let stderr = match self.child.lock().await.as_mut() {
            Some(child) => child.stderr.take(),
            None => None,
        };
        lifecycle::read_stderr_on_failure(stderr).await
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn start(&self) -> Result<serde_json::Value, McpError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(McpError::StartupFailed {
                name: self.name.clone(),
                reason: "transport already started".into(),
            });
        }

        if let Some(launch) = &self.launch {
            self.spawn_and_attach(launch).await?;
        }

        match self.handshake().await {
            Ok(result) => {
                if let Some(child) = self.child.lock().await.as_mut() {
                    if let Some(stderr) = child.stderr.take() {
                        self.track(lifecycle::forward_stderr(&self.name, stderr));
                    }
                }
                tracing::info!(server = %self.name, "provider initialized");
                Ok(result)
            }
            Err(e) => {
                let stderr = self.failure_stderr().await;
                self.stop().await;
                let err = startup_error(&self.name, e);
                Err(match err {
                    McpError::StartupFailed { name, reason } => McpError::StartupFailed {
                        name,
                        reason: format!("{reason}{}", lifecycle::format_stderr_suffix(&stderr)),
                    },
                    other => other,
                })
            }
        }
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        let response = self.request(method, params, timeout).await?;
        extract_result(&self.name, response)
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // The writer task closes stdin once its queue drains, which is the
        // provider's cue to exit.
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let child = self.child.lock().await.take();
        if let Some(child) = child {
            lifecycle::terminate(&self.name, child).await;
        }

        let failed = self.pending.close("transport stopped");
        if failed > 0 {
            tracing::debug!(server = %self.name, failed, "failed pending requests on stop");
        }

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        tracing::info!(server = %self.name, "provider stopped");
    }
}

// ─── Write Loop ──────────────────────────────────────────────────────────────

async fn write_loop(
    name: String,
    mut writer: BoxedWriter,
    mut outbox: mpsc::Receiver<String>,
    pending: Arc<PendingTable>,
) {
    while let Some(line) = outbox.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            let reason = format!("failed to write to stdin: {e}");
            let failed = pending.close(&reason);
            tracing::warn!(server = %name, reason = %reason, failed, "provider stdin closed");
            return;
        }
    }

    let _ = writer.shutdown().await;
    tracing::debug!(server = %name, "stdin writer finished");
}

// ─── Read Loop ───────────────────────────────────────────────────────────────

async fn read_loop<R>(name: String, reader: R, pending: Arc<PendingTable>, audit: Arc<AuditSink>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break "provider closed stdout (process may have exited)".to_string(),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                handle_inbound_line(&name, &line, &pending, &audit);
            }
            Err(e) => break format!("failed to read from stdout: {e}"),
        }
    };

    let failed = pending.close(&reason);
    tracing::info!(server = %name, reason = %reason, failed, "provider stream ended");
}

/// Decode one inbound line and route it. Never fails.
fn handle_inbound_line(name: &str, line: &str, pending: &PendingTable, audit: &AuditSink) {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return;
    }

    let envelope = match codec::decode(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            audit.record_garbled(name, line);
            tracing::warn!(server = name, reason = %e.reason, raw = %e.raw, "garbled line from provider");
            return;
        }
    };

    audit.record_message(name, Direction::Recv, &codec::to_value(&envelope));

    match envelope {
        Envelope::Response(response) => {
            let id = response.id.clone();
            match pending.resolve(response) {
                Resolution::Delivered => {}
                Resolution::Unknown => {
                    tracing::warn!(server = name, id = %id, "discarding reply with no pending request");
                }
                Resolution::CallerGone => {
                    tracing::debug!(server = name, id = %id, "caller gone before reply arrived");
                }
            }
        }
        Envelope::Request(req) => {
            tracing::debug!(server = name, method = %req.method, "ignoring provider-initiated request");
        }
        Envelope::Notification(note) => {
            tracing::debug!(server = name, method = %note.method, "provider notification");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::audit::{read_records, MessageKind};
    use tempfile::TempDir;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// The provider's side of a duplex pair.
    struct FakeProvider {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        out: WriteHalf<DuplexStream>,
    }

    impl FakeProvider {
        async fn next_request(&mut self) -> serde_json::Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, line: &str) {
            self.out.write_all(line.as_bytes()).await.unwrap();
            self.out.write_all(b"\n").await.unwrap();
            self.out.flush().await.unwrap();
        }

        async fn reply(&mut self, id: &serde_json::Value, result: serde_json::Value) {
            let line = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result});
            self.send(&line.to_string()).await;
        }
    }

    fn pair(audit: Arc<AuditSink>) -> (Arc<StdioTransport>, FakeProvider) {
        pair_with(audit, 64 * 1024, crate::mcp_client::client::DEFAULT_INIT_TIMEOUT)
    }

    /// A pair whose pipe holds only `buffer` bytes in flight.
    fn pair_with(
        audit: Arc<AuditSink>,
        buffer: usize,
        init_timeout: Duration,
    ) -> (Arc<StdioTransport>, FakeProvider) {
        let (client_side, provider_side) = tokio::io::duplex(buffer);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (provider_read, provider_write) = tokio::io::split(provider_side);
        let transport = Arc::new(
            StdioTransport::from_streams("fake", client_read, client_write, audit)
                .with_init_timeout(init_timeout),
        );
        let provider = FakeProvider {
            lines: BufReader::new(provider_read).lines(),
            out: provider_write,
        };
        (transport, provider)
    }

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_out_of_order_replies_reach_their_callers() {
        let (transport, mut provider) = pair(Arc::new(AuditSink::disabled()));

        let first = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("first", serde_json::json!({}), T).await })
        };
        let req1 = provider.next_request().await;
        let second = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("second", serde_json::json!({}), T).await })
        };
        let req2 = provider.next_request().await;
        assert_eq!(req1["method"], "first");
        assert_eq!(req2["method"], "second");
        assert_ne!(req1["id"], req2["id"]);

        provider.reply(&req2["id"], serde_json::json!("two")).await;
        provider.reply(&req1["id"], serde_json::json!("one")).await;

        assert_eq!(second.await.unwrap().unwrap(), "two");
        assert_eq!(first.await.unwrap().unwrap(), "one");
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_garbled_line_is_audited_and_skipped() {
        let tmp = TempDir::new().unwrap();
        let audit = Arc::new(AuditSink::new(tmp.path()));
        let (transport, mut provider) = pair(Arc::clone(&audit));

        let call = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("tools/list", serde_json::json!({}), T).await })
        };
        let req = provider.next_request().await;
        provider.send("Traceback (most recent call last):").await;
        provider.reply(&req["id"], serde_json::json!({"tools": []})).await;

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"tools": []}));

        let records = read_records(&audit.current_path().unwrap()).unwrap();
        let garbled: Vec<_> = records
            .iter()
            .filter(|r| r.kind == MessageKind::Garbled)
            .collect();
        assert_eq!(garbled.len(), 1);
        assert_eq!(
            garbled[0].raw.as_deref(),
            Some("Traceback (most recent call last):")
        );
        assert!(records
            .iter()
            .any(|r| r.direction == Direction::Send && r.kind == MessageKind::Jsonrpc));
    }

    #[tokio::test]
    async fn test_timeout_then_late_reply_is_discarded() {
        let (transport, mut provider) = pair(Arc::new(AuditSink::disabled()));

        let bound = Duration::from_millis(100);
        let started = Instant::now();
        let err = {
            let t = Arc::clone(&transport);
            let call = tokio::spawn(async move { t.call("slow", serde_json::json!({}), bound).await });
            let req = provider.next_request().await;
            let err = call.await.unwrap().unwrap_err();
            // The reply arrives after the caller has given up.
            provider.reply(&req["id"], serde_json::json!("late")).await;
            err
        };
        assert!(started.elapsed() >= bound);
        match err {
            McpError::Timeout {
                server, elapsed_ms, ..
            } => {
                assert_eq!(server, "fake");
                assert!(elapsed_ms >= 100);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(transport.pending_count(), 0);

        // The connection still works afterwards.
        let next = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("fast", serde_json::json!({}), T).await })
        };
        let req = provider.next_request().await;
        assert_eq!(req["method"], "fast");
        provider.reply(&req["id"], serde_json::json!("ok")).await;
        assert_eq!(next.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_end_of_stream_fails_pending_calls() {
        let (transport, mut provider) = pair(Arc::new(AuditSink::disabled()));

        let call = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("hang", serde_json::json!({}), T).await })
        };
        provider.next_request().await;
        drop(provider);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::TransportClosed { .. }));
        assert!(!transport.is_alive());

        let after = transport.call("again", serde_json::json!({}), T).await;
        assert!(matches!(after, Err(McpError::TransportClosed { .. })));
    }

    #[tokio::test]
    async fn test_remote_error_carries_code_and_message() {
        let (transport, mut provider) = pair(Arc::new(AuditSink::disabled()));

        let call = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("nope", serde_json::json!({}), T).await })
        };
        let req = provider.next_request().await;
        let line = serde_json::json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": {"code": -32601, "message": "Method not found"},
        });
        provider.send(&line.to_string()).await;

        match call.await.unwrap().unwrap_err() {
            McpError::RemoteError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected RemoteError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_over_streams() {
        let (transport, mut provider) = pair(Arc::new(AuditSink::disabled()));

        let start = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.start().await })
        };
        let init = provider.next_request().await;
        assert_eq!(init["method"], "initialize");
        assert_eq!(init["params"]["protocolVersion"], "2024-08-01");
        provider
            .reply(&init["id"], serde_json::json!({"serverInfo": {"name": "fake"}}))
            .await;

        let initialized = provider.next_request().await;
        assert_eq!(initialized["method"], "notifications/initialized");
        assert!(initialized.get("id").is_none());

        let result = start.await.unwrap().unwrap();
        assert_eq!(result["serverInfo"]["name"], "fake");
    }

    #[tokio::test]
    async fn test_stop_twice_is_harmless() {
        let (transport, _provider) = pair(Arc::new(AuditSink::disabled()));
        transport.stop().await;
        transport.stop().await;
        assert!(!transport.is_alive());
        let err = transport.call("x", serde_json::json!({}), T).await.unwrap_err();
        assert!(matches!(err, McpError::TransportClosed { .. }));
    }

    #[tokio::test]
    async fn test_stalled_stdin_does_not_block_past_timeout() {
        let (transport, _provider) = pair_with(Arc::new(AuditSink::disabled()), 1024, T);
        let blob = "x".repeat(8 * 1024);

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            transport.call(
                "tools/call",
                serde_json::json!({"blob": blob}),
                Duration::from_millis(200),
            ),
        )
        .await
        .expect("call must honour its own bound");
        assert!(matches!(outcome, Err(McpError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));

        // Another caller is not held up behind the stuck write.
        let second = tokio::time::timeout(
            Duration::from_secs(3),
            transport.call("ping", serde_json::json!({}), Duration::from_millis(200)),
        )
        .await
        .expect("second call must honour its own bound");
        assert!(matches!(second, Err(McpError::Timeout { .. })));

        tokio::time::timeout(Duration::from_secs(3), transport.stop())
            .await
            .expect("stop must not hang on a stuck write");
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn test_cancelled_large_write_keeps_next_request_intact() {
        let (transport, mut provider) = pair_with(Arc::new(AuditSink::disabled()), 1024, T);
        let blob = "x".repeat(4 * 1024);

        // The provider is not reading yet, so this caller gives up mid-write.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            transport.call("first", serde_json::json!({"blob": blob}), T),
        )
        .await;
        assert!(abandoned.is_err());

        let second = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("second", serde_json::json!({}), T).await })
        };

        let first = provider.next_request().await;
        assert_eq!(first["method"], "first");
        assert_eq!(first["params"]["blob"].as_str().map(str::len), Some(4 * 1024));

        let req = provider.next_request().await;
        assert_eq!(req["method"], "second");
        provider.reply(&req["id"], serde_json::json!("ok")).await;
        assert_eq!(second.await.unwrap().unwrap(), "ok");

        // The abandoned request's entry went with its caller.
        provider.reply(&first["id"], serde_json::json!("late")).await;
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unanswered_handshake_fails_start_within_bound() {
        let bound = Duration::from_millis(150);
        let (transport, mut provider) =
            pair_with(Arc::new(AuditSink::disabled()), 64 * 1024, bound);

        let started = Instant::now();
        let start = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.start().await })
        };
        let init = provider.next_request().await;
        assert_eq!(init["method"], "initialize");

        let err = start.await.unwrap().unwrap_err();
        let elapsed = started.elapsed();
        match &err {
            McpError::StartupFailed { name, reason } => {
                assert_eq!(name, "fake");
                assert!(reason.contains("timed out"), "reason: {reason}");
            }
            other => panic!("expected StartupFailed, got {other:?}"),
        }
        assert!(elapsed >= bound);
        assert!(elapsed < Duration::from_secs(2));
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn test_stop_twice_with_call_in_flight_fails_it_once() {
        let (transport, mut provider) = pair(Arc::new(AuditSink::disabled()));

        let call = {
            let t = Arc::clone(&transport);
            tokio::spawn(async move { t.call("hang", serde_json::json!({}), T).await })
        };
        provider.next_request().await;
        assert_eq!(transport.pending_count(), 1);

        transport.stop().await;
        transport.stop().await;

        match call.await.unwrap().unwrap_err() {
            McpError::TransportClosed { reason, .. } => assert_eq!(reason, "transport stopped"),
            other => panic!("expected TransportClosed, got {other:?}"),
        }
        assert_eq!(transport.pending_count(), 0);
    }
}
