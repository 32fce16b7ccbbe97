//! End-to-end scenarios against the `mcp-echo-provider` binary.

use std::sync::Arc;
use std::time::Duration;

use mcp_bridge::mcp_client::audit::{read_records, MessageKind};
use mcp_bridge::mcp_client::{
    AuditSink, ClientSettings, ErrorKind, McpClient, McpError, ProviderDescriptor, ProviderState,
};
use tempfile::TempDir;

const ECHO: &str = env!("CARGO_BIN_EXE_mcp-echo-provider");

fn settings() -> ClientSettings {
    ClientSettings {
        call_timeout: Duration::from_secs(10),
        init_timeout: Duration::from_secs(2),
    }
}

fn echo(name: &str) -> ProviderDescriptor {
    ProviderDescriptor::process(name, &[ECHO])
}

async fn started(descriptors: Vec<ProviderDescriptor>, audit: AuditSink) -> McpClient {
    let mut client = McpClient::with_settings(descriptors, Arc::new(audit), settings()).unwrap();
    client.start_all().await.unwrap();
    client
}

/// A localhost URL nothing is listening on.
fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn test_required_provider_exiting_at_start_aborts_start_up() {
    let mut client = McpClient::with_settings(
        vec![ProviderDescriptor::process(
            "flaky",
            &[ECHO, "--exit-immediately"],
        )],
        Arc::new(AuditSink::disabled()),
        settings(),
    )
    .unwrap();

    let err = client.start_all().await.unwrap_err();
    match &err {
        McpError::StartupFailed { name, .. } => assert_eq!(name, "flaky"),
        other => panic!("expected StartupFailed, got {other:?}"),
    }
    assert_eq!(client.provider_state("flaky"), Some(ProviderState::Failed));
}

#[tokio::test]
async fn test_optional_http_provider_down_required_process_up() {
    let mut client = McpClient::with_settings(
        vec![
            ProviderDescriptor::http("remote-utils", &dead_url()).optional(),
            echo("local"),
        ],
        Arc::new(AuditSink::disabled()),
        settings(),
    )
    .unwrap();

    let report = client.start_all().await.unwrap();
    assert_eq!(report.started, vec!["local"]);
    assert_eq!(report.skipped.len(), 1);

    let tools = client.tools_list("local").await.unwrap();
    assert_eq!(tools[0].name, "echo");

    let err = client
        .call("remote-utils", "tools/list", serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);

    client.stop_all().await;
}

#[tokio::test]
async fn test_concurrent_calls_answered_in_reverse_order() {
    let client = started(vec![echo("local")], AuditSink::disabled()).await;

    let (a, b) = tokio::join!(
        client.call(
            "local",
            "test/hold",
            serde_json::json!({"tag": "A", "release_after": 2})
        ),
        client.call(
            "local",
            "test/hold",
            serde_json::json!({"tag": "B", "release_after": 2})
        ),
    );
    assert_eq!(a.unwrap()["tag"], "A");
    assert_eq!(b.unwrap()["tag"], "B");
}

#[tokio::test]
async fn test_many_concurrent_calls_keep_their_own_replies() {
    let client = started(vec![echo("local")], AuditSink::disabled()).await;

    let calls = (0..50).map(|i| {
        let client = &client;
        async move {
            let result = client
                .call_tool("local", "echo", serde_json::json!({"i": i}))
                .await;
            (i, result)
        }
    });
    for (i, result) in futures::future::join_all(calls).await {
        assert!(result.success, "call {i} failed: {:?}", result.error);
        let text = result.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        let echoed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(echoed["i"], i);
    }
}

#[tokio::test]
async fn test_garbled_output_is_audited_and_call_succeeds() {
    let tmp = TempDir::new().unwrap();
    let client = started(vec![echo("local")], AuditSink::new(tmp.path())).await;

    let result = client
        .call("local", "test/garble", serde_json::json!({"x": 1}))
        .await
        .unwrap();
    assert_eq!(result["x"], 1);

    let records = read_records(&client.audit().current_path().unwrap()).unwrap();
    let garbled: Vec<_> = records
        .iter()
        .filter(|r| r.kind == MessageKind::Garbled)
        .collect();
    assert_eq!(garbled.len(), 1);
    assert!(records.iter().all(|r| r.server == "local"));
}

#[tokio::test]
async fn test_unanswered_call_times_out_and_provider_stays_usable() {
    let client = started(vec![echo("local")], AuditSink::disabled()).await;

    let err = client
        .call_with_timeout(
            "local",
            "test/never",
            serde_json::json!({}),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimeoutError);

    let tools = client.tools_list("local").await.unwrap();
    assert_eq!(tools.len(), 1);
}

#[tokio::test]
async fn test_provider_exit_fails_in_flight_calls() {
    let client = started(vec![echo("local")], AuditSink::disabled()).await;

    let (never, exit) = tokio::join!(
        client.call("local", "test/never", serde_json::json!({})),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.call("local", "test/exit", serde_json::json!({})).await
        }
    );
    assert_eq!(never.unwrap_err().kind(), ErrorKind::TransportClosed);
    assert_eq!(exit.unwrap_err().kind(), ErrorKind::TransportClosed);

    let after = client
        .call("local", "tools/list", serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(after.kind(), ErrorKind::TransportClosed);
}

#[tokio::test]
async fn test_tool_call_failures_are_structured() {
    let client = started(vec![echo("local")], AuditSink::disabled()).await;

    let missing = client
        .call_tool("local", "no_such_tool", serde_json::json!({}))
        .await;
    assert!(!missing.success);
    let failure = missing.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::RemoteError);
    assert_eq!(failure.code, Some(-32601));

    let unknown_method = client
        .call("local", "resources/list", serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(unknown_method.remote_code(), Some(-32601));
}

#[tokio::test]
async fn test_stop_all_twice_and_initialize_result_kept() {
    let mut client = started(vec![echo("a"), echo("b")], AuditSink::disabled()).await;
    assert_eq!(
        client.initialize_result("a").unwrap()["serverInfo"]["name"],
        "mcp-echo-provider"
    );
    assert_eq!(client.refresh_tools().await, 2);
    assert_eq!(client.registry.tool_names(), vec!["a.echo", "b.echo"]);

    assert_eq!(client.stop_all().await, vec!["a", "b"]);
    assert!(client.stop_all().await.is_empty());
    assert_eq!(client.provider_state("a"), Some(ProviderState::Stopped));
}
