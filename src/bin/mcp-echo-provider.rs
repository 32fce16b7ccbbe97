//! Reference MCP provider speaking line-delimited JSON-RPC over stdio.
//!
//! Serves one `echo` tool and a handful of `test/*` methods that misbehave on
//! purpose, so the client can be exercised against a real child process.

use std::io::{BufRead, Write};

use clap::Parser;
use mcp_bridge::mcp_client::codec;
use mcp_bridge::mcp_client::types::{
    error_codes, Envelope, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "mcp-echo-provider", version, about = "Echo MCP provider over stdio")]
struct Args {
    /// Exit with status 1 before reading any request.
    #[arg(long)]
    exit_immediately: bool,
}

/// What to do after handling one request.
enum Action {
    Reply(JsonRpcResponse),
    /// Queue the reply until enough holds are pending, then flush in reverse.
    Hold(JsonRpcResponse, usize),
    /// Write a non-JSON line, then the reply.
    Garble(JsonRpcResponse),
    Ignore,
    Exit,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    mcp_bridge::init_tracing(None, false);

    if args.exit_immediately {
        tracing::warn!("echo provider exiting on request before initialization");
        std::process::exit(1);
    }

    let stdin = std::io::stdin();
    let mut out = std::io::stdout().lock();
    let mut held: Vec<JsonRpcResponse> = Vec::new();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request = match codec::decode(&line) {
            Ok(Envelope::Request(request)) => request,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(reason = %e.reason, "ignoring undecodable line");
                continue;
            }
        };

        match handle(request) {
            Action::Reply(response) => write_response(&mut out, response)?,
            Action::Hold(response, release_after) => {
                held.push(response);
                if held.len() >= release_after {
                    while let Some(response) = held.pop() {
                        write_response(&mut out, response)?;
                    }
                }
            }
            Action::Garble(response) => {
                writeln!(out, "this line is not JSON-RPC")?;
                write_response(&mut out, response)?;
            }
            Action::Ignore => {}
            Action::Exit => break,
        }
    }
    Ok(())
}

fn write_response(out: &mut impl Write, response: JsonRpcResponse) -> std::io::Result<()> {
    out.write_all(codec::encode(&Envelope::Response(response)).as_bytes())?;
    out.flush()
}

fn handle(request: JsonRpcRequest) -> Action {
    let id = request.id;
    let params = request.params;
    match request.method.as_str() {
        "initialize" => Action::Reply(JsonRpcResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mcp-echo-provider", "version": env!("CARGO_PKG_VERSION")},
            }),
        )),
        "tools/list" => Action::Reply(JsonRpcResponse::success(
            id,
            serde_json::json!({"tools": [{
                "name": "echo",
                "description": "Return the call arguments as text.",
                "inputSchema": {"type": "object"},
            }]}),
        )),
        "tools/call" => match params.get("name").and_then(|n| n.as_str()) {
            Some("echo") => {
                let arguments = params.get("arguments").cloned().unwrap_or_default();
                Action::Reply(JsonRpcResponse::success(
                    id,
                    serde_json::json!({
                        "content": [{"type": "text", "text": arguments.to_string()}],
                    }),
                ))
            }
            other => Action::Reply(JsonRpcResponse::failure(
                id,
                error_codes::METHOD_NOT_FOUND,
                &format!("Unknown tool {}", other.unwrap_or("<missing>")),
            )),
        },
        "test/hold" => {
            let release_after = params
                .get("release_after")
                .and_then(|n| n.as_u64())
                .unwrap_or(1)
                .max(1) as usize;
            Action::Hold(JsonRpcResponse::success(id, params), release_after)
        }
        "test/garble" => Action::Garble(JsonRpcResponse::success(id, params)),
        "test/never" => Action::Ignore,
        "test/exit" => Action::Exit,
        method => Action::Reply(JsonRpcResponse::failure(
            id,
            error_codes::METHOD_NOT_FOUND,
            &format!("Method not found: {method}"),
        )),
    }
}
