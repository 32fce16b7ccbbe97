//! mcp-bridge: command-line front end to the provider registry.
//!
//! Every command loads the provider config, starts the registry, runs, and
//! stops all providers before exiting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use mcp_bridge::bench;
use mcp_bridge::mcp_client::{self, AuditSink, McpClient};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Call MCP tool providers over stdio or HTTP
#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Provider config file (default: search for servers.config.json)
    #[arg(short, long, global = true, env = "MCP_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write diagnostics to bridge.log in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Directory for the per-day audit files
    #[arg(long, global = true)]
    audit_dir: Option<PathBuf>,

    /// Disable the audit log
    #[arg(long, global = true)]
    no_audit: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every provider and show its state
    Servers,

    /// List the tools a provider exposes, or every provider's as `server.tool`
    Tools {
        server: Option<String>,
    },

    /// Send a raw JSON-RPC request
    Call {
        server: String,
        method: String,
        /// Request params as JSON
        #[arg(long, default_value = "{}")]
        params: String,
        /// Call timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Invoke a tool through tools/call (`invoke <server> <tool>` or
    /// `invoke <server.tool>`)
    Invoke {
        target: String,
        tool: Option<String>,
        /// Tool arguments as JSON
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Load-test one tool with concurrent calls
    Bench {
        server: String,
        tool: String,
        /// Tool arguments as JSON
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long, default_value_t = 10)]
        concurrency: usize,
        #[arg(long, default_value_t = 200)]
        total: usize,
        /// Also write the report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    mcp_bridge::init_tracing(cli.log_dir.as_deref(), cli.verbose);

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir().context("cannot read current directory")?;
            match mcp_client::find_config_path(&cwd) {
                Some(path) => path,
                None => bail!(
                    "no {} found; pass --config",
                    mcp_client::config::CONFIG_FILE_NAME
                ),
            }
        }
    };
    let config = mcp_client::load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let audit = if cli.no_audit {
        AuditSink::disabled()
    } else {
        let dir = cli
            .audit_dir
            .clone()
            .or_else(|| config.audit_dir.clone())
            .unwrap_or_else(mcp_bridge::default_audit_dir);
        AuditSink::new(dir)
    };

    let mut client = McpClient::from_config(&config, Arc::new(audit))?;
    let report = client
        .start_all()
        .await
        .context("required provider failed to start")?;
    for (name, err) in &report.skipped {
        eprintln!("warning: optional provider '{name}' unavailable: {err}");
    }

    let outcome = run(&mut client, cli.command, cli.json).await;
    client.stop_all().await;
    if !outcome? {
        std::process::exit(2);
    }
    Ok(())
}

/// Run one command. Returns `false` when a tool call reported failure.
async fn run(client: &mut McpClient, command: Commands, json: bool) -> Result<bool> {
    match command {
        Commands::Servers => {
            let statuses = client.statuses();
            if json {
                print_json(&statuses)?;
            } else {
                for status in statuses {
                    let error = status.error.map(|e| format!("  ({e})")).unwrap_or_default();
                    let optional = if status.optional { " optional" } else { "" };
                    let info = status
                        .server_info
                        .map(|info| format!("  [{info}]"))
                        .unwrap_or_default();
                    println!(
                        "{:<24} {:<8} {:<10}{optional}{info}{error}",
                        status.name,
                        format!("{:?}", status.transport).to_lowercase(),
                        status.state,
                    );
                }
            }
        }

        Commands::Tools {
            server: Some(server),
        } => {
            let tools = client.tools_list(&server).await?;
            if json {
                print_json(&tools)?;
            } else {
                for tool in tools {
                    println!("{:<32} {}", tool.name, tool.description);
                }
            }
        }

        Commands::Tools { server: None } => {
            client.refresh_tools().await;
            let listing = client.registry.descriptions();
            if json {
                let listing: Vec<_> = listing
                    .into_iter()
                    .map(|(name, description)| {
                        serde_json::json!({"name": name, "description": description})
                    })
                    .collect();
                print_json(&listing)?;
            } else {
                for (name, description) in listing {
                    println!("{name:<40} {description}");
                }
            }
        }

        Commands::Call {
            server,
            method,
            params,
            timeout_ms,
        } => {
            let params = parse_json("--params", &params)?;
            let timeout = timeout_ms.map(std::time::Duration::from_millis);
            let result = client
                .call_with_timeout(&server, &method, params, timeout)
                .await?;
            print_json(&result)?;
        }

        Commands::Invoke { target, tool, args } => {
            let args = parse_json("--args", &args)?;
            let result = match tool {
                Some(tool) => client.call_tool(&target, &tool, args).await,
                None => {
                    client.refresh_tools().await;
                    client.call_qualified_tool(&target, args).await
                }
            };
            print_json(&result)?;
            return Ok(result.success);
        }

        Commands::Bench {
            server,
            tool,
            args,
            concurrency,
            total,
            report,
        } => {
            let params = serde_json::json!({
                "name": tool,
                "arguments": parse_json("--args", &args)?,
            });
            let load =
                bench::run_load(client, &server, "tools/call", params, concurrency, total).await;
            if let Some(path) = report {
                load.save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            print_json(&load)?;
        }
    }
    Ok(true)
}

fn parse_json(flag: &str, text: &str) -> Result<serde_json::Value> {
    serde_json::from_str(text).with_context(|| format!("{flag} is not valid JSON"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
