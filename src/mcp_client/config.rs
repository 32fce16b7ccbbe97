//! Provider configuration file loading.
//!
//! Reads `servers.config.json` (or a `.yaml`/`.yml` equivalent) into an
//! ordered list of [`ProviderDescriptor`]s plus registry-wide settings.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::errors::McpError;
use super::types::{LaunchSpec, ProcessLaunch, ProviderDescriptor};

/// Environment variable naming the config file explicitly.
pub const CONFIG_ENV_VAR: &str = "MCP_BRIDGE_CONFIG";

/// Default config file name looked up by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "servers.config.json";

// ─── File Format ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    servers: Vec<RawServer>,
    call_timeout_ms: Option<u64>,
    init_timeout_ms: Option<u64>,
    audit_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    name: String,
    #[serde(default)]
    transport: RawTransport,
    command: Option<RawCommand>,
    #[serde(default)]
    args: Vec<String>,
    url: Option<String>,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawTransport {
    #[default]
    #[serde(alias = "process")]
    Stdio,
    Http,
}

/// `command` may be an argv list or a program name (with `args` alongside).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Argv(Vec<String>),
    Program(String),
}

// ─── Parsed Config ───────────────────────────────────────────────────────────

/// A validated provider configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Providers in file order.
    pub servers: Vec<ProviderDescriptor>,
    pub call_timeout: Option<Duration>,
    pub init_timeout: Option<Duration>,
    pub audit_dir: Option<PathBuf>,
}

/// Parse config text. `is_yaml` selects YAML over JSON.
pub fn parse_config(content: &str, is_yaml: bool) -> Result<BridgeConfig, McpError> {
    let raw: RawConfig = if is_yaml {
        serde_yaml::from_str(content).map_err(|e| McpError::Config {
            reason: format!("invalid YAML: {e}"),
        })?
    } else {
        serde_json::from_str(content).map_err(|e| McpError::Config {
            reason: format!("invalid JSON: {e}"),
        })?
    };

    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(raw.servers.len());
    for server in raw.servers {
        if server.name.trim().is_empty() {
            return Err(McpError::Config {
                reason: "server entry with empty name".into(),
            });
        }
        if !seen.insert(server.name.clone()) {
            return Err(McpError::Config {
                reason: format!("duplicate server name '{}'", server.name),
            });
        }
        servers.push(descriptor_from_raw(server)?);
    }

    Ok(BridgeConfig {
        servers,
        call_timeout: raw.call_timeout_ms.map(Duration::from_millis),
        init_timeout: raw.init_timeout_ms.map(Duration::from_millis),
        audit_dir: raw.audit_dir,
    })
}

fn descriptor_from_raw(server: RawServer) -> Result<ProviderDescriptor, McpError> {
    let launch = match server.transport {
        RawTransport::Stdio => {
            let mut argv = match server.command {
                Some(RawCommand::Argv(argv)) => argv,
                Some(RawCommand::Program(program)) => vec![program],
                None => Vec::new(),
            };
            argv.extend(server.args);
            let mut launch = ProcessLaunch::from_argv(&argv)
                .filter(|launch| !launch.program.trim().is_empty())
                .ok_or_else(|| McpError::Config {
                    reason: format!("server '{}' has no command", server.name),
                })?;
            launch.env = server.env;
            launch.cwd = server.cwd;
            LaunchSpec::Process(launch)
        }
        RawTransport::Http => {
            let url = server.url.ok_or_else(|| McpError::Config {
                reason: format!("server '{}' uses http transport but has no url", server.name),
            })?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(McpError::Config {
                    reason: format!("server '{}' has unsupported url '{url}'", server.name),
                });
            }
            LaunchSpec::Http { url }
        }
    };

    Ok(ProviderDescriptor {
        name: server.name,
        launch,
        optional: server.optional,
        call_timeout: server.timeout_ms.map(Duration::from_millis),
    })
}

/// Read and validate a config file.
///
/// Relative `cwd` and `audit_dir` values are resolved against the directory
/// containing the file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, McpError> {
    let content = std::fs::read_to_string(path).map_err(|e| McpError::Config {
        reason: format!("cannot read {}: {e}", path.display()),
    })?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );
    let mut config = parse_config(&content, is_yaml)?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for server in &mut config.servers {
        if let LaunchSpec::Process(launch) = &mut server.launch {
            if let Some(cwd) = &launch.cwd {
                if cwd.is_relative() {
                    launch.cwd = Some(base.join(cwd));
                }
            }
        }
    }
    if let Some(dir) = &config.audit_dir {
        if dir.is_relative() {
            config.audit_dir = Some(base.join(dir));
        }
    }

    tracing::info!(
        path = %path.display(),
        count = config.servers.len(),
        servers = ?config.servers.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        "loaded provider config"
    );
    Ok(config)
}

/// Locate the config file.
///
/// Checks [`CONFIG_ENV_VAR`] first, then walks up from `start` looking for
/// `servers.config.json` or `app/host/servers.config.json`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "{CONFIG_ENV_VAR} does not name a file");
    }
    search_upward(start)
}

fn search_upward(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        [
            dir.join(CONFIG_FILE_NAME),
            dir.join("app").join("host").join(CONFIG_FILE_NAME),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
