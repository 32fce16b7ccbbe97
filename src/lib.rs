pub mod bench;
pub mod mcp_client;

use std::path::{Path, PathBuf};

/// Return the platform-standard data directory for mcp-bridge.
///
/// - macOS: `~/Library/Application Support/mcp-bridge/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-bridge\`
/// - Linux: `$XDG_DATA_HOME/mcp-bridge/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-bridge/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-bridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-bridge")
}

/// Default directory for the per-day audit files.
pub fn default_audit_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Initialize the tracing subscriber.
///
/// With a `log_dir`, rotates existing logs (bridge.log → bridge.log.1 → … → .3)
/// and writes a fresh `bridge.log` through a line-flushing writer. Without one,
/// or if the file cannot be opened, logs go to stderr. `RUST_LOG` overrides
/// the default filter. Calling this twice is harmless.
pub fn init_tracing(log_dir: Option<&Path>, verbose: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_filter = if verbose {
        "mcp_bridge=debug,info"
    } else {
        "mcp_bridge=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let log_file = log_dir.and_then(|dir| {
        let _ = std::fs::create_dir_all(dir);
        let path = dir.join("bridge.log");
        rotate_log_file(&path, 3);
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => Some((path, file)),
            Err(e) => {
                eprintln!("cannot open {}: {e}; logging to stderr", path.display());
                None
            }
        }
    });

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let log_path = match log_file {
        Some((path, file)) => {
            let _ = builder
                .with_writer(FlushingWriter::new(file))
                .with_ansi(false)
                .try_init();
            Some(path)
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
            None
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_path,
        pid = std::process::id(),
        "=== mcp-bridge starting ==="
    );
}

/// Rotate log files: `bridge.log` → `bridge.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Each log line reaches the disk before the next event, so nothing is lost
/// if a provider takes the whole process down.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotate_log_file_shifts_and_caps() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("bridge.log");
        for generation in 0..5 {
            rotate_log_file(&base, 3);
            std::fs::write(&base, format!("gen {generation}")).unwrap();
        }

        assert_eq!(std::fs::read_to_string(&base).unwrap(), "gen 4");
        let one = tmp.path().join("bridge.log.1");
        let three = tmp.path().join("bridge.log.3");
        assert_eq!(std::fs::read_to_string(one).unwrap(), "gen 3");
        assert_eq!(std::fs::read_to_string(three).unwrap(), "gen 1");
        assert!(!tmp.path().join("bridge.log.4").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        use std::io::Write;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line one\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\n");
    }

    #[test]
    fn test_default_audit_dir_is_under_data_dir() {
        assert!(default_audit_dir().starts_with(data_dir()));
        assert!(default_audit_dir().ends_with("logs"));
    }
}
