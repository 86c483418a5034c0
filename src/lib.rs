pub mod agent_core;
pub mod host;
pub mod inference;
pub mod mcp_client;
pub mod mcp_server;
pub mod protocol;

use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

/// Return the platform-standard data directory for Facade Relay.
///
/// - macOS: `~/Library/Application Support/facade-relay/`
/// - Windows: `{FOLDERID_RoamingAppData}\facade-relay\`
/// - Linux: `$XDG_DATA_HOME/facade-relay/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.facade-relay/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("facade-relay");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".facade-relay")
}

/// Initialize the tracing subscriber for one process.
///
/// Logs go to stderr and to `<data dir>/logs/<component>.log`; stdout is
/// left alone because it carries protocol frames (servers) or answers (host).
/// The previous logs of the same component are rotated, keeping 3.
pub fn init_tracing(component: &str) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let log_path = log_dir.join(format!("{component}.log"));

    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    let (writer, file_error) = match log_file {
        Ok(file) => (
            BoxMakeWriter::new(FlushingWriter::new(file).and(std::io::stderr)),
            None,
        ),
        Err(e) => (BoxMakeWriter::new(std::io::stderr), Some(e)),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("facade_relay=info,warn"));

    let _ = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();

    if let Some(e) = file_error {
        tracing::warn!(path = %log_path.display(), error = %e, "log file unavailable, logging to stderr only");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        component,
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Facade Relay starting ==="
    );
}

/// Rotate log files: `x.log` → `x.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
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
/// A tool server is usually killed rather than asked to exit, so anything
/// left in a buffer would be lost.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_keeps_generations() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("host.log");
        for generation in 0..5 {
            std::fs::write(&base, format!("run {generation}")).unwrap();
            rotate_log_file(&base, 3);
        }

        assert!(!base.exists());
        let read = |suffix: u32| std::fs::read_to_string(format!("{}.{suffix}", base.display())).unwrap();
        assert_eq!(read(1), "run 4");
        assert_eq!(read(2), "run 3");
        assert_eq!(read(3), "run 2");
        assert!(!std::path::Path::new(&format!("{}.4", base.display())).exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        use std::io::Write;
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = FlushingWriter::new(file.reopen().unwrap());
        writer.write_all(b"line\n").unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "line\n");
    }
}
