pub mod inference;
pub mod loaders;
pub mod parsers;
pub mod prompts;
pub mod runnable;

#[cfg(test)]
mod test_support;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

pub use runnable::{ChainError, Runnable};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "chatchain=info,warn";

/// Log files kept besides the current one.
const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for ChatChain logs.
///
/// - macOS: `~/Library/Application Support/chatchain/`
/// - Windows: `{FOLDERID_RoamingAppData}\chatchain\`
/// - Linux: `$XDG_DATA_HOME/chatchain/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.chatchain/` only if none of the above can be resolved.
pub fn default_log_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("chatchain");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatchain")
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install a human-readable subscriber on stderr.
///
/// A no-op when a global subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Install a JSON-lines subscriber writing to `dir/chatchain.log`.
///
/// Existing logs are rotated first (`chatchain.log` → `.1` → `.2` → `.3`),
/// and every line is flushed as soon as it is written. Returns the path of
/// the fresh log file.
pub fn init_file_tracing(dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let log_path = dir.join("chatchain.log");
    rotate_log_file(&log_path, LOG_FILES_KEPT);

    let writer = FlushingWriter::new(File::options().create(true).append(true).open(&log_path)?);

    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    if subscriber.try_init().is_ok() {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = %log_path.display(),
            "file logging started"
        );
    }
    Ok(log_path)
}

/// `chatchain.log` with generation `n` appended (`chatchain.log.2`).
fn generation_path(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Shift every existing generation up by one and drop the one past `keep`.
/// Gaps in the sequence are fine.
fn rotate_log_file(base: &Path, keep: u32) {
    let _ = std::fs::remove_file(generation_path(base, keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(generation_path(base, n), generation_path(base, n + 1));
    }
    if keep > 0 && base.exists() {
        let _ = std::fs::rename(base, generation_path(base, 1));
    }
}

/// Shared log file that is flushed after each write, so every event is on
/// disk before the next request starts.
#[derive(Clone)]
struct FlushingWriter(Arc<Mutex<File>>);

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self(Arc::new(Mutex::new(file)))
    }

    fn with_file<T>(&self, op: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut file = self
            .0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        op(&mut *file)
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| {
            let written = file.write(buf)?;
            file.flush()?;
            Ok(written)
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

impl<'a> MakeWriter<'a> for FlushingWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_keeps_last_three() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("chatchain.log");
        for generation in ["a", "b", "c", "d", "e"] {
            rotate_log_file(&log, 3);
            std::fs::write(&log, generation).unwrap();
        }

        let read = |n: u32| std::fs::read_to_string(generation_path(&log, n)).unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "e");
        assert_eq!(read(1), "d");
        assert_eq!(read(2), "c");
        assert_eq!(read(3), "b");
        assert!(!dir.path().join("chatchain.log.4").exists());
    }

    #[test]
    fn test_rotate_without_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("chatchain.log");
        rotate_log_file(&log, 3);
        assert!(!log.exists());
        assert!(!dir.path().join("chatchain.log.1").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = File::create(&path).unwrap();

        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"first line\n").unwrap();
        let mut clone = writer.clone();
        clone.write_all(b"second line\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "first line\nsecond line\n"
        );
    }

    #[test]
    fn test_default_log_dir_is_namespaced() {
        let dir = default_log_dir();
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name == "chatchain" || name == ".chatchain");
    }

    #[test]
    fn test_init_file_tracing_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("chatchain.log"), "previous run").unwrap();

        let path = init_file_tracing(&nested).unwrap();
        assert_eq!(path, nested.join("chatchain.log"));
        assert!(path.exists());
        assert_eq!(
            std::fs::read_to_string(generation_path(&path, 1)).unwrap(),
            "previous run"
        );
    }
}
