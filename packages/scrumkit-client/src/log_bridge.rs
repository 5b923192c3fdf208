use env_logger::{Logger, Target};
use log::{Log, Metadata, Record, SetLoggerError};
use scrumkit_core::types::now_ms;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

const MAX_LOG_ENTRIES: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientLogEntry {
    pub timestamp_ms: i64,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl ClientLogEntry {
    /// Warnings and errors are surfaced to the user as dismissible notices.
    pub fn is_notice(&self) -> bool {
        self.level == "warn" || self.level == "error"
    }
}

struct LogHub {
    entries: Mutex<VecDeque<ClientLogEntry>>,
    tx: broadcast::Sender<ClientLogEntry>,
    capacity: usize,
}

impl LogHub {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(512);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            tx,
            capacity,
        }
    }

    fn push(&self, entry: ClientLogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(entry.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }
        let _ = self.tx.send(entry);
    }

    fn recent_entries(&self) -> Vec<ClientLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn recent_notices(&self) -> Vec<ClientLogEntry> {
        self.recent_entries()
            .into_iter()
            .filter(ClientLogEntry::is_notice)
            .collect()
    }

    fn dismiss(&self, timestamp_ms: i64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|e| !(e.is_notice() && e.timestamp_ms <= timestamp_ms));
        }
    }

    fn notices(&self) -> impl Stream<Item = ClientLogEntry> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|entry| entry.ok().filter(ClientLogEntry::is_notice))
    }
}

static LOG_HUB: LazyLock<LogHub> = LazyLock::new(|| LogHub::new(MAX_LOG_ENTRIES));

struct LogFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogFile {
    fn at(path: PathBuf) -> Self {
        let file = Self::open(&path).ok();
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    fn open(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn append_entry(&self, entry: &ClientLogEntry) {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.is_none() {
            match Self::open(&self.path) {
                Ok(file) => *guard = Some(file),
                Err(_) => return,
            }
        }
        if let Some(file) = guard.as_mut() {
            let line = format_log_line(entry);
            let _ = file.write_all(line.as_bytes());
            let _ = file.write_all(b"\n");
            let _ = file.flush();
        }
    }
}

fn default_log_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrumkit")
        .join("logs")
        .join("client.log")
}

static LOG_FILE: LazyLock<LogFile> = LazyLock::new(|| LogFile::at(default_log_path()));

fn format_log_line(entry: &ClientLogEntry) -> String {
    format!(
        "{} [{}] [{}] {}",
        entry.timestamp_ms,
        entry.level.to_uppercase(),
        entry.target,
        entry.message.replace('\n', "\\n")
    )
}

struct BroadcastLogger {
    inner: Logger,
}

impl Log for BroadcastLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let entry = ClientLogEntry {
            timestamp_ms: now_ms(),
            level: record.level().to_string().to_lowercase(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        };

        LOG_HUB.push(entry.clone());
        LOG_FILE.append_entry(&entry);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the logger. `RUST_LOG` filters as usual; defaults to `info` for
/// the `scrumkit` targets and `warn` elsewhere.
pub fn init() -> Result<(), SetLoggerError> {
    let _ = &*LOG_FILE;
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,scrumkit=info"),
    );
    builder.target(Target::Pipe(Box::new(io::sink())));
    let logger = Box::leak(Box::new(BroadcastLogger {
        inner: builder.build(),
    }));
    log::set_logger(logger)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

pub fn recent_entries() -> Vec<ClientLogEntry> {
    LOG_HUB.recent_entries()
}

/// Warnings and errors still waiting to be dismissed, oldest first.
pub fn recent_notices() -> Vec<ClientLogEntry> {
    LOG_HUB.recent_notices()
}

/// Hide every notice logged at or before `timestamp_ms`.
pub fn dismiss_notices(timestamp_ms: i64) {
    LOG_HUB.dismiss(timestamp_ms);
}

pub fn subscribe() -> broadcast::Receiver<ClientLogEntry> {
    LOG_HUB.tx.subscribe()
}

/// Live feed of new notices. Lagged entries are skipped.
pub fn notices() -> impl Stream<Item = ClientLogEntry> {
    LOG_HUB.notices()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64, level: &str, message: &str) -> ClientLogEntry {
        ClientLogEntry {
            timestamp_ms: ts,
            level: level.into(),
            target: "scrumkit.test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let hub = LogHub::new(2);
        hub.push(entry(1, "info", "a"));
        hub.push(entry(2, "info", "b"));
        hub.push(entry(3, "info", "c"));
        let messages: Vec<String> = hub.recent_entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn test_dismiss_only_removes_older_notices() {
        let hub = LogHub::new(10);
        hub.push(entry(1, "warn", "retrying"));
        hub.push(entry(2, "info", "joined"));
        hub.push(entry(3, "error", "gave up"));
        hub.dismiss(2);
        let left: Vec<String> = hub.recent_entries().into_iter().map(|e| e.message).collect();
        assert_eq!(left, vec!["joined", "gave up"]);
    }

    #[test]
    fn test_log_line_is_single_line() {
        let line = format_log_line(&entry(42, "warn", "first\nsecond"));
        assert_eq!(line, "42 [WARN] [scrumkit.test] first\\nsecond");
    }

    #[test]
    fn test_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("client.log");
        let file = LogFile::at(path.clone());
        file.append_entry(&entry(1, "info", "one"));
        file.append_entry(&entry(2, "error", "two"));
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with("[ERROR] [scrumkit.test] two\n"));
    }

    #[tokio::test]
    async fn test_notice_stream_skips_info() {
        let hub = LogHub::new(10);
        let mut stream = Box::pin(hub.notices());
        hub.push(entry(1, "info", "quiet"));
        hub.push(entry(2, "warn", "loud"));
        assert_eq!(stream.next().await.map(|e| e.message), Some("loud".to_string()));
    }

    #[test]
    fn test_process_notices_until_dismissed() {
        let start = now_ms();
        LOG_HUB.push(entry(start, "info", "session joined"));
        LOG_HUB.push(entry(start, "warn", "connection lost, retrying"));

        let pending: Vec<String> = recent_notices().into_iter().map(|e| e.message).collect();
        assert!(pending.contains(&"connection lost, retrying".to_string()));
        assert!(!pending.contains(&"session joined".to_string()));

        dismiss_notices(start);
        assert!(recent_notices().iter().all(|e| e.timestamp_ms > start));
        assert!(recent_entries().iter().any(|e| e.message == "session joined"));
    }
}
