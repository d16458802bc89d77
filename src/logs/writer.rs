use crate::error::{Result, VigilError};
use crate::logs::TimestampFormat;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Which worker stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn tag(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "[OUT]",
            StreamKind::Stderr => "[ERR]",
        }
    }
}

/// Where a worker's output goes and how each line is stamped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSinkConfig {
    pub out_file: PathBuf,
    pub error_file: PathBuf,
    /// Destination for both streams when `combine` is set; falls back to `out_file`
    pub log_file: Option<PathBuf>,
    pub combine: bool,
    pub date_format: TimestampFormat,
    /// Share one set of files between all cluster instances
    pub merge: bool,
}

impl LogSinkConfig {
    pub fn combined_path(&self) -> &Path {
        self.log_file.as_deref().unwrap_or(&self.out_file)
    }

    /// Resolve the (stdout, stderr) file paths for an instance.
    ///
    /// `ordinal` is `Some` only when instances get their own files.
    pub fn paths_for(&self, ordinal: Option<usize>) -> (PathBuf, PathBuf) {
        let (out, err) = if self.combine {
            (self.combined_path(), self.combined_path())
        } else {
            (self.out_file.as_path(), self.error_file.as_path())
        };

        match ordinal {
            Some(n) => (instance_path(out, n), instance_path(err, n)),
            None => (out.to_path_buf(), err.to_path_buf()),
        }
    }
}

/// `logs/out.log` → `logs/out-2.log`
pub fn instance_path(path: &Path, ordinal: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, ordinal, ext.to_string_lossy()),
        None => format!("{}-{}", stem, ordinal),
    };
    path.with_file_name(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(_metadata: &std::fs::Metadata) -> Self {
        Self { dev: 0, ino: 0 }
    }
}

struct SinkState {
    file: Option<File>,
    identity: Option<FileIdentity>,
    degraded: bool,
}

/// An append-only log file shared by every writer that targets the same path.
///
/// Each line is written with a single `write_all` under the sink's lock, so lines
/// from concurrent pumps never interleave. The file stays open across worker
/// restarts and is reopened when its on-disk identity changes (deleted or
/// replaced by an external rotation).
pub struct LogSink {
    path: PathBuf,
    format: TimestampFormat,
    state: Mutex<SinkState>,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>, format: TimestampFormat) -> Self {
        Self {
            path: path.into(),
            format,
            state: Mutex::new(SinkState {
                file: None,
                identity: None,
                degraded: false,
            }),
        }
    }

    /// Create a sink and open its file now; failures are logged, not returned.
    pub async fn open(path: impl Into<PathBuf>, format: TimestampFormat) -> Arc<Self> {
        let sink = Arc::new(Self::new(path, format));
        {
            let mut state = sink.state.lock().await;
            if let Err(e) = sink.ensure_current(&mut state).await {
                warn!(path = %sink.path.display(), "Log sink unavailable: {}", e);
                state.degraded = true;
            }
        }
        sink
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line. Never fails: sink errors go to tracing.
    pub async fn write_line(&self, tag: Option<StreamKind>, line: &[u8]) {
        let mut state = self.state.lock().await;

        if let Err(e) = self.ensure_current(&mut state).await {
            if !state.degraded {
                warn!(path = %self.path.display(), "Log sink unavailable: {}", e);
                state.degraded = true;
            }
            return;
        }

        let entry = self.format_entry(tag, line);
        let result = match state.file.as_mut() {
            Some(file) => match file.write_all(&entry).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            },
            None => return,
        };

        match result {
            Ok(()) => {
                if state.degraded {
                    info!(path = %self.path.display(), "Log sink recovered");
                    state.degraded = false;
                }
            }
            Err(e) => {
                if !state.degraded {
                    warn!(path = %self.path.display(), "Failed to write log line: {}", e);
                    state.degraded = true;
                }
                state.file = None;
            }
        }
    }

    fn format_entry(&self, tag: Option<StreamKind>, line: &[u8]) -> Vec<u8> {
        let content = line
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(line);
        let timestamp = self.format.render(&Local::now());

        let mut entry = Vec::with_capacity(timestamp.len() + content.len() + 10);
        entry.push(b'[');
        entry.extend_from_slice(timestamp.as_bytes());
        entry.extend_from_slice(b"] ");
        if let Some(tag) = tag {
            entry.extend_from_slice(tag.tag().as_bytes());
            entry.push(b' ');
        }
        entry.extend_from_slice(content);
        entry.push(b'\n');
        entry
    }

    async fn ensure_current(&self, state: &mut SinkState) -> Result<()> {
        if state.file.is_some() {
            let on_disk = tokio::fs::metadata(&self.path)
                .await
                .ok()
                .map(|m| FileIdentity::of(&m));

            if on_disk.is_some() && on_disk == state.identity {
                return Ok(());
            }

            info!(path = %self.path.display(), "Log file was rotated, reopening");
            state.file = None;
            state.identity = None;
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    VigilError::LogSinkError(format!(
                        "Failed to create log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                VigilError::LogSinkError(format!(
                    "Failed to open {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        let metadata = file.metadata().await?;
        debug!(path = %self.path.display(), "Opened log sink");
        state.identity = Some(FileIdentity::of(&metadata));
        state.file = Some(file);
        Ok(())
    }
}

/// The pair of sinks one worker instance writes to
#[derive(Clone)]
pub struct SinkSet {
    stdout: Arc<LogSink>,
    stderr: Arc<LogSink>,
    combined: bool,
}

impl SinkSet {
    /// Open the sinks for an instance. In combined mode both streams share one sink.
    pub async fn open(config: &LogSinkConfig, ordinal: Option<usize>) -> Self {
        let (out_path, err_path) = config.paths_for(ordinal);
        let stdout = LogSink::open(out_path, config.date_format.clone()).await;
        let stderr = if config.combine {
            Arc::clone(&stdout)
        } else {
            LogSink::open(err_path, config.date_format.clone()).await
        };

        Self {
            stdout,
            stderr,
            combined: config.combine,
        }
    }

    pub async fn write(&self, stream: StreamKind, line: &[u8]) {
        match stream {
            StreamKind::Stdout if self.combined => self.stdout.write_line(Some(stream), line).await,
            StreamKind::Stdout => self.stdout.write_line(None, line).await,
            StreamKind::Stderr if self.combined => self.stderr.write_line(Some(stream), line).await,
            StreamKind::Stderr => self.stderr.write_line(None, line).await,
        }
    }

    pub fn stdout_path(&self) -> &Path {
        self.stdout.path()
    }

    pub fn stderr_path(&self) -> &Path {
        self.stderr.path()
    }

    /// Distinct file paths behind this set
    pub fn paths(&self) -> Vec<PathBuf> {
        if self.combined {
            vec![self.stdout.path().to_path_buf()]
        } else {
            vec![
                self.stdout.path().to_path_buf(),
                self.stderr.path().to_path_buf(),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sink_config(dir: &Path, combine: bool) -> LogSinkConfig {
        LogSinkConfig {
            out_file: dir.join("out.log"),
            error_file: dir.join("error.log"),
            log_file: None,
            combine,
            date_format: TimestampFormat::default(),
            merge: false,
        }
    }

    #[test]
    fn test_instance_path() {
        assert_eq!(
            instance_path(Path::new("/var/log/app/out.log"), 2),
            PathBuf::from("/var/log/app/out-2.log")
        );
        assert_eq!(
            instance_path(Path::new("logs/out"), 0),
            PathBuf::from("logs/out-0")
        );
    }

    #[test]
    fn test_paths_for_combined_uses_log_file() {
        let mut config = sink_config(Path::new("/tmp/x"), true);
        config.log_file = Some(PathBuf::from("/tmp/x/all.log"));
        let (out, err) = config.paths_for(None);
        assert_eq!(out, PathBuf::from("/tmp/x/all.log"));
        assert_eq!(out, err);
    }

    #[tokio::test]
    async fn test_separate_sinks_have_no_tags() {
        let temp_dir = TempDir::new().unwrap();
        let sinks = SinkSet::open(&sink_config(temp_dir.path(), false), None).await;

        sinks.write(StreamKind::Stdout, b"hello\n").await;
        sinks.write(StreamKind::Stderr, b"oops").await;

        let out = std::fs::read_to_string(sinks.stdout_path()).unwrap();
        let err = std::fs::read_to_string(sinks.stderr_path()).unwrap();
        assert!(out.starts_with('['));
        assert!(out.ends_with("] hello\n"));
        assert!(err.ends_with("] oops\n"));
        assert!(!out.contains("[OUT]"));
    }

    #[tokio::test]
    async fn test_combined_sink_keeps_order_and_tags() {
        let temp_dir = TempDir::new().unwrap();
        let sinks = SinkSet::open(&sink_config(temp_dir.path(), true), None).await;

        sinks.write(StreamKind::Stdout, b"A\n").await;
        sinks.write(StreamKind::Stderr, b"B\n").await;

        let content = std::fs::read_to_string(temp_dir.path().join("out.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[OUT] A"));
        assert!(lines[1].ends_with("[ERR] B"));
        assert!(!temp_dir.path().join("error.log").exists());
    }

    #[tokio::test]
    async fn test_reopens_after_external_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rotating.log");
        let sink = LogSink::open(&path, TimestampFormat::default()).await;

        sink.write_line(None, b"before").await;
        std::fs::rename(&path, temp_dir.path().join("rotating.log.1")).unwrap();
        sink.write_line(None, b"after").await;

        let current = std::fs::read_to_string(&path).unwrap();
        let rotated = std::fs::read_to_string(temp_dir.path().join("rotating.log.1")).unwrap();
        assert!(current.contains("after"));
        assert!(!current.contains("before"));
        assert!(rotated.contains("before"));
    }

    #[tokio::test]
    async fn test_creates_missing_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/deeper/out.log");
        let sink = LogSink::open(&path, TimestampFormat::default()).await;

        sink.write_line(None, b"line").await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unwritable_sink_does_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // Parent is a regular file, so the sink can never open.
        let sink = LogSink::open(blocker.join("out.log"), TimestampFormat::default()).await;
        sink.write_line(None, b"dropped").await;
        sink.write_line(None, b"dropped again").await;
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let temp_dir = TempDir::new().unwrap();
        let sink = LogSink::open(temp_dir.path().join("shared.log"), TimestampFormat::default()).await;

        let mut handles = Vec::new();
        for writer in 0..4 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                for n in 0..50 {
                    let line = format!("writer-{}-line-{}-{}", writer, n, "x".repeat(200));
                    sink.write_line(None, line.as_bytes()).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(temp_dir.path().join("shared.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            assert!(line.starts_with('['));
            assert!(line.ends_with(&"x".repeat(200)));
        }
    }
}
