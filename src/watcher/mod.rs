// Watcher module - Restart-on-change for an application's working directory

use crate::error::{Result, VigilError};
use crate::process::Event;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default quiet period before a burst of changes triggers a restart
pub const DEFAULT_WATCH_DELAY: Duration = Duration::from_millis(1000);

/// Longest a burst may defer its restart, in debounce windows
pub const MAX_DEBOUNCE_WINDOWS: u32 = 4;

/// File watching settings for one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Globs relative to the watched root
    pub ignore: Vec<String>,
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ignore: Vec::new(),
            debounce: DEFAULT_WATCH_DELAY,
        }
    }
}

/// Paths under the watched root that never trigger a restart
pub struct IgnoreSet {
    root: PathBuf,
    globs: GlobSet,
    exact: Vec<PathBuf>,
}

impl IgnoreSet {
    /// A pattern matches both the path itself and everything below it, so
    /// `node_modules` ignores the whole directory.
    pub fn new(root: &Path, patterns: &[String], extra: &[PathBuf]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.trim_end_matches('/');
            builder.add(compile(pattern)?);
            builder.add(compile(&format!("{}/**", pattern))?);
        }

        let globs = builder
            .build()
            .map_err(|e| VigilError::WatchError(format!("Invalid ignore patterns: {}", e)))?;

        Ok(Self {
            root: canonical(root),
            globs,
            exact: extra.iter().map(|p| canonical(p)).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.exact.iter().any(|p| p == path) {
            return true;
        }

        match path.strip_prefix(&self.root) {
            Ok(relative) => self.globs.is_match(relative),
            Err(_) => false,
        }
    }
}

fn compile(pattern: &str) -> Result<Glob> {
    Glob::new(pattern).map_err(|e| {
        VigilError::ConfigValidationError(format!("Invalid ignore_watch glob '{}': {}", pattern, e))
    })
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Check ignore globs without touching the filesystem
pub fn validate_patterns(patterns: &[String]) -> Result<()> {
    for pattern in patterns {
        compile(pattern.trim_end_matches('/'))?;
    }
    Ok(())
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watch `root` recursively and deliver one `Event::FilesChanged` per debounced burst.
///
/// `extra_ignores` are exact paths (the application's own log sinks) that must not
/// feed back into restarts. The returned task ends when `cancel` fires.
pub fn spawn(
    root: &Path,
    config: &WatchConfig,
    extra_ignores: &[PathBuf],
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let ignore = IgnoreSet::new(root, &config.ignore, extra_ignores)?;
    let watch_root = ignore.root().to_path_buf();
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();

    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if !is_relevant(&event.kind) {
                    return;
                }
                for path in event.paths {
                    if !ignore.is_ignored(&path) {
                        let _ = raw_tx.send(path);
                    }
                }
            }
            Err(e) => warn!("File watch error: {}", e),
        })
        .map_err(|e| VigilError::WatchError(format!("Failed to create watcher: {}", e)))?;

    watcher
        .watch(&watch_root, RecursiveMode::Recursive)
        .map_err(|e| {
            VigilError::WatchError(format!("Failed to watch {}: {}", watch_root.display(), e))
        })?;

    info!(root = %watch_root.display(), "Watching for file changes");
    let window = config.debounce;

    Ok(tokio::spawn(async move {
        let _watcher = watcher;
        debounce(raw_rx, window, events, cancel).await;
    }))
}

/// Trailing-edge debounce: a change opens a window that every further change
/// extends; when the window closes quietly one `FilesChanged` goes out. A burst
/// is never extended past `MAX_DEBOUNCE_WINDOWS` windows from its first change,
/// so a tree that keeps changing still restarts periodically.
pub async fn debounce(
    mut raw: UnboundedReceiver<PathBuf>,
    window: Duration,
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            path = raw.recv() => path,
        };
        let Some(first) = first else { return };
        debug!(path = %first.display(), "Change detected");

        let deadline = Instant::now() + window * MAX_DEBOUNCE_WINDOWS;
        let mut quiet_at = Instant::now() + window;
        let mut pending = 1usize;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(quiet_at.min(deadline)) => break,
                path = raw.recv() => match path {
                    Some(_) => {
                        pending += 1;
                        quiet_at = Instant::now() + window;
                    }
                    None => break,
                },
            }
        }

        info!(changes = pending, "Files changed, requesting restart");
        if events.send(Event::FilesChanged).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn changed_count(rx: &mut UnboundedReceiver<Event>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, Event::FilesChanged));
            count += 1;
        }
        count
    }

    #[test]
    fn test_ignore_directory_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let set = IgnoreSet::new(&root, &["node_modules".to_string()], &[]).unwrap();

        assert!(set.is_ignored(&root.join("node_modules")));
        assert!(set.is_ignored(&root.join("node_modules/pkg/index.js")));
        assert!(!set.is_ignored(&root.join("src/index.js")));
    }

    #[test]
    fn test_ignore_glob_and_exact_paths() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let sink = root.join("logs/app-out.log");
        let set = IgnoreSet::new(&root, &["*.tmp".to_string()], &[sink.clone()]).unwrap();

        assert!(set.is_ignored(&root.join("scratch.tmp")));
        assert!(set.is_ignored(&root.join("deep/dir/scratch.tmp")));
        assert!(set.is_ignored(&sink));
        assert!(!set.is_ignored(&root.join("logs/other.log")));
        assert!(!set.is_ignored(Path::new("/elsewhere/scratch.txt")));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(validate_patterns(&["src/[".to_string()]).is_err());
        assert!(validate_patterns(&["dist/".to_string(), "**/*.log".to_string()]).is_ok());
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_restart() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce(
            raw_rx,
            Duration::from_millis(100),
            tx,
            cancel.clone(),
        ));

        for n in 0..5 {
            raw_tx.send(PathBuf::from(format!("/w/file{}", n))).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(changed_count(&mut rx), 1);

        raw_tx.send(PathBuf::from("/w/again")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(changed_count(&mut rx), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_continuous_changes_still_restart() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce(
            raw_rx,
            Duration::from_millis(100),
            tx,
            cancel.clone(),
        ));

        // one change every 20ms never leaves a quiet window
        for n in 0..50 {
            raw_tx.send(PathBuf::from(format!("/w/hot{}", n))).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(changed_count(&mut rx) >= 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_reports_changes_but_not_ignored_paths() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("cache")).unwrap();
        let sink = root.join("app.log");
        fs::write(&sink, "").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let config = WatchConfig {
            enabled: true,
            ignore: vec!["cache".to_string()],
            debounce: Duration::from_millis(100),
        };
        let task = spawn(root, &config, &[sink.clone()], tx, cancel.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::write(root.join("cache/blob"), "x").unwrap();
        fs::write(&sink, "line\n").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(changed_count(&mut rx), 0);

        fs::write(root.join("server.js"), "console.log(1)").unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(changed_count(&mut rx), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
