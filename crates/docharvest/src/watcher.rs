//! Download completion detection.
//!
//! Browsers write a download under a temporary name (`*.crdownload`,
//! `*.part`, ...) and rename it into place once it is complete. The watcher
//! snapshots the download directory, then a background observer task polls
//! it and reports the first new entry whose name is not a temporary
//! artifact. The snapshot is taken in [`DownloadWatcher::watch`], so a watch
//! started before the download is triggered cannot miss it.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{HarvestError, HarvestResult};

/// Default interval between two directory scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Temporary names used by common browsers while a download is running.
pub const BROWSER_TEMP_PATTERNS: &[&str] = &[
    "*.crdownload",
    "*.part",
    "*.tmp",
    "*.download",
    ".com.google.Chrome.*",
    ".org.chromium.Chromium.*",
];

/// Shell-style filename patterns (`*` and `?`) naming files to ignore.
#[derive(Debug, Clone)]
pub struct IgnorePatterns {
    globs: Vec<String>,
    compiled: Vec<Regex>,
}

impl IgnorePatterns {
    pub fn new<I, S>(patterns: I) -> HarvestResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut globs = Vec::new();
        let mut compiled = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
                HarvestError::Watcher(format!("invalid ignore pattern {pattern:?}: {e}"))
            })?;
            globs.push(pattern.to_string());
            compiled.push(regex);
        }
        Ok(Self { globs, compiled })
    }

    /// Patterns for the temporary files of common browsers.
    pub fn browser_defaults() -> Self {
        Self::new(BROWSER_TEMP_PATTERNS).expect("built-in patterns are valid")
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(file_name))
    }

    pub fn patterns(&self) -> &[String] {
        &self.globs
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Watches one download directory.
///
/// Cloning shares the handle counters, which is how callers and tests
/// observe that watches never overlap.
#[derive(Debug, Clone)]
pub struct DownloadWatcher {
    directory: PathBuf,
    ignore: IgnorePatterns,
    poll_interval: Duration,
    active: Arc<AtomicUsize>,
    opened: Arc<AtomicU64>,
}

impl DownloadWatcher {
    pub fn new(directory: impl Into<PathBuf>, ignore: IgnorePatterns) -> Self {
        Self {
            directory: directory.into(),
            ignore,
            poll_interval: DEFAULT_POLL_INTERVAL,
            active: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn ignore_patterns(&self) -> &IgnorePatterns {
        &self.ignore
    }

    /// Number of watch handles currently alive.
    pub fn active_handles(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of watches started over the watcher's lifetime.
    pub fn opened_total(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Snapshot the directory and start observing it.
    ///
    /// Must be called before the download is triggered. Entries present
    /// now are never reported.
    pub async fn watch(&self) -> HarvestResult<WatchHandle> {
        let baseline = snapshot(&self.directory).await?;
        let guard = ActiveGuard::acquire(&self.active);
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        let observer = tokio::spawn(observe(
            self.directory.clone(),
            self.ignore.clone(),
            baseline,
            self.poll_interval,
            tx,
        ));
        tracing::debug!(dir = %self.directory.display(), "download watch started");

        Ok(WatchHandle {
            directory: self.directory.clone(),
            started_at: SystemTime::now(),
            completed: rx,
            observer,
            _guard: guard,
        })
    }
}

/// A pending download: one running observation of the directory.
///
/// Dropping the handle stops the observer, so every exit path releases it.
pub struct WatchHandle {
    directory: PathBuf,
    started_at: SystemTime,
    completed: oneshot::Receiver<HarvestResult<String>>,
    observer: JoinHandle<()>,
    _guard: ActiveGuard,
}

impl WatchHandle {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Wait for the completed download and return its file name.
    ///
    /// There is no timeout here: download time depends on size and network.
    pub async fn await_completion(mut self) -> HarvestResult<String> {
        match (&mut self.completed).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Watcher("observer stopped unexpectedly".into())),
        }
    }

    /// [`Self::await_completion`] bounded by a caller-chosen limit.
    pub async fn await_completion_within(self, limit: Duration) -> HarvestResult<String> {
        match tokio::time::timeout(limit, self.await_completion()).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::DownloadNotObserved(limit)),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.observer.abort();
        tracing::trace!(dir = %self.directory.display(), "download watch released");
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn snapshot(directory: &Path) -> HarvestResult<HashSet<OsString>> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(directory).await.map_err(|e| {
        HarvestError::Watcher(format!("cannot read {}: {e}", directory.display()))
    })?;
    while let Some(entry) = entries.next_entry().await? {
        names.insert(entry.file_name());
    }
    Ok(names)
}

async fn observe(
    directory: PathBuf,
    ignore: IgnorePatterns,
    baseline: HashSet<OsString>,
    poll_interval: Duration,
    tx: oneshot::Sender<HarvestResult<String>>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return;
        }
        match scan(&directory, &ignore, &baseline).await {
            Ok(Some(name)) => {
                tracing::debug!(file = %name, "download completed");
                let _ = tx.send(Ok(name));
                return;
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tx.send(Err(HarvestError::Watcher(format!(
                    "scanning {} failed: {e}",
                    directory.display()
                ))));
                return;
            }
        }
    }
}

/// New, non-ignored regular files; the lexicographically first wins.
async fn scan(
    directory: &Path,
    ignore: &IgnorePatterns,
    baseline: &HashSet<OsString>,
) -> std::io::Result<Option<String>> {
    let mut fresh = Vec::new();
    let mut entries = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        let os_name = entry.file_name();
        if baseline.contains(&os_name) {
            continue;
        }
        let Some(name) = os_name.to_str() else {
            continue;
        };
        if ignore.matches(name) {
            tracing::trace!(file = name, "ignoring temporary download artifact");
            continue;
        }
        // The entry may already be gone again (renamed partial file)
        match entry.file_type().await {
            Ok(kind) if kind.is_file() => fresh.push(name.to_string()),
            _ => continue,
        }
    }
    fresh.sort();
    Ok(fresh.into_iter().next())
}
