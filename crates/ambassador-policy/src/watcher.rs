//! Hot reload of file-backed policies.
//!
//! The watch is placed on the policy file's parent directory rather than the
//! file itself: editors and config management tools usually replace files by
//! renaming a new one over the old, which a watch on the old inode never sees.
//! Events are debounced and turn into a [`PolicySource::reload`] (with a few
//! retries for half-written files) when they name the policy file or when the
//! file now resolves to a different target. The second case covers symlink
//! swaps such as Kubernetes ConfigMap mounts, where only `..data` changes.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::source::PolicySource;

/// Default debounce duration in milliseconds
const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Errors that can occur while starting a policy watch.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Failed to initialize file watcher: {0}")]
    InitFailed(String),

    #[error("Failed to watch path {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    #[error("Policy source is not backed by a file")]
    NotWatchable,
}

/// Configuration for the policy file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period before a burst of file events triggers a reload
    pub debounce: Duration,
    /// Reload attempts per change before giving up
    pub max_retry_attempts: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl WatcherConfig {
    /// Set the debounce duration.
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Set the number of reload attempts per change. Zero is treated as one.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Set the delay between reload attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// A handle to a running policy watch.
///
/// Dropping the handle stops the watch.
pub struct WatcherHandle {
    path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// The watched policy file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the reload loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the watcher and wait for the reload loop to exit.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("path", &self.path)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Directory to watch for `path`.
fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Decides which directory events concern the policy file.
struct ChangeFilter {
    path: PathBuf,
    file_name: Option<OsString>,
    resolved: Option<PathBuf>,
}

impl ChangeFilter {
    fn new(path: PathBuf) -> Self {
        let file_name = path.file_name().map(OsString::from);
        let resolved = resolve_target(&path);
        Self {
            path,
            file_name,
            resolved,
        }
    }

    fn is_relevant<'a>(&mut self, paths: impl IntoIterator<Item = &'a Path>) -> bool {
        let named = paths
            .into_iter()
            .any(|path| path.file_name() == self.file_name.as_deref());

        // A missing target mid-swap keeps the last known one.
        let swapped = match resolve_target(&self.path) {
            Some(current) if self.resolved.as_ref() != Some(&current) => {
                self.resolved = Some(current);
                true
            }
            _ => false,
        };

        named || swapped
    }
}

/// Final target of `path` after following every symlink.
fn resolve_target(path: &Path) -> Option<PathBuf> {
    fs::canonicalize(path).ok()
}

pub(crate) fn spawn(
    source: Arc<PolicySource>,
    path: PathBuf,
    config: WatcherConfig,
) -> Result<WatcherHandle, WatcherError> {
    let dir = watch_dir(&path);
    let mut filter = ChangeFilter::new(path.clone());

    // Any number of pending changes collapse into one reload.
    let (changed_tx, changed_rx) = mpsc::channel::<()>(1);

    let mut debouncer = new_debouncer(config.debounce, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                if filter.is_relevant(events.iter().map(|event| event.path.as_path())) {
                    let _ = changed_tx.try_send(());
                }
            }
            Err(e) => warn!(error = %e, "Policy file watcher error"),
        }
    })
    .map_err(|e| WatcherError::InitFailed(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| WatcherError::WatchFailed {
            path: dir.clone(),
            reason: e.to_string(),
        })?;

    info!(path = %path.display(), "Started watching policy file");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(reload_loop(
        source,
        config,
        debouncer,
        changed_rx,
        shutdown_rx,
    ));

    Ok(WatcherHandle {
        path,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn reload_loop(
    source: Arc<PolicySource>,
    config: WatcherConfig,
    // Held so the OS watch lives as long as the loop.
    _debouncer: Debouncer<RecommendedWatcher>,
    mut changed: mpsc::Receiver<()>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = changed.recv() => {
                if event.is_none() {
                    break;
                }
                debug!("Policy file changed, reloading");
                reload_with_retries(&source, &config).await;
            }
        }
    }

    info!("Policy watcher stopped");
}

async fn reload_with_retries(source: &PolicySource, config: &WatcherConfig) {
    let max_attempts = config.max_retry_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match source.reload() {
            Ok(_) => return,
            Err(e) if attempts >= max_attempts => {
                error!(
                    error = %e,
                    attempts,
                    "Failed to reload policy after max retries, keeping current document"
                );
                return;
            }
            Err(_) => {
                debug!(attempt = attempts, "Retrying policy reload");
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}
