//! Local change watching and quiescence tracking
//!
//! Provides a [`FileWatcher`] that wraps the `notify` crate to monitor a sync
//! root recursively. Rather than queueing individual events, it records the
//! instant of the most recent relevant change on a `tokio::sync::watch`
//! channel. The sync cycle only needs to know *when* the tree last moved:
//! it waits until that instant is one sync interval in the past before
//! taking a snapshot, and the local adapter reuses its cached snapshot when
//! nothing changed since it was taken.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  FileWatcher  ──→  watch::Sender<Option<Instant>>  ──→  ChangeClock (per pair)
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

// ============================================================================
// ChangeClock
// ============================================================================

/// Read side of the last-change instant of one sync root
///
/// `None` means no relevant change has been observed since the watcher
/// started.
#[derive(Debug, Clone)]
pub struct ChangeClock {
    rx: watch::Receiver<Option<Instant>>,
}

/// Write side of a [`ChangeClock`]
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: watch::Sender<Option<Instant>>,
}

impl ChangeNotifier {
    /// Records a change observed now
    pub fn touch(&self) {
        self.tx.send_replace(Some(Instant::now()));
    }
}

impl ChangeClock {
    /// Creates a connected notifier/clock pair with no change recorded
    pub fn channel() -> (ChangeNotifier, ChangeClock) {
        let (tx, rx) = watch::channel(None);
        (ChangeNotifier { tx }, ChangeClock { rx })
    }

    /// Instant of the most recent observed change
    pub fn last_change(&self) -> Option<Instant> {
        *self.rx.borrow()
    }

    /// Returns once no change has been observed for `period`
    ///
    /// Sleeps until the quiet deadline of the latest change, waking early
    /// only when a newer change arrives; there is no polling interval.
    pub async fn wait_for_quiet(&mut self, period: Duration) {
        loop {
            let last = *self.rx.borrow_and_update();
            let Some(last) = last else {
                return;
            };

            let deadline = last + period;
            if Instant::now() >= deadline {
                return;
            }

            trace!(
                remaining_ms = (deadline - Instant::now()).as_millis() as u64,
                "Waiting for local quiescence"
            );
            match tokio::time::timeout_at(deadline, self.rx.changed()).await {
                // Quiet for the whole period
                Err(_) => return,
                // A newer change moved the deadline
                Ok(Ok(())) => continue,
                // Watcher gone: nothing can extend the deadline anymore
                Ok(Err(_)) => {
                    tokio::time::sleep_until(deadline).await;
                    return;
                }
            }
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches a sync root for changes using the OS-native mechanism
///
/// On Linux this uses inotify. Changes below the local trash directory and
/// pure access events are ignored. Dropping the watcher stops watching; the
/// associated [`ChangeClock`] then keeps its last value forever.
///
/// ## Usage
///
/// ```ignore
/// let (watcher, clock) = FileWatcher::start(Path::new("/home/user/Sync"), ".nimbus-trash")?;
/// clock.clone().wait_for_quiet(Duration::from_secs(5)).await;
/// drop(watcher); // stops watching
/// ```
pub struct FileWatcher {
    /// The underlying notify watcher instance
    _watcher: RecommendedWatcher,
    /// The watched sync root
    root: PathBuf,
}

impl FileWatcher {
    /// Starts watching `root` recursively
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the path
    /// cannot be watched (missing directory, inotify watch limit reached)
    pub fn start(root: &Path, trash_dir: &str) -> Result<(Self, ChangeClock)> {
        let (notifier, clock) = ChangeClock::channel();
        let trash = root.join(trash_dir);

        info!(root = %root.display(), "Starting recursive watch");

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if is_relevant(&event, &trash) {
                        trace!(kind = ?event.kind, paths = ?event.paths, "Local change observed");
                        notifier.touch();
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", root.display()))?;

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            clock,
        ))
    }

    /// Returns the watched sync root
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        debug!(root = %self.root.display(), "Stopping watch");
    }
}

// ============================================================================
// Event filtering
// ============================================================================

/// Returns true when `event` touches at least one path outside the trash
///
/// Access events (open/read/close without write) never change a snapshot
/// and are ignored.
fn is_relevant(event: &notify::Event, trash: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.is_empty() || event.paths.iter().any(|p| !p.starts_with(trash))
}

// ============================================================================
// Tests
// ============================================================================
