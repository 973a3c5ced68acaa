//! Long-running monitor: a scan loop driving full reconciliation passes and
//! a watcher loop coalescing index-document edits into debounced commits.
//!
//! Both loops are plain threads woken on an interval; shutdown is a message
//! (or a dropped sender) on a shared crossbeam channel, observed within one
//! poll interval.

use crate::config::Config;
use crate::git;
use crate::github::RepoSource;
use crate::reconcile::Reconciler;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tracks the index documents under a managed root and decides when a burst
/// of edits has gone quiet for long enough to commit.
///
/// Change detection is metadata-only (mtime and size); the commit itself is
/// what preserves content, so a false positive costs one no-op commit check.
pub struct DocumentWatcher {
    paths: Vec<PathBuf>,
    debounce: Duration,
    snapshot: HashMap<PathBuf, DocMeta>,
    deadline: Option<Instant>,
    primed: bool,
}

#[derive(PartialEq)]
struct DocMeta {
    mtime: i64,
    size: u64,
}

impl DocumentWatcher {
    pub fn new(root: &Path, debounce: Duration) -> Self {
        let paths = crate::detect::watch_dirs(root)
            .into_iter()
            .map(|(dir, _)| dir.join("README.md"))
            .collect();
        Self {
            paths,
            debounce,
            snapshot: HashMap::new(),
            deadline: None,
            primed: false,
        }
    }

    /// One poll tick. Returns true when a debounced commit should fire now.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.observe() {
            debug!("index document edited, debounce window restarted");
            self.deadline = Some(now + self.debounce);
        }
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Re-read document metadata, returning whether anything changed since
    /// the previous observation. The first observation only establishes the
    /// baseline; pre-existing state is not an edit.
    fn observe(&mut self) -> bool {
        let mut current = HashMap::new();
        for path in &self.paths {
            if let Ok(meta) = std::fs::metadata(path) {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                current.insert(
                    path.clone(),
                    DocMeta {
                        mtime,
                        size: meta.len(),
                    },
                );
            }
        }

        let changed = self.primed && current != self.snapshot;
        self.snapshot = current;
        self.primed = true;
        changed
    }
}

/// Run the monitor until shutdown. Blocks the calling thread; the watcher
/// loop runs on a spawned thread sharing the shutdown channel.
pub fn run<S: RepoSource>(
    mut reconciler: Reconciler<S>,
    root: &Path,
    config: &Config,
    shutdown: Receiver<()>,
) -> crate::Result<()> {
    let watcher_root = root.to_path_buf();
    let watcher_config = config.clone();
    let watcher_shutdown = shutdown.clone();
    let watcher = std::thread::spawn(move || {
        watch_documents(&watcher_root, &watcher_config, watcher_shutdown);
    });

    info!(
        scan_interval = ?config.scan_interval(),
        "monitor started"
    );

    loop {
        match reconciler.scan_once() {
            Ok(summary) => {
                if !summary.changes.is_empty() || !summary.candidates.is_empty() {
                    info!(
                        candidates = summary.candidates.len(),
                        "reconciliation pass made progress"
                    );
                }
            }
            Err(e) => warn!(error = %e, "reconciliation pass failed"),
        }
        if let Err(e) = reconciler.purge_expired_cache() {
            warn!(error = %e, "cache purge failed");
        }

        if stop_requested(&shutdown, config.scan_interval()) {
            break;
        }
    }

    // The watcher shares the channel and observes the same shutdown.
    if watcher.join().is_err() {
        warn!("document watcher thread panicked");
    }
    info!("monitor stopped");
    Ok(())
}

/// Watcher loop body: poll the index documents and commit after the debounce
/// window closes.
fn watch_documents(root: &Path, config: &Config, shutdown: Receiver<()>) {
    let mut watcher = DocumentWatcher::new(root, config.debounce());
    info!(
        poll_interval = ?config.poll_interval(),
        debounce = ?config.debounce(),
        "document watcher started"
    );

    loop {
        if watcher.poll(Instant::now()) {
            match git::commit_all(root, "Auto-commit: document updates", config.command_timeout())
            {
                Ok(true) => info!("committed coalesced document edits"),
                Ok(false) => debug!("debounce fired with nothing to commit"),
                Err(e) => warn!(error = %e, "document commit failed"),
            }
        }

        if stop_requested(&shutdown, config.poll_interval()) {
            return;
        }
    }
}

/// Wait out one interval, returning early with true when shutdown is
/// signalled. A dropped sender counts as shutdown.
fn stop_requested(shutdown: &Receiver<()>, wait: Duration) -> bool {
    match shutdown.recv_timeout(wait) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_baseline_is_not_an_edit() {
        let dir = TempDir::new().unwrap();
        crate::store::Store::init(dir.path()).unwrap();

        let mut watcher = DocumentWatcher::new(dir.path(), Duration::from_millis(10));
        let now = Instant::now();
        assert!(!watcher.poll(now));
        assert!(!watcher.poll(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_edit_fires_after_quiet_period() {
        let dir = TempDir::new().unwrap();
        crate::store::Store::init(dir.path()).unwrap();
        let doc = dir.path().join("Default").join("README.md");

        let mut watcher = DocumentWatcher::new(dir.path(), Duration::from_secs(5));
        let t0 = Instant::now();
        watcher.poll(t0);

        touch(&doc, "edited once");
        // Inside the window nothing fires.
        assert!(!watcher.poll(t0 + Duration::from_secs(1)));
        assert!(!watcher.poll(t0 + Duration::from_secs(3)));
        // Past the deadline the commit fires exactly once.
        assert!(watcher.poll(t0 + Duration::from_secs(7)));
        assert!(!watcher.poll(t0 + Duration::from_secs(8)));
    }

    #[test]
    fn test_burst_of_edits_coalesces() {
        let dir = TempDir::new().unwrap();
        crate::store::Store::init(dir.path()).unwrap();
        let doc = dir.path().join("Trading").join("README.md");

        let mut watcher = DocumentWatcher::new(dir.path(), Duration::from_secs(5));
        let t0 = Instant::now();
        watcher.poll(t0);

        touch(&doc, "edit one");
        assert!(!watcher.poll(t0 + Duration::from_secs(1)));
        touch(&doc, "edit two, longer");
        // Second edit at t+3 pushes the deadline to t+8.
        assert!(!watcher.poll(t0 + Duration::from_secs(3)));
        assert!(!watcher.poll(t0 + Duration::from_secs(6)));
        assert!(watcher.poll(t0 + Duration::from_secs(9)));
    }

    #[test]
    fn test_stop_requested_on_message_and_disconnect() {
        let (tx, rx) = bounded::<()>(1);
        assert!(!stop_requested(&rx, Duration::from_millis(10)));
        tx.send(()).unwrap();
        assert!(stop_requested(&rx, Duration::from_millis(10)));
        drop(tx);
        assert!(stop_requested(&rx, Duration::from_millis(10)));
    }
}
