//! Debounced change coordinator
//!
//! Turns raw OS file notifications into a bounded stream of coalesced
//! [`ChangeEvent`]s, plus a separate error-report channel. Three concerns
//! live here:
//!
//! - **Debounce**: every Create/Modify notification for a path restarts a
//!   per-path timer; when the timer fires without being reset exactly one
//!   event (last-write-wins) is emitted. A Delete short-circuits past the
//!   timer and is emitted immediately. This collapses editor write bursts
//!   into one event.
//! - **Recursive registration**: the subtree is walked once and a watch is
//!   armed on every directory found. Content changes surface as
//!   notifications on paths inside watched directories.
//! - **Periodic full scan**: on a longer interval, all watched directories
//!   are walked and one `Scan` event is emitted per file. Scan events only
//!   trigger catalog reconciliation downstream; directories created after
//!   registration are picked up this way.
//!
//! The debounce-timer map has its own lock, distinct from the
//! watched-directory set's lock; the two are touched by different tasks at
//! different rates. Everything stops on one shared cancellation token;
//! timers still pending at shutdown are aborted.

use crate::error::Result;
use crate::types::{ChangeEvent, ChangeKind, WatchConfig};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

/// Raw operation extracted from an OS notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawOp {
    Create,
    Modify,
    Delete,
}

/// Debounced filesystem change coordinator
pub struct ChangeCoordinator {
    inner: Arc<CoordinatorInner>,
    // Held so the OS watch stays alive; dropped on shutdown.
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    distribution_task: Mutex<Option<JoinHandle<()>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

struct CoordinatorInner {
    root: PathBuf,
    config: WatchConfig,
    watched_dirs: RwLock<HashSet<PathBuf>>,
    debouncers: Mutex<HashMap<PathBuf, DebounceEntry>>,
    event_tx: mpsc::Sender<ChangeEvent>,
    shutdown: CancellationToken,
}

struct DebounceEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

impl ChangeCoordinator {
    /// Arm watches over `root` and start the coordinator's loops
    ///
    /// Returns the coordinator plus the change-event and error receivers.
    /// The event channel is bounded; producers block when the consumer
    /// falls behind, bounding memory under event storms.
    pub fn spawn(
        root: &Path,
        config: WatchConfig,
    ) -> Result<(
        Self,
        mpsc::Receiver<ChangeEvent>,
        mpsc::Receiver<notify::Error>,
    )> {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (error_tx, error_rx) = mpsc::channel(config.error_capacity);
        let (raw_tx, raw_rx) = mpsc::channel::<Event>(config.event_capacity);

        let inner = Arc::new(CoordinatorInner {
            root: root.to_path_buf(),
            config,
            watched_dirs: RwLock::new(HashSet::new()),
            debouncers: Mutex::new(HashMap::new()),
            event_tx,
            shutdown: CancellationToken::new(),
        });

        // The notify callback runs on the backend's own thread; it only
        // forwards into channels consumed by the tokio tasks.
        let callback_raw_tx = raw_tx.clone();
        let callback_error_tx = error_tx.clone();
        let watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    trace!(?event, "raw notification");
                    if callback_raw_tx.blocking_send(event).is_err() {
                        debug!("raw event channel closed, dropping notification");
                    }
                }
                Err(e) => {
                    error!(error = %e, "notification source error");
                    let _ = callback_error_tx.try_send(e);
                }
            })?;

        let coordinator = ChangeCoordinator {
            inner: Arc::clone(&inner),
            watcher: Mutex::new(Some(watcher)),
            distribution_task: Mutex::new(None),
            scan_task: Mutex::new(None),
        };

        coordinator.arm_subtree(root)?;

        let distribution = tokio::spawn(Arc::clone(&inner).distribution_loop(raw_rx));
        let scan = tokio::spawn(Arc::clone(&inner).periodic_scan_loop());
        *coordinator.distribution_task.lock() = Some(distribution);
        *coordinator.scan_task.lock() = Some(scan);

        info!(root = %root.display(), "change coordinator started");
        Ok((coordinator, event_rx, error_rx))
    }

    /// Walk a subtree and arm a watch on every directory found
    ///
    /// A walk error for one subtree is logged and skipped, not fatal.
    fn arm_subtree(&self, path: &Path) -> Result<()> {
        let mut watcher_guard = self.watcher.lock();
        let watcher = match watcher_guard.as_mut() {
            Some(w) => w,
            None => return Ok(()), // already shut down
        };

        let mut armed = 0usize;
        for entry in WalkDir::new(path) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unwalkable subtree");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path().to_path_buf();
            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                warn!(dir = %dir.display(), error = %e, "failed to arm watch");
                continue;
            }
            debug!(dir = %dir.display(), "watching directory");
            self.inner.watched_dirs.write().insert(dir);
            armed += 1;
        }

        info!(directories = armed, "armed watches under {}", path.display());
        Ok(())
    }

    /// Stop both loops, abandon pending debounce timers, and close the
    /// OS-level watch
    pub async fn shutdown(self) {
        info!("change coordinator shutting down");
        self.inner.shutdown.cancel();

        {
            let mut debouncers = self.inner.debouncers.lock();
            for (_, entry) in debouncers.drain() {
                entry.handle.abort();
            }
        }

        // Dropping the watcher closes the underlying OS watch.
        self.watcher.lock().take();

        let tasks = [
            self.distribution_task.lock().take(),
            self.scan_task.lock().take(),
        ];
        for task in tasks.into_iter().flatten() {
            let _ = task.await;
        }
    }
}

impl CoordinatorInner {
    /// Consume raw notifications until shutdown
    async fn distribution_loop(self: Arc<Self>, mut raw_rx: mpsc::Receiver<Event>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = raw_rx.recv() => match event {
                    Some(event) => self.process_notification(event).await,
                    None => break,
                },
            }
        }
        debug!("distribution loop stopped");
    }

    /// Classify one raw notification and route each affected path
    async fn process_notification(self: &Arc<Self>, event: Event) {
        let op = match event.kind {
            EventKind::Create(_) => RawOp::Create,
            EventKind::Modify(_) => RawOp::Modify,
            EventKind::Remove(_) => RawOp::Delete,
            _ => return, // unrecognized flags are ignored
        };

        for path in event.paths {
            let rel = match path.strip_prefix(&self.root) {
                Ok(p) => p.to_path_buf(),
                Err(_) => {
                    trace!(path = %path.display(), "notification outside root, ignoring");
                    continue;
                }
            };
            self.route(rel, op).await;
        }
    }

    /// Apply debounce rules for one path
    async fn route(self: &Arc<Self>, path: PathBuf, op: RawOp) {
        if op == RawOp::Delete {
            // Terminal: cancel any pending timer and emit immediately.
            if let Some(entry) = self.debouncers.lock().remove(&path) {
                entry.handle.abort();
            }
            self.emit(ChangeEvent::now(path, ChangeKind::Delete)).await;
            return;
        }

        let kind = match op {
            RawOp::Create => ChangeKind::Create,
            _ => ChangeKind::Modify,
        };

        let mut debouncers = self.debouncers.lock();
        let generation = debouncers
            .get(&path)
            .map(|e| e.generation + 1)
            .unwrap_or(0);
        if let Some(previous) = debouncers.remove(&path) {
            previous.handle.abort();
        }

        let this = Arc::clone(self);
        let timer_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.config.debounce).await;

            // Remove our own entry unless a newer timer replaced it.
            {
                let mut debouncers = this.debouncers.lock();
                match debouncers.get(&timer_path) {
                    Some(entry) if entry.generation == generation => {
                        debouncers.remove(&timer_path);
                    }
                    _ => return,
                }
            }

            if this.shutdown.is_cancelled() {
                return;
            }
            this.emit(ChangeEvent::now(timer_path, kind)).await;
        });

        debouncers.insert(path, DebounceEntry { generation, handle });
    }

    /// Send one event, yielding to shutdown if the queue is full
    async fn emit(&self, event: ChangeEvent) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            result = self.event_tx.send(event) => {
                if result.is_err() {
                    debug!("event channel closed, dropping event");
                }
            }
        }
    }

    /// Emit a Scan event per file in all watched directories, on a fixed
    /// interval
    async fn periodic_scan_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.scan_interval) => {}
            }

            let dirs: Vec<PathBuf> = self.watched_dirs.read().iter().cloned().collect();
            debug!(directories = dirs.len(), "periodic full scan");

            for dir in dirs {
                for entry in WalkDir::new(&dir).max_depth(1) {
                    let entry = match entry {
                        Ok(e) => e,
                        Err(e) => {
                            warn!(error = %e, "scan walk error, skipping entry");
                            continue;
                        }
                    };
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = match entry.path().strip_prefix(&self.root) {
                        Ok(p) => p.to_path_buf(),
                        Err(_) => continue,
                    };
                    self.emit(ChangeEvent::now(rel, ChangeKind::Scan)).await;
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                }
            }
        }
        debug!("periodic scan loop stopped");
    }
}
