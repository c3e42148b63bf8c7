// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polling change watcher for incremental index updates
//!
//! A dedicated thread hosts a current-thread tokio runtime with two tasks:
//! the poller re-walks the project and emits [`WatchEvent`]s, the dispatcher
//! debounces them and hands settled paths to a [`ChangeSink`].

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::errors::{IndexError, Result};
use crate::indexer::scanner::FileScanner;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    /// Taking the baseline snapshot
    Scanning,
    Polling,
}

impl WatcherState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Scanning => 1,
            Self::Polling => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Scanning,
            2 => Self::Polling,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn get(&self) -> WatcherState {
        WatcherState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: WatcherState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Receives settled file changes. Called from a blocking worker thread.
pub trait ChangeSink: Send + Sync + 'static {
    fn update_file(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl WatchOptions {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
        }
    }
}

/// Per-path debounce deadlines.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Arm (or restart) the deadline for `path`.
    pub fn schedule(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.delay);
    }

    /// Drop a pending deadline. Returns whether one existed.
    pub fn cancel(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every path whose deadline has passed, sorted.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.pending.remove(path);
        }
        due.sort();
        due
    }
}

/// Last observed `path -> mtime` map of the poller.
#[derive(Debug, Default)]
struct PollSnapshot {
    mtimes: HashMap<PathBuf, i64>,
}

impl PollSnapshot {
    /// Replace the snapshot with `current` and return what changed.
    fn advance(&mut self, current: HashMap<PathBuf, i64>) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        for (path, mtime) in &current {
            let kind = match self.mtimes.get(path) {
                None => WatchEventKind::Created,
                Some(previous) if previous != mtime => WatchEventKind::Modified,
                Some(_) => continue,
            };
            events.push(WatchEvent {
                path: path.clone(),
                kind,
            });
        }
        for path in self.mtimes.keys() {
            if !current.contains_key(path) {
                events.push(WatchEvent {
                    path: path.clone(),
                    kind: WatchEventKind::Deleted,
                });
            }
        }
        self.mtimes = current;
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}

/// Background watcher handle. Dropping it stops the watcher.
pub struct Watcher {
    state: SharedState,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    pub fn start(
        scanner: FileScanner,
        sink: Arc<dyn ChangeSink>,
        options: WatchOptions,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| IndexError::Watcher(format!("failed to start runtime: {e}")))?;

        let state = SharedState::default();
        state.set(WatcherState::Scanning);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("caseindex-watch".into())
            .spawn(move || {
                info!(root = %scanner.root().display(), "watcher started");
                runtime.block_on(run(scanner, sink, options, thread_state.clone(), shutdown_rx));
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
                thread_state.set(WatcherState::Stopped);
                info!("watcher stopped");
            })
            .map_err(|e| IndexError::Watcher(format!("failed to spawn watcher thread: {e}")))?;

        Ok(Self {
            state,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> WatcherState {
        self.state.get()
    }

    /// Signal shutdown and wait for the watcher thread. An update already
    /// handed to the sink is allowed to finish.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.shutdown.send(true);
        if thread.join().is_err() {
            warn!("watcher thread panicked");
        }
        self.state.set(WatcherState::Stopped);
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    scanner: FileScanner,
    sink: Arc<dyn ChangeSink>,
    options: WatchOptions,
    state: SharedState,
    shutdown: watch::Receiver<bool>,
) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let poller = tokio::spawn(poll_loop(
        scanner,
        options.poll_interval,
        tx,
        state,
        shutdown.clone(),
    ));
    dispatch_loop(rx, sink, options.debounce, shutdown).await;
    poller.abort();
    let _ = poller.await;
}

async fn take_snapshot(scanner: &FileScanner) -> Option<HashMap<PathBuf, i64>> {
    let scanner = scanner.clone();
    match tokio::task::spawn_blocking(move || scanner.snapshot()).await {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(error = %e, "watcher scan failed");
            None
        }
    }
}

/// Take the baseline snapshot, retrying every `interval` until a scan
/// succeeds. `None` when shutdown is requested first.
async fn establish_baseline<F, Fut>(
    mut take: F,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<HashMap<PathBuf, i64>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<HashMap<PathBuf, i64>>>,
{
    loop {
        if *shutdown.borrow() {
            return None;
        }
        if let Some(baseline) = take().await {
            return Some(baseline);
        }
        warn!(retry_ms = interval.as_millis() as u64, "baseline scan failed, retrying");
        tokio::select! {
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn poll_loop(
    scanner: FileScanner,
    interval: Duration,
    tx: mpsc::Sender<WatchEvent>,
    state: SharedState,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(baseline) =
        establish_baseline(|| take_snapshot(&scanner), interval, &mut shutdown).await
    else {
        return;
    };
    debug!(files = baseline.len(), "watcher baseline recorded");
    let mut snapshot = PollSnapshot { mtimes: baseline };
    state.set(WatcherState::Polling);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(current) = take_snapshot(&scanner).await else {
                    continue;
                };
                for event in snapshot.advance(current) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending::<()>().await,
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<WatchEvent>,
    sink: Arc<dyn ChangeSink>,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut debouncer = Debouncer::new(debounce);

    loop {
        if *shutdown.borrow() {
            break;
        }
        let deadline = debouncer.next_deadline();
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                debug!(path = %event.path.display(), kind = ?event.kind, "file change observed");
                match event.kind {
                    WatchEventKind::Created | WatchEventKind::Modified => {
                        debouncer.schedule(event.path, Instant::now());
                    }
                    WatchEventKind::Deleted => {
                        debouncer.cancel(&event.path);
                        deliver(&sink, event.path, WatchEventKind::Deleted).await;
                    }
                }
            }
            _ = sleep_until(deadline) => {
                for path in debouncer.take_due(Instant::now()) {
                    if *shutdown.borrow() {
                        break;
                    }
                    deliver(&sink, path, WatchEventKind::Modified).await;
                }
            }
        }
    }

    debouncer.clear();
}

async fn deliver(sink: &Arc<dyn ChangeSink>, path: PathBuf, kind: WatchEventKind) {
    let sink = Arc::clone(sink);
    let path_display = path.display().to_string();
    let result = tokio::task::spawn_blocking(move || match kind {
        WatchEventKind::Deleted => sink.remove_file(&path),
        WatchEventKind::Created | WatchEventKind::Modified => sink.update_file(&path),
    })
    .await;

    match result {
        Ok(Ok(())) => debug!(path = %path_display, kind = ?kind, "watched change applied"),
        Ok(Err(e)) => warn!(path = %path_display, error = %e, "failed to apply watched change"),
        Err(e) => warn!(path = %path_display, error = %e, "watcher worker failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescheduling_restarts_the_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("a.md");
        debouncer.schedule(path.clone(), start);
        debouncer.schedule(path.clone(), start + Duration::from_millis(60));

        assert_eq!(debouncer.len(), 1);
        assert!(debouncer
            .take_due(start + Duration::from_millis(110))
            .is_empty());
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(160)),
            vec![path]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn cancel_and_clear_drop_pending_paths() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        debouncer.schedule(PathBuf::from("a.md"), now);
        debouncer.schedule(PathBuf::from("b.md"), now);
        assert!(debouncer.cancel(Path::new("a.md")));
        assert!(!debouncer.cancel(Path::new("a.md")));
        assert_eq!(debouncer.len(), 1);
        debouncer.clear();
        assert_eq!(debouncer.next_deadline(), None);
    }

    #[test]
    fn next_deadline_is_the_earliest() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        debouncer.schedule(PathBuf::from("late.md"), now + Duration::from_millis(50));
        debouncer.schedule(PathBuf::from("early.md"), now);
        assert_eq!(
            debouncer.next_deadline(),
            Some(now + Duration::from_millis(10))
        );
    }

    #[tokio::test]
    async fn baseline_is_retried_until_a_scan_succeeds() {
        let (_tx, mut rx) = watch::channel(false);
        let mut attempts = 0;
        let baseline = establish_baseline(
            || {
                attempts += 1;
                let ok = attempts >= 3;
                async move { ok.then(|| HashMap::from([(PathBuf::from("a.md"), 1)])) }
            },
            Duration::from_millis(1),
            &mut rx,
        )
        .await;
        assert_eq!(attempts, 3);
        assert_eq!(baseline, Some(HashMap::from([(PathBuf::from("a.md"), 1)])));
    }

    #[tokio::test]
    async fn failing_baseline_stops_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });
        let baseline = establish_baseline(
            || async { None },
            Duration::from_millis(5),
            &mut rx,
        )
        .await;
        assert_eq!(baseline, None);
        stopper.await.expect("stopper");
    }

    #[test]
    fn snapshot_diff_reports_created_modified_deleted() {
        let mut snapshot = PollSnapshot::default();
        snapshot.mtimes = HashMap::from([
            (PathBuf::from("keep.md"), 1),
            (PathBuf::from("edit.md"), 1),
            (PathBuf::from("gone.md"), 1),
        ]);
        let events = snapshot.advance(HashMap::from([
            (PathBuf::from("keep.md"), 1),
            (PathBuf::from("edit.md"), 2),
            (PathBuf::from("new.md"), 1),
        ]));
        assert_eq!(
            events,
            vec![
                WatchEvent {
                    path: PathBuf::from("edit.md"),
                    kind: WatchEventKind::Modified
                },
                WatchEvent {
                    path: PathBuf::from("gone.md"),
                    kind: WatchEventKind::Deleted
                },
                WatchEvent {
                    path: PathBuf::from("new.md"),
                    kind: WatchEventKind::Created
                },
            ]
        );
        assert!(snapshot.advance(snapshot.mtimes.clone()).is_empty());
    }
}
