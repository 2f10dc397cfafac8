//! Source-tree change watching with an inactivity-debounced redeploy
//!
//! Watches every directory of the deployment source individually rather than
//! relying on platform recursive-watch support, registering new directories
//! as they appear. Changes stamp a shared atomic timestamp; a periodic task
//! redeploys once the tree has been quiet for the configured threshold, so a
//! build writing many files produces one redeploy, not dozens.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use catdev_core::prelude::*;
use catdev_core::DeploymentConfig;

use crate::deploy::DeploymentEngine;

/// How often the blocking event loop polls its stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared change-tracking state between the event loop and the debounce task.
///
/// `last_change_ms` holds the wall-clock time of the most recent change, or
/// zero when no change is pending.
#[derive(Debug, Default)]
pub struct WatchState {
    last_change_ms: AtomicU64,
    running: AtomicBool,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the current time as the latest change.
    pub fn record_change(&self) {
        self.last_change_ms.store(now_millis(), Ordering::Release);
    }

    /// True if a change is pending and the tree has been quiet for at least
    /// `threshold`; clears the pending change on success.
    ///
    /// The clear is a compare-exchange against the observed timestamp, so a
    /// change landing between the load and the clear keeps the redeploy
    /// deferred instead of being silently dropped.
    pub fn take_if_quiet(&self, threshold: Duration) -> bool {
        let last = self.last_change_ms.load(Ordering::Acquire);
        if last == 0 {
            return false;
        }
        if now_millis().saturating_sub(last) < threshold.as_millis() as u64 {
            return false;
        }
        self.last_change_ms
            .compare_exchange(last, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Watches a deployment source tree and redeploys after quiet periods.
pub struct ChangeWatcher {
    config: DeploymentConfig,
    engine: Arc<DeploymentEngine>,
    state: Arc<WatchState>,
    stop: Arc<AtomicBool>,
    debounce_task: Option<tokio::task::JoinHandle<()>>,
}

impl ChangeWatcher {
    pub fn new(config: DeploymentConfig, engine: Arc<DeploymentEngine>) -> Self {
        Self {
            config,
            engine,
            state: Arc::new(WatchState::new()),
            stop: Arc::new(AtomicBool::new(false)),
            debounce_task: None,
        }
    }

    /// Shared state handle, mainly for tests and status reporting
    pub fn state(&self) -> Arc<WatchState> {
        self.state.clone()
    }

    /// Begin watching the source tree.
    ///
    /// A no-op when watching is disabled in the deployment config. Fails if
    /// the watcher is already running or the source tree cannot be
    /// registered.
    pub fn start(&mut self) -> Result<()> {
        if !self.config.watch {
            info!(
                "Change watching disabled for module {}",
                self.config.module
            );
            return Ok(());
        }
        if self.state.is_running() {
            return Err(Error::watch(format!(
                "watcher already running for module {}",
                self.config.module
            )));
        }
        if !self.config.source_dir.is_dir() {
            return Err(Error::missing_source(&self.config.source_dir));
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)
            .map_err(|e| Error::watch(format!("failed to create watcher: {e}")))?;
        register_tree(&mut watcher, &self.config.source_dir)?;

        self.stop.store(false, Ordering::Release);
        self.state.running.store(true, Ordering::Release);

        let state = self.state.clone();
        let stop = self.stop.clone();
        tokio::task::spawn_blocking(move || {
            // watcher must stay alive for the duration of the loop
            let mut watcher = watcher;
            loop {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                match rx.recv_timeout(STOP_POLL_INTERVAL) {
                    Ok(Ok(event)) => handle_event(&mut watcher, &state, &event),
                    Ok(Err(e)) => warn!("Watch error: {e}"),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            state.running.store(false, Ordering::Release);
            debug!("Watch event loop exited");
        });

        let state = self.state.clone();
        let stop = self.stop.clone();
        let engine = self.engine.clone();
        let threshold = self.config.inactivity_threshold();
        self.debounce_task = Some(tokio::spawn(async move {
            // Checking at the threshold period itself is enough: a change is
            // acted on between one and two periods after it lands.
            let mut interval = tokio::time::interval(threshold);
            loop {
                interval.tick().await;
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if state.take_if_quiet(threshold) {
                    let engine = engine.clone();
                    match tokio::task::spawn_blocking(move || engine.redeploy()).await {
                        Ok(Ok(target)) => {
                            info!("Redeployed after quiet period to {}", target.display());
                        }
                        Ok(Err(e)) => error!("Automatic redeploy failed: {e}"),
                        Err(e) => error!("Redeploy task failed: {e}"),
                    }
                }
            }
        }));

        info!(
            "Watching {} (quiet period {}s)",
            self.config.source_dir.display(),
            self.config.inactivity_secs
        );
        Ok(())
    }

    /// Stop watching. Idempotent; safe to call on a watcher that never
    /// started.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(task) = self.debounce_task.take() {
            task.abort();
        }
        // The blocking loop notices the flag within one poll interval and
        // clears `running` itself.
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Register a directory and all of its descendants, one watch each.
fn register_tree(watcher: &mut RecommendedWatcher, root: &Path) -> Result<()> {
    watcher
        .watch(root, RecursiveMode::NonRecursive)
        .map_err(|e| Error::watch(format!("cannot watch {}: {e}", root.display())))?;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            register_tree(watcher, &entry.path())?;
        }
    }
    Ok(())
}

fn handle_event(watcher: &mut RecommendedWatcher, state: &WatchState, event: &Event) {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return;
    }
    state.record_change();
    trace!("Change event: {:?} {:?}", event.kind, event.paths);

    // New directories need their own watch registration.
    if matches!(event.kind, EventKind::Create(_)) {
        for path in &event.paths {
            if path.is_dir() {
                if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch new directory {}: {e}", path.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn watcher_pair(watch: bool) -> (ChangeWatcher, TempDir, TempDir) {
        let source = TempDir::new().unwrap();
        let webapps = TempDir::new().unwrap();
        std::fs::write(source.path().join("index.html"), b"hi").unwrap();
        let config = DeploymentConfig::new("app", source.path(), "/app", webapps.path())
            .with_watch(watch)
            .with_inactivity_secs(1);
        let engine = Arc::new(DeploymentEngine::new(config.clone()));
        (ChangeWatcher::new(config, engine), source, webapps)
    }

    #[test]
    fn test_take_if_quiet_without_change() {
        let state = WatchState::new();
        assert!(!state.take_if_quiet(Duration::ZERO));
    }

    #[test]
    fn test_take_if_quiet_clears_once() {
        let state = WatchState::new();
        state.record_change();
        assert!(state.take_if_quiet(Duration::ZERO));
        // the pending change was consumed
        assert!(!state.take_if_quiet(Duration::ZERO));
    }

    #[test]
    fn test_take_if_quiet_respects_threshold() {
        let state = WatchState::new();
        state.record_change();
        assert!(!state.take_if_quiet(Duration::from_secs(60)));
        // still pending for a later check
        assert!(state.take_if_quiet(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_start_is_noop_when_watch_disabled() {
        let (mut watcher, _source, _webapps) = watcher_pair(false);
        watcher.start().unwrap();
        assert!(!watcher.state().is_running());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (mut watcher, _source, _webapps) = watcher_pair(true);
        watcher.start().unwrap();
        assert!(matches!(watcher.start(), Err(Error::Watch { .. })));
        watcher.close();
    }

    #[tokio::test]
    async fn test_start_missing_source_fails() {
        let webapps = TempDir::new().unwrap();
        let config =
            DeploymentConfig::new("app", "/nonexistent/src", "/app", webapps.path())
                .with_watch(true);
        let engine = Arc::new(DeploymentEngine::new(config.clone()));
        let mut watcher = ChangeWatcher::new(config, engine);
        assert!(matches!(
            watcher.start(),
            Err(Error::MissingSource { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut watcher, _source, _webapps) = watcher_pair(true);
        watcher.start().unwrap();
        watcher.close();
        watcher.close();
    }

    #[tokio::test]
    async fn test_event_loop_stamps_changes() {
        let (mut watcher, source, _webapps) = watcher_pair(true);
        let state = watcher.state();
        watcher.start().unwrap();

        std::fs::write(source.path().join("new.txt"), b"change").unwrap();

        // Generous bound; inotify delivery is fast but not instant.
        let mut stamped = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if state.last_change_ms.load(Ordering::Acquire) != 0 {
                stamped = true;
                break;
            }
        }
        watcher.close();
        assert!(stamped, "change was never observed");
    }
}
