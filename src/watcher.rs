//! Configuration file watcher for hot reload.
//!
//! Polls the file's modification time on a fixed interval and swaps in a
//! freshly built [`RouteTable`] when it changes.

use crate::error::ConfigError;
use crate::loader::{ConfigLoader, ConfigSource};
use crate::routes::RouteTable;
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct WatchTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    interval: Duration,
    loader: ConfigLoader,
    table: Arc<ArcSwap<RouteTable>>,
    task: Mutex<Option<WatchTask>>,
}

impl ConfigWatcher {
    /// Create a watcher that replaces `table` when `path` changes.
    pub fn new(
        path: &Path,
        interval: Duration,
        loader: ConfigLoader,
        table: Arc<ArcSwap<RouteTable>>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            interval,
            loader,
            table,
            task: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the polling task is running.
    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Start polling. Does nothing if already started.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let (stop, mut stopped) = oneshot::channel();
        let path = self.path.clone();
        let interval = self.interval;
        let loader = self.loader.clone();
        let table = self.table.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if let Err(e) = reload_if_modified(&path, &loader, &table).await {
                            warn!(
                                path = %path.display(),
                                error = %e,
                                "Failed to reload config. Keeping current configuration."
                            );
                        }
                    }
                }
            }
            debug!(path = %path.display(), "Config watcher loop finished");
        });

        info!(
            path = %self.path.display(),
            interval_ms = self.interval.as_millis() as u64,
            "Config watcher started"
        );
        *task = Some(WatchTask { stop, handle });
    }

    /// Stop polling and wait for the task to finish. Does nothing if stopped.
    pub async fn stop(&self) {
        let Some(WatchTask { stop, handle }) = self.task.lock().await.take() else {
            return;
        };
        let _ = stop.send(());
        if let Err(e) = handle.await {
            warn!(error = %e, "Config watcher task ended abnormally");
        }
        info!(path = %self.path.display(), "Config watcher stopped");
    }

    /// Run one poll immediately.
    ///
    /// Returns whether a new configuration was swapped in.
    pub async fn check_now(&self) -> Result<bool, ConfigError> {
        reload_if_modified(&self.path, &self.loader, &self.table).await
    }
}

/// Reload when the file is newer than the table's recorded modification time.
async fn reload_if_modified(
    path: &Path,
    loader: &ConfigLoader,
    table: &ArcSwap<RouteTable>,
) -> Result<bool, ConfigError> {
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let loaded = table.load().modified();
    if loaded.is_some_and(|loaded| modified <= loaded) {
        return Ok(false);
    }

    info!(path = %path.display(), "Config file change detected, reloading...");
    let (config, modified) = loader
        .load_async(&ConfigSource::File(path.to_path_buf()))
        .await?;
    let endpoints = config.endpoints.len();
    table.store(Arc::new(RouteTable::new(config, modified)));
    info!(path = %path.display(), endpoints, "Configuration reloaded");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs::File;
    use std::time::SystemTime;

    const FIRST: &str = r#"
endpoints:
  - method: GET
    path: /a
    responses:
      - id: ok
        isDefault: true
"#;

    const SECOND: &str = r#"
endpoints:
  - method: GET
    path: /b
    responses:
      - id: ok
        isDefault: true
  - method: POST
    path: /c/${id}
    responses: []
"#;

    fn bump_mtime(path: &Path, secs: u64) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(secs))
            .unwrap();
    }

    type Fixture = (
        tempfile::TempDir,
        PathBuf,
        ConfigWatcher,
        Arc<ArcSwap<RouteTable>>,
    );

    fn setup(content: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock.yaml");
        std::fs::write(&path, content).unwrap();

        let loader = ConfigLoader::default();
        let (config, modified) = loader.load(&ConfigSource::File(path.clone())).unwrap();
        let table = Arc::new(ArcSwap::from_pointee(RouteTable::new(config, modified)));
        let watcher =
            ConfigWatcher::new(&path, Duration::from_millis(20), loader, table.clone());
        (dir, path, watcher, table)
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_reloaded() {
        let (_dir, _path, watcher, table) = setup(FIRST);
        let before = table.load_full();
        assert!(!watcher.check_now().await.unwrap());
        assert!(Arc::ptr_eq(&before, &table.load_full()));
    }

    #[tokio::test]
    async fn test_reload_rebuilds_index() {
        let (_dir, path, watcher, table) = setup(FIRST);
        std::fs::write(&path, SECOND).unwrap();
        bump_mtime(&path, 5);

        assert!(watcher.check_now().await.unwrap());
        let keys: HashSet<String> = table.load().keys().map(String::from).collect();
        let expected: HashSet<String> = ["GET:/b", "POST:/c/${id}"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, expected);
        assert_eq!(table.load().config().endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous() {
        let (_dir, path, watcher, table) = setup(FIRST);
        std::fs::write(&path, "endpoints: [ {").unwrap();
        bump_mtime(&path, 5);

        assert!(watcher.check_now().await.is_err());
        assert!(table.load().get("GET", "/a").is_some());
    }

    #[tokio::test]
    async fn test_start_stop_cycles() {
        let (_dir, path, watcher, table) = setup(FIRST);

        for _ in 0..3 {
            watcher.start().await;
            watcher.start().await;
            assert!(watcher.is_running().await);
            watcher.stop().await;
            watcher.stop().await;
            assert!(!watcher.is_running().await);
        }

        watcher.start().await;
        std::fs::write(&path, SECOND).unwrap();
        bump_mtime(&path, 5);

        let mut reloaded = false;
        for _ in 0..100 {
            if table.load().get("GET", "/b").is_some() {
                reloaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        watcher.stop().await;
        assert!(reloaded);
    }
}
