//! The public entry point. Lazily starts the [`crate::differ`] on first
//! subscription and enforces configuration-freeze semantics afterward.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use crate::differ::DifferHandle;
use crate::error::{Result, WatchError};
use crate::module_locator;
use crate::scanner;
use crate::snapshot::Diff;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// Options accepted before the first [`Watcher::watch`] call. All fields
/// are optional; unset fields take the defaults from spec.md §6. Any
/// mutation after the first `watch` is ignored until `unsubscribe_all`.
#[derive(Clone, Debug, Default)]
pub struct WatcherConfig {
    pub directory: Option<PathBuf>,
    pub interval: Option<Duration>,
    pub ignore: Option<Vec<String>>,
}

struct Started {
    differ: DifferHandle,
    name: String,
    dir: PathBuf,
}

/// Watches one Go module's testing packages and fans out diffs to
/// subscribers. Safe to share across tasks: all public methods take `&self`.
pub struct Watcher {
    config: Mutex<WatcherConfig>,
    started: Mutex<Option<Started>>,
    next_id: AtomicU64,
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Watcher {
    pub fn new() -> Self {
        Self::with_config(WatcherConfig::default())
    }

    pub fn with_config(config: WatcherConfig) -> Self {
        Self {
            config: Mutex::new(config),
            started: Mutex::new(None),
            // id 0 is reserved (spec.md §9 "Id zero"); ids hand out from 1.
            next_id: AtomicU64::new(1),
        }
    }

    /// Apply configuration before the first `watch()`. Silently ignored
    /// once a Differ is already running, per the configuration-freeze
    /// rule in spec.md §4.5.
    pub fn configure(&self, config: WatcherConfig) {
        let mut guard = self.config.lock().unwrap();
        if self.started.lock().unwrap().is_none() {
            *guard = config;
        }
    }

    /// Subscribe to diffs. On the first call this freezes configuration,
    /// locates the module, and starts the Differ task; later calls only
    /// create a new subscription against the already-running Differ.
    pub async fn watch(&self) -> Result<(watch::Receiver<Option<Diff>>, u64)> {
        {
            let mut started = self.started.lock().unwrap();
            if started.is_none() {
                let config = self.config.lock().unwrap().clone();
                let dir = config
                    .directory
                    .clone()
                    .unwrap_or_else(|| std::env::current_dir().expect("current dir unavailable"));
                let (root, name) = module_locator::find(&dir)?;
                let interval = config.interval.unwrap_or(DEFAULT_INTERVAL);
                // The caller's `ignore` list augments the default set, it
                // never replaces it (spec.md §4.2: "callers may augment
                // but not shrink this set before the first subscription").
                let mut ignore: Vec<String> =
                    scanner::DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect();
                if let Some(extra) = config.ignore.clone() {
                    for name in extra {
                        if !ignore.contains(&name) {
                            ignore.push(name);
                        }
                    }
                }
                let differ = DifferHandle::spawn(root.clone(), interval, ignore);
                *started = Some(Started {
                    differ,
                    name,
                    dir: root,
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let differ = {
            let started = self.started.lock().unwrap();
            started.as_ref().expect("just initialized above").differ.clone()
        };
        let rx = differ.subscribe(id);
        Ok((rx, id))
    }

    /// `id == 0` is always a no-op, preserving the reserved meaning of the
    /// internal termination signal.
    pub fn unsubscribe(&self, id: u64) {
        if id == 0 {
            return;
        }
        if let Some(started) = self.started.lock().unwrap().as_ref() {
            started.differ.unsubscribe(id);
        }
    }

    /// Idempotent. After this returns, the Watcher behaves as if freshly
    /// constructed: a later `watch()` restarts discovery using whatever
    /// configuration is current at that point.
    pub fn unsubscribe_all(&self) {
        let mut started = self.started.lock().unwrap();
        if let Some(state) = started.take() {
            state.differ.unsubscribe(0);
        }
    }

    pub async fn is_watched(&self) -> bool {
        let differ = {
            let started = self.started.lock().unwrap();
            started.as_ref().map(|s| s.differ.clone())
        };
        match differ {
            Some(differ) => differ.is_watched().await,
            None => false,
        }
    }

    pub fn name(&self) -> String {
        self.started
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    pub fn dir(&self) -> PathBuf {
        self.started
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.dir.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &std::path::Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn no_module_fails_watch() {
        let root = TempDir::new().unwrap();
        let watcher = Watcher::with_config(WatcherConfig {
            directory: Some(root.path().to_path_buf()),
            interval: Some(Duration::from_millis(5)),
            ignore: None,
        });
        let err = watcher.watch().await.unwrap_err();
        assert!(matches!(err, WatchError::NoModule(_)));
    }

    #[tokio::test]
    async fn minimal_discovery_reports_name_and_dir() {
        let root = TempDir::new().unwrap();
        write(root.path(), "go.mod", "module example.com/x\n");

        let watcher = Watcher::with_config(WatcherConfig {
            directory: Some(root.path().to_path_buf()),
            interval: Some(Duration::from_millis(5)),
            ignore: None,
        });
        assert_eq!(watcher.name(), "");
        let (_rx, id) = watcher.watch().await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(watcher.name(), "example.com/x");
        assert_eq!(watcher.dir(), root.path());
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing_and_never_zero() {
        let root = TempDir::new().unwrap();
        write(root.path(), "go.mod", "module example.com/x\n");

        let watcher = Watcher::with_config(WatcherConfig {
            directory: Some(root.path().to_path_buf()),
            interval: Some(Duration::from_millis(1000)),
            ignore: None,
        });
        let (_rx1, id1) = watcher.watch().await.unwrap();
        let (_rx2, id2) = watcher.watch().await.unwrap();
        assert!(id1 > 0 && id2 > id1);
    }

    #[tokio::test]
    async fn unsubscribe_zero_is_noop() {
        let root = TempDir::new().unwrap();
        write(root.path(), "go.mod", "module example.com/x\n");
        let watcher = Watcher::with_config(WatcherConfig {
            directory: Some(root.path().to_path_buf()),
            interval: Some(Duration::from_millis(1000)),
            ignore: None,
        });
        let (mut rx, _id) = watcher.watch().await.unwrap();
        watcher.unsubscribe(0);
        assert!(watcher.is_watched().await);
        // the channel must still be open
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.has_changed().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_all_is_idempotent_and_allows_restart() {
        let root = TempDir::new().unwrap();
        write(root.path(), "go.mod", "module example.com/x\n");
        let watcher = Watcher::with_config(WatcherConfig {
            directory: Some(root.path().to_path_buf()),
            interval: Some(Duration::from_millis(1000)),
            ignore: None,
        });
        let (_rx, _id) = watcher.watch().await.unwrap();
        watcher.unsubscribe_all();
        watcher.unsubscribe_all();
        assert!(!watcher.is_watched().await);

        let (_rx2, id2) = watcher.watch().await.unwrap();
        assert!(id2 > 0);
        assert!(watcher.is_watched().await);
    }

    #[tokio::test]
    async fn custom_ignore_augments_rather_than_replaces_defaults() {
        let root = TempDir::new().unwrap();
        write(root.path(), "go.mod", "module example.com/x\n");
        // A package under the default-ignored `node_modules` and one under
        // a caller-added `build` tail; neither should ever surface.
        write(
            root.path(),
            "node_modules/p/a_test.go",
            "package p\nfunc TestFoo(t *testing.T){}\n",
        );
        write(
            root.path(),
            "build/p/a_test.go",
            "package p\nfunc TestFoo(t *testing.T){}\n",
        );

        let watcher = Watcher::with_config(WatcherConfig {
            directory: Some(root.path().to_path_buf()),
            interval: Some(Duration::from_millis(5)),
            ignore: Some(vec!["build".to_string()]),
        });
        let (mut rx, _id) = watcher.watch().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(60), rx.changed()).await;
        assert!(
            outcome.is_err(),
            "expected no diff: node_modules must still be ignored even though \
             the caller only supplied an extra `build` entry"
        );
    }

    #[tokio::test]
    async fn is_watched_false_before_first_watch() {
        let watcher = Watcher::new();
        assert!(!watcher.is_watched().await);
        assert_eq!(watcher.name(), "");
        assert_eq!(watcher.dir(), PathBuf::new());
    }
}
