//! Identity directory cache.
//!
//! Holds the latest directory snapshot together with its [`SubjectIndex`].
//! A single background task refreshes it; request handlers only read.
//!
//! # Concurrency
//!
//! The snapshot lives behind one `parking_lot::RwLock<Arc<DirectorySnapshot>>`.
//! A refresh loads and indexes into a scratch snapshot without holding the
//! lock, then swaps the `Arc` under the write lock. Readers therefore see
//! either the old or the new directory/index pair, never a mix. A failed
//! refresh leaves the previous snapshot in place.
//!
//! ```text
//! refresh task: load() ─► parse ─► SubjectIndex::build ─► write-lock swap
//! handlers:                                   read-lock ─► index.lookup()
//! ```

pub mod index;
pub mod record;
pub mod source;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use index::{SubjectIndex, subject_tokens};
pub use record::{IdentityDirectory, IdentityRecord, KeyMode, parse_directory};
pub use source::{DirectoryProvider, FileProvider, HttpProvider};

use crate::config::DirectoryConfig;
use crate::{Error, Result};

/// A directory and the index derived from it.
#[derive(Debug, Default)]
pub struct DirectorySnapshot {
    /// Records by primary key
    pub directory: IdentityDirectory,
    /// Subject token index built from `directory`
    pub index: SubjectIndex,
    /// Source the snapshot was loaded from
    pub source: Option<String>,
    /// When the snapshot was committed
    pub refreshed_at: Option<SystemTime>,
}

impl DirectorySnapshot {
    fn build(directory: IdentityDirectory, source: &str, mode: KeyMode) -> Self {
        let index = SubjectIndex::build(&directory, mode);
        Self {
            directory,
            index,
            source: Some(source.to_string()),
            refreshed_at: Some(SystemTime::now()),
        }
    }
}

/// Which configured source a refresh tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePreference {
    /// Local file first (initial load)
    File,
    /// Remote endpoint first (interval refreshes)
    Remote,
}

/// Shared, periodically refreshed identity directory.
pub struct DirectoryCache {
    current: RwLock<Arc<DirectorySnapshot>>,
    file: Option<Arc<dyn DirectoryProvider>>,
    remote: Option<Arc<dyn DirectoryProvider>>,
    mode: KeyMode,
    verbose: u8,
}

impl DirectoryCache {
    /// Create an empty cache over the given sources.
    #[must_use]
    pub fn new(
        file: Option<Arc<dyn DirectoryProvider>>,
        remote: Option<Arc<dyn DirectoryProvider>>,
        mode: KeyMode,
    ) -> Self {
        Self {
            current: RwLock::new(Arc::new(DirectorySnapshot::default())),
            file,
            remote,
            mode,
            verbose: 0,
        }
    }

    /// Create from the `directory` configuration section.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP provider cannot be built.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self> {
        let file = config
            .file
            .as_ref()
            .map(|path| Arc::new(FileProvider::new(path.as_str())) as Arc<dyn DirectoryProvider>);
        let remote = HttpProvider::from_config(config)?
            .map(|provider| Arc::new(provider) as Arc<dyn DirectoryProvider>);
        Ok(Self::new(file, remote, config.key).with_verbose(config.verbose))
    }

    /// Set the record dump level used after each refresh.
    #[must_use]
    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    /// Keying mode of the directory.
    #[must_use]
    pub fn key_mode(&self) -> KeyMode {
        self.mode
    }

    /// Latest committed snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Record owning subject `token` in the latest snapshot.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<Arc<IdentityRecord>> {
        self.current.read().index.lookup(token)
    }

    /// Index `directory` and commit it as the current snapshot.
    ///
    /// Returns the number of records committed.
    pub fn replace(&self, directory: IdentityDirectory, source: &str) -> usize {
        let snapshot = Arc::new(DirectorySnapshot::build(directory, source, self.mode));
        let records = snapshot.directory.len();
        let tokens = snapshot.index.len();
        self.dump(&snapshot);

        *self.current.write() = snapshot;

        info!(source = %source, records, tokens, key = ?self.mode, "Updated identity directory");
        records
    }

    /// Load the directory once and commit it.
    ///
    /// The preferred source is tried first; when it is not configured or
    /// fails, the other configured source is tried. Returns the number of
    /// records committed.
    ///
    /// # Errors
    ///
    /// [`Error::SourceUnavailable`] when no source is configured, otherwise
    /// the error of the last source tried. The previous snapshot is kept.
    pub async fn refresh_once(&self, preference: SourcePreference) -> Result<usize> {
        let ordered = match preference {
            SourcePreference::File => [&self.file, &self.remote],
            SourcePreference::Remote => [&self.remote, &self.file],
        };

        let mut last_error = Error::SourceUnavailable;
        for provider in ordered.into_iter().flatten() {
            match provider.load(self.mode).await {
                Ok(directory) => return Ok(self.replace(directory, provider.name())),
                Err(e) => {
                    warn!(source = %provider.name(), error = %e, "Unable to load identity directory");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Refresh forever: an initial load from the file (when configured), then
    /// an immediate remote-first refresh and one every `interval`.
    ///
    /// Returns when `shutdown` fires.
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(interval_secs = interval.as_secs(), key = ?self.mode, "Starting directory refresh loop");

        if self.file.is_some()
            && let Err(e) = self.refresh_once(SourcePreference::File).await
        {
            warn!(error = %e, "Initial directory load failed");
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once(SourcePreference::Remote).await {
                        warn!(error = %e, "Directory refresh failed, keeping previous snapshot");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Directory refresh loop shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn [`DirectoryCache::run_refresh_loop`] on the runtime.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_refresh_loop(interval, shutdown))
    }

    fn dump(&self, snapshot: &DirectorySnapshot) {
        if self.verbose == 0 {
            return;
        }
        let limit = if self.verbose > 2 { usize::MAX } else { 1 };
        for (key, record) in snapshot.directory.iter().take(limit) {
            debug!(key = ?self.mode, value = %key, record = ?record, "Directory record");
        }
    }
}

impl std::fmt::Debug for DirectoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryCache")
            .field("file", &self.file.as_ref().map(|p| p.name().to_string()))
            .field("remote", &self.remote.as_ref().map(|p| p.name().to_string()))
            .field("mode", &self.mode)
            .field("records", &self.current.read().directory.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const ALICE: &str = r#"[{"DN": "/DC=org/CN=alice/CN=Alice Example",
        "DNs": ["/DC=org/CN=alice/CN=Alice Example"], "ID": 1, "LOGIN": "alice",
        "NAME": "Alice Example", "ROLES": {"admin": []}}]"#;
    const BOB: &str = r#"[{"DN": "/DC=org/CN=bob", "DNs": ["/DC=org/CN=bob"], "ID": 2,
        "NAME": "Bob"}]"#;

    struct FailingProvider {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DirectoryProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn load(&self, _mode: KeyMode) -> Result<IdentityDirectory> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Io(std::io::Error::other("connection reset")))
        }
    }

    fn file_provider(dir: &tempfile::TempDir, name: &str, body: &str) -> Arc<dyn DirectoryProvider> {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        Arc::new(FileProvider::new(path.to_string_lossy()))
    }

    #[tokio::test]
    async fn no_source_is_source_unavailable() {
        let cache = DirectoryCache::new(None, None, KeyMode::Natural);
        let err = cache.refresh_once(SourcePreference::Remote).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable));
    }

    #[tokio::test]
    async fn refresh_commits_directory_and_index() {
        // GIVEN: a file source
        let dir = tempfile::tempdir().unwrap();
        let cache =
            DirectoryCache::new(Some(file_provider(&dir, "a.json", ALICE)), None, KeyMode::Natural);

        // WHEN
        let records = cache.refresh_once(SourcePreference::File).await.unwrap();

        // THEN: both the directory and the derived index are visible
        assert_eq!(records, 1);
        assert_eq!(cache.lookup("alice").unwrap().login, "alice");
        assert_eq!(cache.lookup("Alice Example").unwrap().id, 1);
        assert_eq!(cache.snapshot().directory.len(), 1);
    }

    #[tokio::test]
    async fn id_mode_commits_id_keyed_index() {
        // GIVEN: a file source refreshed in id mode
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryCache::new(Some(file_provider(&dir, "a.json", ALICE)), None, KeyMode::Id);

        // WHEN
        cache.refresh_once(SourcePreference::File).await.unwrap();

        // THEN: records are found by person ID only
        assert!(cache.snapshot().directory.contains_key("1"));
        assert_eq!(cache.lookup("1").unwrap().login, "alice");
        assert!(cache.lookup("Alice Example").is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        // GIVEN: a cache populated from file, remote source broken
        let dir = tempfile::tempdir().unwrap();
        let failing = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = DirectoryCache::new(
            Some(file_provider(&dir, "a.json", ALICE)),
            Some(Arc::clone(&failing) as Arc<dyn DirectoryProvider>),
            KeyMode::Natural,
        );
        cache.refresh_once(SourcePreference::File).await.unwrap();
        std::fs::write(dir.path().join("a.json"), "not json").unwrap();
        let before = cache.snapshot();

        // WHEN: remote fails and the file fallback is now malformed
        let err = cache.refresh_once(SourcePreference::Remote).await.unwrap_err();

        // THEN: the old snapshot is still served
        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&before, &cache.snapshot()));
        assert_eq!(cache.lookup("alice").unwrap().name, "Alice Example");
    }

    #[tokio::test]
    async fn remote_preference_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryCache::new(
            Some(file_provider(&dir, "b.json", BOB)),
            Some(Arc::new(FailingProvider {
                calls: AtomicUsize::new(0),
            })),
            KeyMode::Natural,
        );

        cache.refresh_once(SourcePreference::Remote).await.unwrap();
        assert_eq!(cache.lookup("bob").unwrap().id, 2);
        assert!(cache.snapshot().source.as_deref().unwrap().ends_with("b.json"));
    }

    #[tokio::test]
    async fn replace_swaps_whole_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let alice = file_provider(&dir, "a.json", ALICE);
        let bob = file_provider(&dir, "b.json", BOB);
        let cache = DirectoryCache::new(Some(alice), Some(bob), KeyMode::Natural);

        cache.refresh_once(SourcePreference::File).await.unwrap();
        assert!(cache.lookup("alice").is_some());

        cache.refresh_once(SourcePreference::Remote).await.unwrap();
        assert!(cache.lookup("alice").is_none());
        assert!(cache.lookup("bob").is_some());
    }

    #[tokio::test]
    async fn refresh_loop_loads_and_stops_on_shutdown() {
        // GIVEN: a file-only cache and a running loop
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(DirectoryCache::new(
            Some(file_provider(&dir, "a.json", ALICE)),
            None,
            KeyMode::Natural,
        ));
        let (tx, rx) = broadcast::channel(1);
        let handle = cache.spawn_refresh_loop(Duration::from_secs(3600), rx);

        // WHEN: the initial load has had time to run
        for _ in 0..50 {
            if cache.lookup("alice").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(()).unwrap();

        // THEN
        assert!(cache.lookup("alice").is_some());
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
