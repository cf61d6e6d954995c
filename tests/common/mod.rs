#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use event_vault::{
    config::AppConfig,
    db,
    models::{ObjectInfo, ObjectMeta, Tier},
    services::backends::{
        BackendAdapter, BackendError, BackendRegistry, BackendResult, LocalBackend, ObjectBackend,
        RemoteBackend, RetryPolicy,
    },
    state::AppState,
};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const MB: u64 = 1_000_000;

/// Wraps a real backend and injects failures on demand.
pub struct FlakyBackend {
    inner: Arc<dyn ObjectBackend>,
    failing_suffixes: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    hang_usage: AtomicBool,
    put_delay_ms: AtomicU64,
    writes: AtomicUsize,
    put_attempts: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: Arc<dyn ObjectBackend>) -> Self {
        Self {
            inner,
            failing_suffixes: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            hang_usage: AtomicBool::new(false),
            put_delay_ms: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
            put_attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every put of a key ending in `/{photo_id}` fail as unavailable.
    pub fn fail_photo(&self, photo_id: &str) {
        self.failing_suffixes
            .lock()
            .unwrap()
            .insert(format!("/{photo_id}"));
    }

    /// Make every put fail as unavailable.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing_suffixes.lock().unwrap().clear();
        self.fail_all.store(false, Ordering::SeqCst);
    }

    /// Hold every put for `delay` before completing it.
    pub fn delay_puts(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Highest number of puts observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn hang_usage(&self, hang: bool) {
        self.hang_usage.store(hang, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectBackend for FlakyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn url_for(&self, key: &str) -> String {
        self.inner.url_for(key)
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> BackendResult<String> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.fail_all.load(Ordering::SeqCst)
            || self
                .failing_suffixes
                .lock()
                .unwrap()
                .iter()
                .any(|suffix| key.ends_with(suffix.as_str()));
        if failing {
            return Err(BackendError::Unavailable {
                backend: self.inner.name().to_string(),
                reason: "injected failure".into(),
            });
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = self.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let result = self.inner.put(key, data, content_type).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let url = result?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(url)
    }

    async fn get(&self, key: &str) -> BackendResult<Bytes> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> BackendResult<Option<ObjectInfo>> {
        self.inner.head(key).await
    }

    async fn list(&self, prefix: &str, limit: usize) -> BackendResult<Vec<ObjectInfo>> {
        self.inner.list(prefix, limit).await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.inner.delete(key).await
    }

    async fn usage(&self) -> BackendResult<u64> {
        if self.hang_usage.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.inner.usage().await
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub cfg: AppConfig,
    pub primary: Arc<FlakyBackend>,
    pub secondary: Arc<FlakyBackend>,
    pub local: Arc<FlakyBackend>,
    _dir: TempDir,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    }
}

pub async fn test_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let mut cfg = AppConfig::default();
    cfg.storage_dir = dir.path().display().to_string();
    cfg.primary.capacity_bytes = 100 * MB;
    cfg.secondary.capacity_bytes = 1_000 * MB;
    cfg.local.capacity_bytes = 1_000 * MB;
    cfg.maintenance.stats_timeout = Duration::from_millis(100);

    let pool = db::connect("sqlite::memory:", 1).await.unwrap();
    db::migrate(&pool).await.unwrap();

    let quota = AppState::quota_tracker(&cfg);
    let primary = Arc::new(FlakyBackend::new(Arc::new(RemoteBackend::in_memory(
        "primary",
        "https://primary.test",
    ))));
    let secondary = Arc::new(FlakyBackend::new(Arc::new(RemoteBackend::in_memory(
        "secondary",
        "https://archive.test",
    ))));
    let local_disk = LocalBackend::new("local", dir.path().join("local"), "http://localhost/files")
        .await
        .unwrap();
    let local = Arc::new(FlakyBackend::new(Arc::new(local_disk)));

    let adapter = |tier: Tier, backend: &Arc<FlakyBackend>| {
        let raw: Arc<dyn ObjectBackend> = backend.clone();
        Arc::new(BackendAdapter::new(tier, raw, fast_retry(), quota.clone()))
    };
    let registry = BackendRegistry::new(
        adapter(Tier::Primary, &primary),
        adapter(Tier::Secondary, &secondary),
        adapter(Tier::Local, &local),
    );

    let state = AppState::new(&cfg, pool, quota, registry);
    TestEnv {
        state,
        cfg,
        primary,
        secondary,
        local,
        _dir: dir,
    }
}

impl TestEnv {
    /// Upload `count` photos named `p1..=pN` to the event.
    pub async fn seed_photos(&self, event_id: &str, count: usize) {
        for i in 1..=count {
            let payload = Bytes::from(format!("photo {i} of {event_id}").repeat(16));
            self.state
                .placement
                .store_photo(
                    event_id,
                    Some(&format!("p{i}")),
                    ObjectMeta {
                        content_type: Some("image/jpeg".into()),
                        ..ObjectMeta::default()
                    },
                    payload,
                )
                .await
                .unwrap();
        }
    }
}
