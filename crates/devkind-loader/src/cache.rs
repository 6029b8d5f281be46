//! On-disk manifest cache.
//!
//! Layout: `<cache>/device-classes/<kind>.manifest` holds the raw manifest
//! text exactly as the registry returned it. Concurrent loads of one kind
//! share a single fetch, and every write goes through its own temp file.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use devkind_core::config::defaults;
use devkind_core::{
    validate_kind, DeviceManifest, LoaderError, LoaderResult, ManifestParser, RegistryClient,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

type ManifestFuture = Shared<BoxFuture<'static, LoaderResult<Arc<DeviceManifest>>>>;

struct PendingLoad {
    id: u64,
    future: ManifestFuture,
}

/// Summary of one cached manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedMeta {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ManifestCache {
    store: Arc<ManifestStore>,
    pending: DashMap<(String, bool), PendingLoad>,
    next_id: AtomicU64,
}

struct ManifestStore {
    dir: PathBuf,
    registry: Arc<dyn RegistryClient>,
    parser: Arc<dyn ManifestParser>,
    ttl: Duration,
}

impl ManifestCache {
    pub fn new(
        cache_dir: &Path,
        registry: Arc<dyn RegistryClient>,
        parser: Arc<dyn ManifestParser>,
        ttl: Duration,
    ) -> Self {
        Self {
            store: Arc::new(ManifestStore {
                dir: cache_dir.join(defaults::DEVICE_CLASSES_DIR),
                registry,
                parser,
                ttl,
            }),
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.store.dir
    }

    pub fn ttl(&self) -> Duration {
        self.store.ttl
    }

    pub fn manifest_path(&self, kind: &str) -> PathBuf {
        self.store.manifest_path(kind)
    }

    /// Manifest of `kind`, from disk when allowed and fresh, else from the registry.
    ///
    /// Fetched text is persisted before it is parsed, so a manifest that fails
    /// to parse is still cached. Callers asking for the same kind with the
    /// same `allow_cached` while a load runs join it.
    pub async fn get_manifest(&self, kind: &str, allow_cached: bool) -> LoaderResult<Arc<DeviceManifest>> {
        validate_kind(kind)?;

        let key = (kind.to_string(), allow_cached);
        let (id, future) = match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().id, entry.get().future.clone()),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let store = Arc::clone(&self.store);
                let kind = kind.to_string();
                let future = async move { store.load(&kind, allow_cached).await }
                    .boxed()
                    .shared();
                entry.insert(PendingLoad {
                    id,
                    future: future.clone(),
                });
                (id, future)
            }
        };

        let result = future.await;
        self.pending.remove_if(&key, |_, pending| pending.id == id);
        result
    }

    /// Remove the cached manifest of `kind`, if any.
    pub async fn remove(&self, kind: &str) -> LoaderResult<()> {
        validate_kind(kind)?;
        match tokio::fs::remove_file(self.manifest_path(kind)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every cached manifest, sorted by kind. Entries that no longer parse
    /// are reported with their error.
    pub async fn cached_metas(&self) -> LoaderResult<Vec<CachedMeta>> {
        let mut entries = match tokio::fs::read_dir(self.dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{}", defaults::MANIFEST_EXTENSION);
        let mut metas = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(kind) = file_name.to_str().and_then(|n| n.strip_suffix(&suffix)) else {
                continue;
            };
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let text = tokio::fs::read_to_string(entry.path()).await?;
            let meta = match self.store.parser.parse(kind, &text).await {
                Ok(manifest) => CachedMeta {
                    kind: kind.to_string(),
                    version: Some(manifest.version),
                    error: None,
                },
                Err(e) => CachedMeta {
                    kind: kind.to_string(),
                    version: None,
                    error: Some(e.to_string()),
                },
            };
            metas.push(meta);
        }

        metas.sort_by(|a, b| a.kind.cmp(&b.kind));
        Ok(metas)
    }
}

impl ManifestStore {
    fn manifest_path(&self, kind: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", kind, defaults::MANIFEST_EXTENSION))
    }

    async fn load(&self, kind: &str, allow_cached: bool) -> LoaderResult<Arc<DeviceManifest>> {
        if allow_cached {
            if let Some(text) = self.read_fresh(kind).await? {
                debug!(kind = %kind, "Manifest cache hit");
                return self.parse(kind, &text).await;
            }
        }

        let text = self.registry.get_device_code(kind).await?;
        self.persist(kind, &text).await?;
        info!(kind = %kind, "Manifest fetched from registry");
        self.parse(kind, &text).await
    }

    async fn parse(&self, kind: &str, text: &str) -> LoaderResult<Arc<DeviceManifest>> {
        Ok(Arc::new(self.parser.parse(kind, text).await?))
    }

    /// Cached text if the file exists and is younger than the TTL.
    async fn read_fresh(&self, kind: &str) -> LoaderResult<Option<String>> {
        let path = self.manifest_path(kind);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let age = SystemTime::now()
            .duration_since(metadata.modified()?)
            .unwrap_or_default();
        if age >= self.ttl {
            debug!(kind = %kind, age_secs = age.as_secs(), "Cached manifest is stale");
            return Ok(None);
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a uniquely named temp file (owner-only) and rename it over the target.
    async fn persist(&self, kind: &str, text: &str) -> LoaderResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let dir = self.dir.clone();
        let path = self.manifest_path(kind);
        let prefix = format!("{}.", kind);
        let text = text.to_string();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(&format!(".{}.tmp", defaults::MANIFEST_EXTENSION))
                .tempfile_in(&dir)?;
            file.write_all(text.as_bytes())?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| LoaderError::Io(format!("Manifest write task failed: {}", e)))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devkind_core::{JsonManifestParser, LoaderError};
    use devkind_testing::{fixtures, MockRegistry};
    use std::fs::File;

    fn cache(dir: &Path, registry: Arc<MockRegistry>) -> ManifestCache {
        ManifestCache::new(
            dir,
            registry,
            Arc::new(JsonManifestParser),
            Duration::from_secs(defaults::MANIFEST_TTL_SECS),
        )
    }

    fn age_file(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_fetch_persists_then_serves_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new().with_manifest("com.example.rest", fixtures::rest_manifest("http://x/a")),
        );
        let cache = cache(dir.path(), registry.clone());

        let first = cache.get_manifest("com.example.rest", true).await.unwrap();
        assert!(cache.manifest_path("com.example.rest").exists());
        let second = cache.get_manifest("com.example.rest", true).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.code_requests("com.example.rest"), 1);
    }

    #[tokio::test]
    async fn test_stale_manifest_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new().with_manifest("com.example.rest", fixtures::rest_manifest("http://x/a")),
        );
        let cache = cache(dir.path(), registry.clone());

        cache.get_manifest("com.example.rest", true).await.unwrap();
        age_file(
            &cache.manifest_path("com.example.rest"),
            Duration::from_secs(defaults::MANIFEST_TTL_SECS + 60),
        );
        cache.get_manifest("com.example.rest", true).await.unwrap();
        assert_eq!(registry.code_requests("com.example.rest"), 2);
    }

    #[tokio::test]
    async fn test_recent_manifest_within_ttl_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new().with_manifest("com.example.rest", fixtures::rest_manifest("http://x/a")),
        );
        let cache = cache(dir.path(), registry.clone());

        cache.get_manifest("com.example.rest", true).await.unwrap();
        age_file(
            &cache.manifest_path("com.example.rest"),
            Duration::from_secs(6 * 24 * 3600),
        );
        cache.get_manifest("com.example.rest", true).await.unwrap();
        assert_eq!(registry.code_requests("com.example.rest"), 1);
    }

    #[tokio::test]
    async fn test_disallowing_cache_always_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new().with_manifest("com.example.rest", fixtures::rest_manifest("http://x/a")),
        );
        let cache = cache(dir.path(), registry.clone());

        cache.get_manifest("com.example.rest", true).await.unwrap();
        cache.get_manifest("com.example.rest", false).await.unwrap();
        assert_eq!(registry.code_requests("com.example.rest"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new()
                .with_manifest("com.example.rest", fixtures::rest_manifest("http://x/a"))
                .with_delay(Duration::from_millis(50)),
        );
        let cache = cache(dir.path(), registry.clone());

        let (a, b, c) = tokio::join!(
            cache.get_manifest("com.example.rest", true),
            cache.get_manifest("com.example.rest", true),
            cache.get_manifest("com.example.rest", true)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(registry.code_requests("com.example.rest"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_writes_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new()
                .with_manifest("com.example.rest", fixtures::rest_manifest("http://x/a"))
                .with_delay(Duration::from_millis(20)),
        );
        let cache = Arc::new(cache(dir.path(), registry.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_manifest("com.example.rest", i % 2 == 0).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(cache.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
        assert!(cache.manifest_path("com.example.rest").exists());
    }

    #[tokio::test]
    async fn test_unparseable_manifest_is_still_cached() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MockRegistry::new().with_text("com.example.broken", "{not json"));
        let cache = cache(dir.path(), registry.clone());

        let err = cache.get_manifest("com.example.broken", true).await.unwrap_err();
        assert!(matches!(err, LoaderError::Parse { .. }));
        assert_eq!(
            std::fs::read_to_string(cache.manifest_path("com.example.broken")).unwrap(),
            "{not json"
        );

        // served from disk the second time, still failing
        let err = cache.get_manifest("com.example.broken", true).await.unwrap_err();
        assert!(matches!(err, LoaderError::Parse { .. }));
        assert_eq!(registry.code_requests("com.example.broken"), 1);
    }

    #[tokio::test]
    async fn test_invalid_kind_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MockRegistry::new());
        let cache = cache(dir.path(), registry.clone());

        let err = cache.get_manifest("../etc/passwd", true).await.unwrap_err();
        assert!(matches!(err, LoaderError::InvalidKind(_)));
        assert_eq!(registry.code_requests("../etc/passwd"), 0);
    }

    #[tokio::test]
    async fn test_cached_metas() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new()
                .with_manifest("b.rest", fixtures::rest_manifest("http://x/b"))
                .with_manifest("a.rest", fixtures::rest_manifest("http://x/a"))
                .with_text("c.broken", "[]"),
        );
        let cache = cache(dir.path(), registry);

        for kind in ["b.rest", "a.rest", "c.broken"] {
            let _ = cache.get_manifest(kind, true).await;
        }
        // leftovers of an interrupted write are not manifests
        std::fs::write(cache.dir().join("d.rest.manifest.tmp"), "{").unwrap();

        let metas = cache.cached_metas().await.unwrap();
        let kinds: Vec<_> = metas.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, vec!["a.rest", "b.rest", "c.broken"]);
        assert_eq!(metas[0].version, Some(1));
        assert!(metas[2].error.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_manifest_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            MockRegistry::new().with_manifest("com.example.rest", fixtures::rest_manifest("http://x/a")),
        );
        let cache = cache(dir.path(), registry);
        cache.get_manifest("com.example.rest", true).await.unwrap();

        let mode = std::fs::metadata(cache.manifest_path("com.example.rest"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
