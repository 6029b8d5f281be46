//! Resolution engine: device kind to device factory.
//!
//! Every kind has at most one pipeline (manifest fetch, parse, build) in
//! flight. Concurrent callers share a single [`Shared`] future; a failed
//! pipeline is evicted so the next caller starts over. Invalidation swaps a
//! refresh pipeline into the same slot, so it never runs beside a resolve.

use crate::builtin::BuiltinRegistry;
use crate::cache::ManifestCache;
use crate::device::DeviceClass;
use crate::factory::DeviceFactory;
use crate::packaged::{self, ModuleHost, ModuleLoader, PackagedCodeFactory, PackagedContext, StaticModuleLoader};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use devkind_core::{
    validate_kind, DeviceManifest, JsonManifestParser, LoaderConfig, LoaderError, LoaderResult,
    ManifestParser, ModuleType, Platform, RegistryClient,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

type FactoryFuture = Shared<BoxFuture<'static, LoaderResult<Arc<DeviceFactory>>>>;

struct InFlight {
    id: u64,
    future: FactoryFuture,
}

enum Pipeline {
    /// Build from the cached manifest when it is fresh.
    Resolve,
    /// Retire the previous factory, drop its bundle and refetch the manifest.
    Refresh { previous: Option<FactoryFuture> },
}

/// Resolves device kinds into factories, coalescing concurrent requests.
#[derive(Clone)]
pub struct DeviceResolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    weak: Weak<ResolverInner>,
    cache: ManifestCache,
    platform: Arc<dyn Platform>,
    registry: Arc<dyn RegistryClient>,
    loader: Arc<dyn ModuleLoader>,
    builtins: BuiltinRegistry,
    http: reqwest::Client,
    requests: DashMap<String, InFlight>,
    next_id: AtomicU64,
}

pub struct DeviceResolverBuilder {
    registry: Arc<dyn RegistryClient>,
    platform: Arc<dyn Platform>,
    parser: Arc<dyn ManifestParser>,
    loader: Arc<dyn ModuleLoader>,
    builtins: BuiltinRegistry,
    config: LoaderConfig,
}

impl DeviceResolverBuilder {
    pub fn parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn module_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn builtins(mut self, builtins: BuiltinRegistry) -> Self {
        self.builtins = builtins;
        self
    }

    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> DeviceResolver {
        let cache = ManifestCache::new(
            &self.platform.cache_dir(),
            Arc::clone(&self.registry),
            self.parser,
            self.config.manifest_ttl(),
        );
        let http = self.config.http_client();

        let inner = Arc::new_cyclic(|weak| ResolverInner {
            weak: weak.clone(),
            cache,
            platform: self.platform,
            registry: self.registry,
            loader: self.loader,
            builtins: self.builtins,
            http,
            requests: DashMap::new(),
            next_id: AtomicU64::new(0),
        });
        DeviceResolver { inner }
    }
}

impl DeviceResolver {
    /// Resolver with the JSON parser, no packaged implementations and no builtins.
    pub fn builder(registry: Arc<dyn RegistryClient>, platform: Arc<dyn Platform>) -> DeviceResolverBuilder {
        DeviceResolverBuilder {
            registry,
            platform,
            parser: Arc::new(JsonManifestParser),
            loader: Arc::new(StaticModuleLoader::new()),
            builtins: BuiltinRegistry::new(),
            config: LoaderConfig::default(),
        }
    }

    pub fn manifest_cache(&self) -> &ManifestCache {
        &self.inner.cache
    }

    /// Factory of `kind`. Concurrent calls share one pipeline.
    pub async fn resolve(&self, kind: &str) -> LoaderResult<Arc<DeviceFactory>> {
        validate_kind(kind)?;
        self.inner.request(kind).await
    }

    /// Resolve `kind` and load its device class.
    pub async fn get_device_class(&self, kind: &str) -> LoaderResult<Arc<DeviceClass>> {
        self.resolve(kind).await?.get_instance_constructor().await
    }

    /// Replace whatever is registered for `kind` with a ready factory.
    pub fn inject(&self, kind: &str, factory: Arc<DeviceFactory>) -> LoaderResult<()> {
        validate_kind(kind)?;
        self.inner.inject(kind, factory);
        Ok(())
    }

    /// Drop everything known about `kind` and resolve it again from the registry.
    ///
    /// The previous factory's cache is cleared, the extracted bundle (if any)
    /// is deleted and the manifest is re-fetched regardless of its age.
    /// Resolves issued after this call join the refresh.
    pub async fn invalidate(&self, kind: &str) -> LoaderResult<()> {
        validate_kind(kind)?;
        info!(kind = %kind, "Invalidating device kind");
        self.inner.refresh(kind).await.map(|_| ())
    }

    /// Kinds with a pending or resolved factory.
    pub fn resolved_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.inner.requests.iter().map(|r| r.key().clone()).collect();
        kinds.sort();
        kinds
    }
}

impl ResolverInner {
    fn request(&self, kind: &str) -> FactoryFuture {
        match self.requests.entry(kind.to_string()) {
            Entry::Occupied(entry) => entry.get().future.clone(),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let future = self.spawn_pipeline(kind.to_string(), Pipeline::Resolve, id);
                entry.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        }
    }

    /// Swap a refresh pipeline into the slot of `kind` in one map operation.
    fn refresh(&self, kind: &str) -> FactoryFuture {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.requests.entry(kind.to_string()) {
            Entry::Occupied(mut entry) => {
                let previous = Some(entry.get().future.clone());
                let future = self.spawn_pipeline(kind.to_string(), Pipeline::Refresh { previous }, id);
                entry.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
            Entry::Vacant(entry) => {
                let future =
                    self.spawn_pipeline(kind.to_string(), Pipeline::Refresh { previous: None }, id);
                entry.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        }
    }

    /// Run the pipeline on its own task, so it completes even if every caller goes away.
    fn spawn_pipeline(&self, kind: String, pipeline: Pipeline, id: u64) -> FactoryFuture {
        let weak = self.weak.clone();
        let handle = tokio::spawn(async move {
            let Some(this) = weak.upgrade() else {
                return Err(LoaderError::Implementation("Resolver was dropped".to_string()));
            };
            let result = this.run_pipeline(&kind, pipeline).await;
            if let Err(e) = &result {
                warn!(kind = %kind, "Failed to resolve device kind: {}", e);
                this.requests.remove_if(&kind, |_, request| request.id == id);
            }
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(LoaderError::Implementation(format!("Resolution task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    async fn run_pipeline(&self, kind: &str, pipeline: Pipeline) -> LoaderResult<Arc<DeviceFactory>> {
        match pipeline {
            Pipeline::Resolve => self.build_factory(kind, true).await,
            Pipeline::Refresh { previous } => {
                if let Some(previous) = previous {
                    self.retire(previous).await;
                }
                self.remove_bundle(kind).await?;
                self.build_factory(kind, false).await
            }
        }
    }

    /// Clear a replaced factory and forget the child kinds it registered.
    async fn retire(&self, previous: FactoryFuture) {
        // a failed pipeline left nothing to clean up
        let Ok(factory) = previous.await else {
            return;
        };
        factory.clear_cache();
        for child in factory.child_factories().keys() {
            self.requests.remove(child);
        }
    }

    async fn remove_bundle(&self, kind: &str) -> LoaderResult<()> {
        let dir = packaged::bundle_dir(self.platform.as_ref(), kind);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(kind = %kind, "Removed code bundle");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_factory(&self, kind: &str, allow_cached: bool) -> LoaderResult<Arc<DeviceFactory>> {
        let manifest = self.cache.get_manifest(kind, allow_cached).await?;
        info!(
            kind = %kind,
            module_type = %manifest.module_type,
            version = manifest.version,
            "Loaded manifest"
        );

        let factory = match manifest.module_type {
            ModuleType::Builtin => {
                let module = self
                    .builtins
                    .get(kind)
                    .ok_or_else(|| LoaderError::Unsupported(kind.to_string()))?;
                DeviceFactory::builtin(manifest, module.clone(), self.http.clone())
            }
            ModuleType::GenericRest | ModuleType::Rss => {
                DeviceFactory::generic(manifest, self.http.clone())
            }
            ModuleType::Packaged => {
                DeviceFactory::Packaged(PackagedCodeFactory::new(manifest, self.packaged_context()))
            }
        };
        Ok(Arc::new(factory))
    }

    fn packaged_context(&self) -> PackagedContext {
        let host: Weak<dyn ModuleHost> = self.weak.clone();
        PackagedContext {
            registry: Arc::clone(&self.registry),
            platform: Arc::clone(&self.platform),
            loader: Arc::clone(&self.loader),
            http: self.http.clone(),
            host,
        }
    }
}

#[async_trait]
impl ModuleHost for ResolverInner {
    /// Joins a pipeline already running for `kind` before touching the cache.
    async fn load_manifest(&self, kind: &str, allow_cached: bool) -> LoaderResult<Arc<DeviceManifest>> {
        let pending = if allow_cached {
            self.requests.get(kind).map(|request| request.future.clone())
        } else {
            None
        };
        if let Some(pending) = pending {
            if let Ok(factory) = pending.await {
                return Ok(Arc::clone(factory.manifest()));
            }
        }
        self.cache.get_manifest(kind, allow_cached).await
    }

    fn inject(&self, kind: &str, factory: Arc<DeviceFactory>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let future = futures::future::ready(Ok(factory)).boxed().shared();
        self.requests.insert(kind.to_string(), InFlight { id, future });
        debug!(kind = %kind, "Injected device factory");
    }
}
