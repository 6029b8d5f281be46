//! Packaged code loader.
//!
//! A packaged kind ships a versioned zip bundle. The bundle is extracted to
//! `<cache>/device-classes/<kind>/` and its `package.json` carries a
//! `package-version` marker that must equal the manifest's
//! `package_version`. A stale bundle is discarded and downloaded again.
//!
//! Bundles carry data; the code behind them is registered in-process through
//! a [`ModuleLoader`], keyed by the package entry point.

use crate::device::DeviceClass;
use crate::factory::DeviceFactory;
use crate::module::DeviceModule;
use async_trait::async_trait;
use devkind_core::config::defaults;
use devkind_core::{
    DeviceManifest, LoaderError, LoaderResult, Platform, RegistryClient,
};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Package marker found at the root of an extracted bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub name: String,
    /// Entry point; falls back to `name` when absent.
    #[serde(default)]
    pub main: Option<String>,
    #[serde(rename = "package-version", default)]
    pub version: Option<i64>,
}

impl PackageInfo {
    pub fn entry_point(&self) -> &str {
        self.main.as_deref().unwrap_or(&self.name)
    }
}

/// Turns an extracted bundle into a device module.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, kind: &str, bundle_dir: &Path, package: &PackageInfo) -> LoaderResult<DeviceModule>;
}

pub type ModuleConstructor = Arc<dyn Fn(&Path) -> anyhow::Result<DeviceModule> + Send + Sync>;

/// Loader over constructors registered at startup.
///
/// Each load calls the constructor again, so a reloaded bundle always yields
/// a fresh module.
#[derive(Default)]
pub struct StaticModuleLoader {
    constructors: RwLock<HashMap<String, ModuleConstructor>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, entry_point: impl Into<String>, constructor: F)
    where
        F: Fn(&Path) -> anyhow::Result<DeviceModule> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(entry_point.into(), Arc::new(constructor));
    }

    pub fn with<F>(self, entry_point: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Path) -> anyhow::Result<DeviceModule> + Send + Sync + 'static,
    {
        self.register(entry_point, constructor);
        self
    }
}

#[async_trait]
impl ModuleLoader for StaticModuleLoader {
    async fn load(&self, kind: &str, bundle_dir: &Path, package: &PackageInfo) -> LoaderResult<DeviceModule> {
        let entry_point = package.entry_point();
        let constructor = self
            .constructors
            .read()
            .get(entry_point)
            .cloned()
            .ok_or_else(|| {
                LoaderError::Implementation(format!(
                    "No implementation registered for package {} of {}",
                    entry_point, kind
                ))
            })?;
        constructor(bundle_dir).map_err(|e| LoaderError::Implementation(format!("{:#}", e)))
    }
}

/// What a packaged factory needs from the resolver that owns it.
#[async_trait]
pub(crate) trait ModuleHost: Send + Sync {
    async fn load_manifest(&self, kind: &str, allow_cached: bool) -> LoaderResult<Arc<DeviceManifest>>;
    fn inject(&self, kind: &str, factory: Arc<DeviceFactory>);
}

/// Collaborators shared by every packaged factory of a resolver.
#[derive(Clone)]
pub(crate) struct PackagedContext {
    pub registry: Arc<dyn RegistryClient>,
    pub platform: Arc<dyn Platform>,
    pub loader: Arc<dyn ModuleLoader>,
    pub http: reqwest::Client,
    pub host: Weak<dyn ModuleHost>,
}

type LoadFuture = Shared<BoxFuture<'static, LoaderResult<Arc<DeviceClass>>>>;

/// Bundle directory of `kind` under the platform cache.
pub fn bundle_dir(platform: &dyn Platform, kind: &str) -> PathBuf {
    platform
        .cache_dir()
        .join(defaults::DEVICE_CLASSES_DIR)
        .join(kind)
}

/// Read the package marker of an extracted bundle.
pub async fn read_package(dir: &Path) -> LoaderResult<PackageInfo> {
    let text = tokio::fs::read_to_string(dir.join(defaults::PACKAGE_FILE)).await?;
    serde_json::from_str(&text)
        .map_err(|e| LoaderError::Implementation(format!("Invalid {}: {}", defaults::PACKAGE_FILE, e)))
}

async fn remove_dir_if_exists(dir: &Path) -> LoaderResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub struct PackagedCodeFactory {
    manifest: Arc<DeviceManifest>,
    ctx: PackagedContext,
    loading: Mutex<Option<LoadFuture>>,
    children: Mutex<HashMap<String, Arc<DeviceFactory>>>,
}

impl PackagedCodeFactory {
    pub(crate) fn new(manifest: Arc<DeviceManifest>, ctx: PackagedContext) -> Arc<Self> {
        Arc::new(Self {
            manifest,
            ctx,
            loading: Mutex::new(None),
            children: Mutex::new(HashMap::new()),
        })
    }

    pub fn kind(&self) -> &str {
        &self.manifest.kind
    }

    pub fn manifest(&self) -> &Arc<DeviceManifest> {
        &self.manifest
    }

    pub fn package_version(&self) -> Option<i64> {
        self.manifest.package_version
    }

    pub fn bundle_dir(&self) -> PathBuf {
        bundle_dir(self.ctx.platform.as_ref(), self.kind())
    }

    /// Forget the loaded class. The extracted bundle stays on disk.
    pub fn clear_cache(&self) {
        *self.loading.lock() = None;
    }

    pub fn child_factories(&self) -> HashMap<String, Arc<DeviceFactory>> {
        self.children.lock().clone()
    }

    /// Load the bundle once; concurrent callers share the same load.
    pub async fn get_instance_constructor(self: &Arc<Self>) -> LoaderResult<Arc<DeviceClass>> {
        let future = {
            let mut loading = self.loading.lock();
            match loading.as_ref() {
                Some(future) => future.clone(),
                None => {
                    let this = Arc::clone(self);
                    let future = async move { this.load().await }.boxed().shared();
                    *loading = Some(future.clone());
                    future
                }
            }
        };

        let result = future.clone().await;
        if result.is_err() {
            let mut loading = self.loading.lock();
            if loading.as_ref().is_some_and(|current| current.ptr_eq(&future)) {
                *loading = None;
            }
        }
        result
    }

    async fn load(self: Arc<Self>) -> LoaderResult<Arc<DeviceClass>> {
        let wanted = self.manifest.package_version.ok_or_else(|| {
            LoaderError::parse(self.kind(), "packaged device is missing package_version")
        })?;
        let dir = self.bundle_dir();

        if tokio::fs::try_exists(&dir).await? {
            match read_package(&dir).await {
                Ok(package) if package.version == Some(wanted) => {
                    return self.complete_loading(&dir, package).await;
                }
                Ok(package) => {
                    warn!(
                        kind = %self.kind(),
                        found = ?package.version,
                        wanted,
                        "Cached package is out of date"
                    );
                }
                Err(e) => {
                    warn!(kind = %self.kind(), "Cached package is unreadable: {}", e);
                }
            }
            remove_dir_if_exists(&dir).await?;
        }

        self.download(&dir).await?;

        let package = read_package(&dir).await?;
        if package.version != Some(wanted) {
            return Err(LoaderError::VersionMismatch {
                kind: self.kind().to_string(),
                found: package.version,
                wanted,
            });
        }
        self.complete_loading(&dir, package).await
    }

    async fn download(&self, dir: &Path) -> LoaderResult<()> {
        let unzip = self
            .ctx
            .platform
            .unzipper()
            .ok_or_else(|| LoaderError::Unsupported(self.kind().to_string()))?;

        let location = self
            .ctx
            .registry
            .get_module_location(self.kind(), self.manifest.version)
            .await?;
        info!(kind = %self.kind(), location = %location, "Downloading code bundle");

        let response = self
            .ctx
            .http
            .get(&location)
            .send()
            .await
            .map_err(|e| LoaderError::Registry(format!("Bundle download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(LoaderError::Http {
                status: response.status().as_u16(),
                url: location,
            });
        }

        let tmp_dir = self.ctx.platform.tmp_dir();
        tokio::fs::create_dir_all(&tmp_dir).await?;
        // owner-only permissions on unix
        let archive = tempfile::Builder::new()
            .prefix(&format!("devkind-{}-", self.kind()))
            .suffix(".zip")
            .tempfile_in(&tmp_dir)?;

        let mut file = tokio::fs::File::from_std(archive.reopen()?);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| LoaderError::Registry(format!("Bundle download failed: {}", e)))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::create_dir_all(dir).await?;
        if let Err(e) = unzip.unzip(archive.path(), dir).await {
            remove_dir_if_exists(dir).await?;
            return Err(e);
        }
        archive.close()?;

        info!(kind = %self.kind(), path = %dir.display(), "Code bundle extracted");
        Ok(())
    }

    async fn complete_loading(&self, dir: &Path, package: PackageInfo) -> LoaderResult<Arc<DeviceClass>> {
        let module = self.ctx.loader.load(self.kind(), dir, &package).await?;
        let class = Arc::new(module.bind(Arc::clone(&self.manifest), self.ctx.http.clone())?);

        let host = self.ctx.host.upgrade();
        let mut children = HashMap::new();
        for child in &self.manifest.child_types {
            let Some(submodule) = module.get_subdevice(child) else {
                warn!(
                    kind = %self.kind(),
                    child = %child,
                    "Child device is not declared in the bundle's subdevices, skipping"
                );
                continue;
            };
            let Some(host) = host.as_ref() else {
                warn!(kind = %self.kind(), child = %child, "Resolver gone, child not registered");
                continue;
            };

            let child_manifest = host.load_manifest(child, true).await?;
            let factory = Arc::new(DeviceFactory::child(
                child_manifest,
                submodule.clone(),
                self.ctx.http.clone(),
            ));
            host.inject(child, Arc::clone(&factory));
            children.insert(child.clone(), factory);
        }
        *self.children.lock() = children;

        info!(
            kind = %self.kind(),
            package_version = ?package.version,
            "Loaded packaged device"
        );
        Ok(class)
    }
}
