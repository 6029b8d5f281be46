//! Device factories: the resolved form of a device kind.

use crate::adapters::build_generic_class;
use crate::device::DeviceClass;
use crate::module::DeviceModule;
use crate::packaged::PackagedCodeFactory;
use devkind_core::{DeviceManifest, LoaderResult, ModuleType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolved implementation of a device kind.
pub enum DeviceFactory {
    /// Compiled into the host.
    Builtin(StaticFactory),
    /// Built from a declarative REST or RSS manifest.
    Generic(GenericFactory),
    /// Backed by a downloaded code bundle.
    Packaged(Arc<PackagedCodeFactory>),
    /// Child kind implemented inside a parent's bundle.
    Child(StaticFactory),
}

impl DeviceFactory {
    pub fn builtin(manifest: Arc<DeviceManifest>, module: DeviceModule, http: reqwest::Client) -> Self {
        DeviceFactory::Builtin(StaticFactory::new(manifest, module, http))
    }

    pub fn generic(manifest: Arc<DeviceManifest>, http: reqwest::Client) -> Self {
        DeviceFactory::Generic(GenericFactory::new(manifest, http))
    }

    pub(crate) fn child(manifest: Arc<DeviceManifest>, module: DeviceModule, http: reqwest::Client) -> Self {
        DeviceFactory::Child(StaticFactory::new(manifest, module, http))
    }

    pub fn id(&self) -> &str {
        &self.manifest().kind
    }

    pub fn manifest(&self) -> &Arc<DeviceManifest> {
        match self {
            DeviceFactory::Builtin(f) | DeviceFactory::Child(f) => &f.manifest,
            DeviceFactory::Generic(f) => &f.manifest,
            DeviceFactory::Packaged(f) => f.manifest(),
        }
    }

    pub fn module_type(&self) -> ModuleType {
        self.manifest().module_type
    }

    /// Builtin kinds are versionless and always report 0.
    pub fn version(&self) -> i64 {
        match self {
            DeviceFactory::Builtin(_) => 0,
            _ => self.manifest().version,
        }
    }

    /// Drop the loaded class; the next constructor request loads it again.
    pub fn clear_cache(&self) {
        match self {
            DeviceFactory::Builtin(_) | DeviceFactory::Child(_) => {}
            DeviceFactory::Generic(f) => f.clear_cache(),
            DeviceFactory::Packaged(f) => f.clear_cache(),
        }
    }

    /// Load (or return the loaded) device class.
    pub async fn get_instance_constructor(&self) -> LoaderResult<Arc<DeviceClass>> {
        match self {
            DeviceFactory::Builtin(f) | DeviceFactory::Child(f) => f.get_instance_constructor(),
            DeviceFactory::Generic(f) => f.get_instance_constructor(),
            DeviceFactory::Packaged(f) => f.get_instance_constructor().await,
        }
    }

    /// Child kinds registered by the last load of a packaged bundle.
    pub fn child_factories(&self) -> HashMap<String, Arc<DeviceFactory>> {
        match self {
            DeviceFactory::Packaged(f) => f.child_factories(),
            _ => HashMap::new(),
        }
    }
}

impl std::fmt::Debug for DeviceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            DeviceFactory::Builtin(_) => "Builtin",
            DeviceFactory::Generic(_) => "Generic",
            DeviceFactory::Packaged(_) => "Packaged",
            DeviceFactory::Child(_) => "Child",
        };
        f.debug_struct(variant)
            .field("id", &self.id())
            .field("version", &self.version())
            .finish()
    }
}

/// Factory over an in-process module, bound once.
pub struct StaticFactory {
    manifest: Arc<DeviceManifest>,
    module: DeviceModule,
    http: reqwest::Client,
    class: Mutex<Option<Arc<DeviceClass>>>,
}

impl StaticFactory {
    fn new(manifest: Arc<DeviceManifest>, module: DeviceModule, http: reqwest::Client) -> Self {
        Self {
            manifest,
            module,
            http,
            class: Mutex::new(None),
        }
    }

    fn get_instance_constructor(&self) -> LoaderResult<Arc<DeviceClass>> {
        let mut class = self.class.lock();
        if let Some(class) = class.as_ref() {
            return Ok(Arc::clone(class));
        }
        let bound = Arc::new(self.module.bind(Arc::clone(&self.manifest), self.http.clone())?);
        *class = Some(Arc::clone(&bound));
        Ok(bound)
    }
}

/// Factory over a declarative manifest. Build failures are not remembered.
pub struct GenericFactory {
    manifest: Arc<DeviceManifest>,
    http: reqwest::Client,
    class: Mutex<Option<Arc<DeviceClass>>>,
}

impl GenericFactory {
    fn new(manifest: Arc<DeviceManifest>, http: reqwest::Client) -> Self {
        Self {
            manifest,
            http,
            class: Mutex::new(None),
        }
    }

    fn clear_cache(&self) {
        *self.class.lock() = None;
    }

    fn get_instance_constructor(&self) -> LoaderResult<Arc<DeviceClass>> {
        let mut class = self.class.lock();
        if let Some(class) = class.as_ref() {
            return Ok(Arc::clone(class));
        }
        let built = Arc::new(build_generic_class(Arc::clone(&self.manifest), self.http.clone())?);
        *class = Some(Arc::clone(&built));
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devkind_core::{FunctionSpec, LoaderError};

    fn rest_manifest(poll_interval: i64) -> Arc<DeviceManifest> {
        let mut manifest = DeviceManifest::new("com.example.rest", ModuleType::GenericRest);
        manifest.version = 4;
        manifest.queries.insert(
            "status".into(),
            FunctionSpec {
                url: Some("https://example.com/status".into()),
                poll_interval,
                ..Default::default()
            },
        );
        Arc::new(manifest)
    }

    #[tokio::test]
    async fn test_generic_factory_caches_class() {
        let factory = DeviceFactory::generic(rest_manifest(1000), reqwest::Client::new());
        assert_eq!(factory.id(), "com.example.rest");
        assert_eq!(factory.version(), 4);

        let first = factory.get_instance_constructor().await.unwrap();
        let second = factory.get_instance_constructor().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        factory.clear_cache();
        let third = factory.get_instance_constructor().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_generic_zero_poll_fails_at_construction() {
        let factory = DeviceFactory::generic(rest_manifest(0), reqwest::Client::new());
        let err = factory.get_instance_constructor().await.unwrap_err();
        assert!(matches!(err, LoaderError::Implementation(_)));
    }

    #[tokio::test]
    async fn test_builtin_version_is_zero() {
        let mut manifest = DeviceManifest::new("org.example.builtin", ModuleType::Builtin);
        manifest.version = 12;
        let factory = DeviceFactory::builtin(Arc::new(manifest), DeviceModule::new(), reqwest::Client::new());
        assert_eq!(factory.version(), 0);
        assert!(factory.get_instance_constructor().await.is_ok());
        assert!(factory.child_factories().is_empty());
    }
}
