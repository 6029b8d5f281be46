//! Device Kind Resolution Crate
//!
//! Turns an opaque device kind into a runnable device factory.
//!
//! ## Architecture
//!
//! - **DeviceResolver**: single-flight map from kind to factory
//! - **ManifestCache**: on-disk manifests with a staleness window
//! - **DeviceFactory**: builtin, generic (REST/RSS) or packaged code
//! - **Adapters**: declarative REST, RSS and OAuth2 wiring driven by manifests
//! - **DeviceClass / Device**: the loaded implementation and its instances
//!
//! Templating (`$name`, `${name:opt}`) and response extraction are plain
//! functions in [`template`] and [`extract`].

pub mod adapters;
pub mod builtin;
pub mod cache;
pub mod device;
pub mod extract;
pub mod factory;
pub mod module;
pub mod packaged;
pub mod resolver;
pub mod subscription;
pub mod template;

pub use adapters::{basic_auth, OAuth2Flow, OAuthTokens};
pub use builtin::BuiltinRegistry;
pub use cache::{CachedMeta, ManifestCache};
pub use device::{
    ActionHandler, Device, DeviceClass, Monitoring, QueryHandler, SubscribeHandler,
};
pub use factory::DeviceFactory;
pub use module::DeviceModule;
pub use packaged::{ModuleLoader, PackageInfo, PackagedCodeFactory, StaticModuleLoader};
pub use resolver::{DeviceResolver, DeviceResolverBuilder};
pub use subscription::{CancelHandle, Observation, Subscription};
pub use template::format_string;
