//! Protocol adapters built from declarative manifests.
//!
//! No per-device code: each query and action becomes a strategy object
//! driven by its [`FunctionSpec`](devkind_core::FunctionSpec).

pub mod auth;
pub mod http;
pub mod oauth;
pub mod rest;
pub mod rss;

pub use auth::{basic_auth, AuthHeader};
pub use oauth::{OAuth2Flow, OAuthTokens};
pub use rest::{build_rest_class, RestAction, RestQuery};
pub use rss::{build_rss_class, parse_feed, RssQuery};

use crate::device::DeviceClass;
use devkind_core::{DeviceManifest, LoaderError, LoaderResult, ModuleType};
use std::sync::Arc;

/// Build the device class of a declarative manifest.
pub fn build_generic_class(
    manifest: Arc<DeviceManifest>,
    http: reqwest::Client,
) -> LoaderResult<DeviceClass> {
    match manifest.module_type {
        ModuleType::GenericRest => build_rest_class(manifest, http),
        ModuleType::Rss => build_rss_class(manifest, http),
        other => Err(LoaderError::Implementation(format!(
            "{} is not a declarative module type",
            other
        ))),
    }
}
