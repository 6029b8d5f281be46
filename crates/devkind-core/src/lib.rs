//! Core types for device kind resolution.
//!
//! This crate holds the data model shared by the resolver and its
//! collaborators:
//!
//! - [`manifest`]: parsed device descriptors
//! - [`types`] and [`value`]: declared argument types and runtime values
//! - [`error`]: the [`LoaderError`] taxonomy
//! - [`client`], [`platform`], [`parser`]: collaborator interfaces with
//!   default implementations
//! - [`config`] and [`logging`]: ambient setup

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod parser;
pub mod platform;
pub mod types;
pub mod units;
pub mod value;

pub use client::{HttpRegistryClient, RegistryClient};
pub use config::LoaderConfig;
pub use error::{LoaderError, LoaderResult};
pub use manifest::{
    validate_kind, ArgSpec, AuthSpec, Category, DeviceManifest, DiscoveryProtocol, FunctionSpec,
    HttpMethod, ModuleType, OAuth2Spec,
};
pub use parser::{JsonManifestParser, ManifestParser};
pub use platform::{
    Capability, LocalPlatform, Platform, Unzip, ZipExtractor, CODE_DOWNLOAD_CAPABILITY,
};
pub use types::TypeTag;
pub use value::{DeviceState, Params, Record, Value};
