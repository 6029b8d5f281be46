//! Testing utilities for the device kind resolver
//!
//! This crate provides:
//! - An in-memory registry client with request counters
//! - A platform rooted in a temporary directory
//! - A zip bundle builder for packaged code
//! - Manifest fixtures

pub mod bundle;
pub mod fixtures;
pub mod platform;
pub mod registry;

pub use bundle::BundleBuilder;
pub use platform::TempPlatform;
pub use registry::MockRegistry;
