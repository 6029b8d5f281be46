//! Manifest text parsing.

use crate::error::{LoaderError, LoaderResult};
use crate::manifest::DeviceManifest;
use async_trait::async_trait;
use tracing::warn;

/// Turns manifest text into a checked [`DeviceManifest`].
#[async_trait]
pub trait ManifestParser: Send + Sync {
    async fn parse(&self, kind: &str, text: &str) -> LoaderResult<DeviceManifest>;
}

/// Parses the JSON manifest format and runs structural validation.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonManifestParser;

#[async_trait]
impl ManifestParser for JsonManifestParser {
    async fn parse(&self, kind: &str, text: &str) -> LoaderResult<DeviceManifest> {
        let mut manifest: DeviceManifest =
            serde_json::from_str(text).map_err(|e| LoaderError::parse(kind, e))?;

        if manifest.kind.is_empty() {
            manifest.kind = kind.to_string();
        } else if manifest.kind != kind {
            warn!(kind = %kind, declared = %manifest.kind, "Manifest declares a different kind");
            manifest.kind = kind.to_string();
        }

        manifest
            .validate()
            .map_err(|message| LoaderError::parse(kind, message))?;
        Ok(manifest)
    }
}
