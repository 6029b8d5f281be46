//! In-memory registry client.

use async_trait::async_trait;
use devkind_core::{LoaderError, LoaderResult, RegistryClient};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Registry double serving manifests from memory and counting requests.
#[derive(Default)]
pub struct MockRegistry {
    manifests: Mutex<HashMap<String, String>>,
    locations: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, LoaderError>>,
    code_requests: Mutex<HashMap<String, usize>>,
    location_requests: Mutex<HashMap<String, Vec<i64>>>,
    delay: Option<Duration>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(self, kind: &str, manifest: Value) -> Self {
        self.set_manifest(kind, manifest);
        self
    }

    pub fn with_text(self, kind: &str, text: &str) -> Self {
        self.set_text(kind, text);
        self
    }

    /// Bundle download URL returned for `kind`.
    pub fn with_location(self, kind: &str, url: &str) -> Self {
        self.set_location(kind, url);
        self
    }

    /// Delay every manifest fetch, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_manifest(&self, kind: &str, manifest: Value) {
        self.set_text(kind, &manifest.to_string());
    }

    pub fn set_text(&self, kind: &str, text: &str) {
        self.manifests.lock().insert(kind.to_string(), text.to_string());
    }

    pub fn set_location(&self, kind: &str, url: &str) {
        self.locations.lock().insert(kind.to_string(), url.to_string());
    }

    /// Make every fetch of `kind` fail until cleared with `None`.
    pub fn set_failure(&self, kind: &str, error: Option<LoaderError>) {
        let mut failures = self.failures.lock();
        match error {
            Some(error) => failures.insert(kind.to_string(), error),
            None => failures.remove(kind),
        };
    }

    pub fn code_requests(&self, kind: &str) -> usize {
        self.code_requests.lock().get(kind).copied().unwrap_or(0)
    }

    pub fn location_requests(&self, kind: &str) -> usize {
        self.location_requests
            .lock()
            .get(kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Manifest versions passed to bundle location requests, in order.
    pub fn requested_versions(&self, kind: &str) -> Vec<i64> {
        self.location_requests
            .lock()
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn get_device_code(&self, kind: &str) -> LoaderResult<String> {
        *self.code_requests.lock().entry(kind.to_string()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().get(kind) {
            return Err(error.clone());
        }
        self.manifests
            .lock()
            .get(kind)
            .cloned()
            .ok_or_else(|| LoaderError::Registry("Unexpected HTTP error 404".to_string()))
    }

    async fn get_module_location(&self, kind: &str, version: i64) -> LoaderResult<String> {
        self.location_requests
            .lock()
            .entry(kind.to_string())
            .or_default()
            .push(version);

        self.locations
            .lock()
            .get(kind)
            .cloned()
            .ok_or_else(|| LoaderError::Registry("Unexpected HTTP error 404".to_string()))
    }
}
