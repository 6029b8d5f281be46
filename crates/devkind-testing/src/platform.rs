//! Platform rooted in a temporary directory.

use devkind_core::{Capability, LocalPlatform, Platform, Unzip};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Cache and temp directories live under one [`TempDir`], removed on drop.
pub struct TempPlatform {
    root: TempDir,
    inner: LocalPlatform,
}

impl TempPlatform {
    /// Platform with the code-download capability enabled.
    pub fn new() -> std::io::Result<Self> {
        let root = tempfile::tempdir()?;
        let cache = root.path().join("cache");
        let tmp = root.path().join("tmp");
        std::fs::create_dir_all(&cache)?;
        std::fs::create_dir_all(&tmp)?;

        let inner = LocalPlatform::new(cache).with_tmp_dir(tmp);
        Ok(Self { root, inner })
    }

    pub fn without_code_download(mut self) -> Self {
        self.inner = self.inner.without_code_download();
        self
    }

    pub fn with_unzip(mut self, unzip: Arc<dyn Unzip>) -> Self {
        self.inner = self.inner.with_unzip(Some(unzip));
        self
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Files left in the temp directory.
    pub fn tmp_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.inner.tmp_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

impl Platform for TempPlatform {
    fn cache_dir(&self) -> PathBuf {
        self.inner.cache_dir()
    }

    fn tmp_dir(&self) -> PathBuf {
        self.inner.tmp_dir()
    }

    fn has_capability(&self, name: &str) -> bool {
        self.inner.has_capability(name)
    }

    fn get_capability(&self, name: &str) -> Option<Capability> {
        self.inner.get_capability(name)
    }
}
