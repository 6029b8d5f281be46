//! Host platform abstraction: directories and optional capabilities.

use crate::error::{LoaderError, LoaderResult};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Capability name granting code bundle extraction.
pub const CODE_DOWNLOAD_CAPABILITY: &str = "code-download";

/// Archive extraction.
#[async_trait]
pub trait Unzip: Send + Sync {
    async fn unzip(&self, archive: &Path, dest: &Path) -> LoaderResult<()>;
}

/// Optional platform capability.
#[derive(Clone)]
pub enum Capability {
    CodeDownload(Arc<dyn Unzip>),
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::CodeDownload(_) => f.write_str("CodeDownload"),
        }
    }
}

/// Host environment the engine runs in.
pub trait Platform: Send + Sync {
    fn cache_dir(&self) -> PathBuf;
    fn tmp_dir(&self) -> PathBuf;
    fn has_capability(&self, name: &str) -> bool;
    fn get_capability(&self, name: &str) -> Option<Capability>;

    /// Unzip capability, if the platform allows code downloads.
    fn unzipper(&self) -> Option<Arc<dyn Unzip>> {
        match self.get_capability(CODE_DOWNLOAD_CAPABILITY)? {
            Capability::CodeDownload(unzip) => Some(unzip),
        }
    }
}

/// Extracts zip archives with the `zip` crate on a blocking thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

#[async_trait]
impl Unzip for ZipExtractor {
    async fn unzip(&self, archive: &Path, dest: &Path) -> LoaderResult<()> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || -> LoaderResult<()> {
            let file = File::open(&archive)?;
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| LoaderError::Io(format!("Invalid archive {}: {}", archive.display(), e)))?;
            zip.extract(&dest)
                .map_err(|e| LoaderError::Io(format!("Failed to extract archive: {}", e)))
        })
        .await
        .map_err(|e| LoaderError::Io(format!("Extraction task failed: {}", e)))?
    }
}

/// Platform backed by local directories.
#[derive(Clone)]
pub struct LocalPlatform {
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
    unzip: Option<Arc<dyn Unzip>>,
}

impl LocalPlatform {
    /// Platform with the code-download capability enabled.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            tmp_dir: std::env::temp_dir(),
            unzip: Some(Arc::new(ZipExtractor)),
        }
    }

    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    pub fn with_unzip(mut self, unzip: Option<Arc<dyn Unzip>>) -> Self {
        self.unzip = unzip;
        self
    }

    pub fn without_code_download(self) -> Self {
        self.with_unzip(None)
    }
}

impl Platform for LocalPlatform {
    fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir.clone()
    }

    fn has_capability(&self, name: &str) -> bool {
        name == CODE_DOWNLOAD_CAPABILITY && self.unzip.is_some()
    }

    fn get_capability(&self, name: &str) -> Option<Capability> {
        if name == CODE_DOWNLOAD_CAPABILITY {
            self.unzip.clone().map(Capability::CodeDownload)
        } else {
            None
        }
    }
}
