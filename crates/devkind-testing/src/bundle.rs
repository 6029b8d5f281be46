//! Zip bundles for packaged code tests.

use serde_json::json;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

/// Builds an in-memory code bundle with a `package.json` marker.
pub struct BundleBuilder {
    name: String,
    package_version: Option<i64>,
    files: Vec<(String, Vec<u8>)>,
}

impl BundleBuilder {
    pub fn new(name: &str, package_version: i64) -> Self {
        Self {
            name: name.to_string(),
            package_version: Some(package_version),
            files: Vec::new(),
        }
    }

    /// Bundle whose marker carries no version.
    pub fn unversioned(name: &str) -> Self {
        Self {
            name: name.to_string(),
            package_version: None,
            files: Vec::new(),
        }
    }

    pub fn file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.to_string(), contents.into()));
        self
    }

    pub fn build(self) -> zip::result::ZipResult<Vec<u8>> {
        let mut package = json!({ "name": self.name, "main": self.name });
        if let Some(version) = self.package_version {
            package["package-version"] = json!(version);
        }

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("package.json", options)?;
        writer.write_all(package.to_string().as_bytes())?;
        for (path, contents) in &self.files {
            writer.start_file(path.as_str(), options)?;
            writer.write_all(contents)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}
