//! Statically registered device implementations.

use crate::module::DeviceModule;
use std::collections::HashMap;

/// In-process implementations of builtin kinds, keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    modules: HashMap<String, DeviceModule>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, module: DeviceModule) {
        self.modules.insert(kind.into(), module);
    }

    pub fn with(mut self, kind: impl Into<String>, module: DeviceModule) -> Self {
        self.register(kind, module);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&DeviceModule> {
        self.modules.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.modules.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}
