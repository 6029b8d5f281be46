//! Device manifest data model.
//!
//! A manifest is the parsed descriptor of a device kind: how it authenticates,
//! which queries and actions it exposes, and which implementation strategy
//! backs it. Manifests are immutable once parsed; a re-fetch produces a new
//! value.

use crate::error::{LoaderError, LoaderResult};
use crate::types::TypeTag;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Implementation strategy of a device kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    /// Linked into the host process.
    Builtin,
    /// Declarative REST endpoints.
    GenericRest,
    /// Declarative RSS/Atom feeds.
    Rss,
    /// Independently downloadable code bundle.
    Packaged,
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleType::Builtin => "builtin",
            ModuleType::GenericRest => "generic_rest",
            ModuleType::Rss => "rss",
            ModuleType::Packaged => "packaged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryProtocol {
    Bluetooth,
    Upnp,
}

/// OAuth2 three-legged configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Spec {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    #[serde(default)]
    pub scope: Vec<String>,
    /// Profile fields copied into device state; empty stores the whole profile.
    #[serde(default)]
    pub profile_fields: Vec<String>,
    #[serde(default)]
    pub get_profile_url: Option<String>,
    /// Include the `state` parameter in the authorize URL.
    #[serde(default)]
    pub set_state: bool,
}

/// How a device authenticates against its service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSpec {
    #[default]
    None,
    Basic,
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Spec),
    Discovery {
        discovery_type: DiscoveryProtocol,
    },
    Interactive,
    Builtin,
}

impl AuthSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            AuthSpec::None => "none",
            AuthSpec::Basic => "basic",
            AuthSpec::OAuth2(_) => "oauth2",
            AuthSpec::Discovery { .. } => "discovery",
            AuthSpec::Interactive => "interactive",
            AuthSpec::Builtin => "builtin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Data,
    Online,
    Physical,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Declared argument of a query or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub is_input: bool,
    #[serde(default)]
    pub required: bool,
    /// Dotted extraction path; defaults to `name`.
    #[serde(default)]
    pub json_key: Option<String>,
}

impl ArgSpec {
    pub fn key(&self) -> &str {
        self.json_key.as_deref().unwrap_or(&self.name)
    }
}

fn default_poll_interval() -> i64 {
    -1
}

/// Declared query or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// URL template, REST and RSS only.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    /// Body defaults; call parameters win on conflict.
    #[serde(default, alias = "default")]
    pub default_params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub json_key: Option<String>,
    /// Milliseconds. 0 needs a custom subscribe, negative is not monitorable.
    #[serde(default = "default_poll_interval", alias = "poll-interval")]
    pub poll_interval: i64,
    #[serde(default)]
    pub doc: Option<String>,
}

impl Default for FunctionSpec {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            url: None,
            method: None,
            default_params: serde_json::Map::new(),
            json_key: None,
            poll_interval: default_poll_interval(),
            doc: None,
        }
    }
}

impl FunctionSpec {
    pub fn output_args(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args.iter().filter(|a| !a.is_input)
    }

    pub fn input_args(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args.iter().filter(|a| a.is_input)
    }
}

/// Parsed descriptor of a device kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceManifest {
    #[serde(default)]
    pub kind: String,
    pub module_type: ModuleType,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub package_version: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub auth: AuthSpec,
    /// Configuration parameters collected at setup time.
    #[serde(default)]
    pub params: Vec<String>,
    /// Extended kinds and discovery-derived types.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub child_types: Vec<String>,
    #[serde(default)]
    pub queries: IndexMap<String, FunctionSpec>,
    #[serde(default)]
    pub actions: IndexMap<String, FunctionSpec>,
}

impl DeviceManifest {
    /// Minimal manifest with no functions.
    pub fn new(kind: impl Into<String>, module_type: ModuleType) -> Self {
        Self {
            kind: kind.into(),
            module_type,
            version: 0,
            package_version: None,
            name: None,
            description: None,
            category: Category::default(),
            auth: AuthSpec::default(),
            params: Vec::new(),
            types: Vec::new(),
            child_types: Vec::new(),
            queries: IndexMap::new(),
            actions: IndexMap::new(),
        }
    }

    pub fn query(&self, name: &str) -> Option<&FunctionSpec> {
        self.queries.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&FunctionSpec> {
        self.actions.get(name)
    }

    /// Structural checks standing in for the manifest typechecker.
    pub fn validate(&self) -> Result<(), String> {
        if self.module_type == ModuleType::Packaged && self.package_version.is_none() {
            return Err("packaged device is missing package_version".to_string());
        }
        if matches!(self.module_type, ModuleType::GenericRest | ModuleType::Rss) {
            let functions = self
                .queries
                .iter()
                .map(|(n, f)| ("query", n, f))
                .chain(self.actions.iter().map(|(n, f)| ("action", n, f)));
            for (function_type, name, function) in functions {
                if function.url.as_deref().map_or(true, str::is_empty) {
                    return Err(format!("{} {} has no url", function_type, name));
                }
            }
        }
        for (name, function) in self.queries.iter().chain(self.actions.iter()) {
            let mut seen = std::collections::HashSet::new();
            for arg in &function.args {
                if !seen.insert(arg.name.as_str()) {
                    return Err(format!("duplicate argument {} in {}", arg.name, name));
                }
            }
        }
        Ok(())
    }
}

/// Kinds double as file names in the cache directory.
pub fn validate_kind(kind: &str) -> LoaderResult<()> {
    let valid = !kind.is_empty()
        && !kind.starts_with('.')
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(LoaderError::InvalidKind(kind.to_string()))
    }
}
