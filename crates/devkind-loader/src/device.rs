//! Device classes and instances.
//!
//! A [`DeviceClass`] is what a factory hands out: the manifest plus one
//! strategy object per query and action. Classes are immutable and shared;
//! [`Device`] instances bind a class to persisted state.

use crate::adapters::auth::AuthHeader;
use crate::adapters::oauth::{OAuth2Flow, OAuthTokens};
use crate::subscription::Subscription;
use crate::template::format_string;
use async_trait::async_trait;
use devkind_core::{
    AuthSpec, DeviceManifest, DeviceState, FunctionSpec, LoaderError, LoaderResult, Params, Record,
};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

/// Runs a query once.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn get(&self, device: &Device, params: &Params) -> LoaderResult<Vec<Record>>;
}

/// Runs an action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, device: &Device, params: &Params) -> LoaderResult<serde_json::Value>;
}

/// Custom push-style subscription. Must hand back the stream synchronously.
pub trait SubscribeHandler: Send + Sync {
    fn subscribe(&self, device: &Device, params: &Params) -> LoaderResult<Subscription>;
}

/// How a query is monitored.
#[derive(Clone)]
pub enum Monitoring {
    Poll(Duration),
    Custom(Arc<dyn SubscribeHandler>),
    NotMonitorable,
}

impl std::fmt::Debug for Monitoring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Monitoring::Poll(interval) => f.debug_tuple("Poll").field(interval).finish(),
            Monitoring::Custom(_) => f.write_str("Custom"),
            Monitoring::NotMonitorable => f.write_str("NotMonitorable"),
        }
    }
}

/// A query implementation together with its monitoring strategy.
#[derive(Clone)]
pub struct QueryBinding {
    handler: Arc<dyn QueryHandler>,
    monitoring: Monitoring,
}

impl QueryBinding {
    /// Pick the monitoring strategy from the declared poll interval.
    ///
    /// A custom subscribe implementation always wins. Without one, a zero
    /// interval is an implementation error.
    pub fn new(
        name: &str,
        spec: &FunctionSpec,
        handler: Arc<dyn QueryHandler>,
        custom: Option<Arc<dyn SubscribeHandler>>,
    ) -> LoaderResult<Self> {
        let monitoring = match (custom, spec.poll_interval) {
            (Some(custom), _) => Monitoring::Custom(custom),
            (None, 0) => {
                return Err(LoaderError::Implementation(format!(
                    "Poll interval is 0 but no subscribe implementation was found for query {}",
                    name
                )))
            }
            (None, ms) if ms > 0 => Monitoring::Poll(Duration::from_millis(ms as u64)),
            (None, _) => Monitoring::NotMonitorable,
        };
        Ok(Self {
            handler,
            monitoring,
        })
    }

    pub fn monitoring(&self) -> &Monitoring {
        &self.monitoring
    }
}

/// Runnable implementation of a manifest.
pub struct DeviceClass {
    manifest: Arc<DeviceManifest>,
    queries: IndexMap<String, QueryBinding>,
    actions: IndexMap<String, Arc<dyn ActionHandler>>,
    auth: AuthHeader,
    oauth: Option<OAuth2Flow>,
}

impl DeviceClass {
    pub fn new(
        manifest: Arc<DeviceManifest>,
        queries: IndexMap<String, QueryBinding>,
        actions: IndexMap<String, Arc<dyn ActionHandler>>,
        http: reqwest::Client,
    ) -> Self {
        let auth = AuthHeader::for_auth(&manifest.auth);
        let oauth = match &manifest.auth {
            AuthSpec::OAuth2(spec) => Some(OAuth2Flow::new(&manifest.kind, spec.clone(), http)),
            _ => None,
        };
        Self {
            manifest,
            queries,
            actions,
            auth,
            oauth,
        }
    }

    pub fn kind(&self) -> &str {
        &self.manifest.kind
    }

    pub fn manifest(&self) -> &Arc<DeviceManifest> {
        &self.manifest
    }

    pub fn query_names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn monitoring(&self, query: &str) -> Option<&Monitoring> {
        self.queries.get(query).map(QueryBinding::monitoring)
    }

    /// OAuth2 helpers, for devices configured with OAuth2.
    pub fn oauth(&self) -> Option<&OAuth2Flow> {
        self.oauth.as_ref()
    }

    /// Bind the class to persisted state.
    pub fn instantiate(self: &Arc<Self>, state: DeviceState) -> Device {
        let manifest = &self.manifest;
        let unique_id = match manifest.auth {
            AuthSpec::None if manifest.params.is_empty() => Some(manifest.kind.clone()),
            AuthSpec::None => {
                let parts: Vec<String> = manifest
                    .params
                    .iter()
                    .map(|p| format!("{}-{}", p, state_string(&state, p)))
                    .collect();
                Some(format!("{}-{}", manifest.kind, parts.join("-")))
            }
            _ => None,
        };
        let name = manifest
            .name
            .as_deref()
            .map(|t| format_string(t, &state, None));
        let description = manifest
            .description
            .as_deref()
            .map(|t| format_string(t, &state, None));

        Device {
            class: Arc::clone(self),
            state: Arc::new(state),
            unique_id,
            name,
            description,
        }
    }

    /// Finish an OAuth2 exchange and instantiate the resulting device.
    pub async fn complete_oauth(self: &Arc<Self>, tokens: OAuthTokens) -> LoaderResult<Device> {
        let flow = self.oauth.as_ref().ok_or_else(|| {
            LoaderError::Unsupported(format!("{} (no OAuth2 configuration)", self.kind()))
        })?;
        let state = flow.complete(tokens).await?;
        Ok(self.instantiate(state))
    }
}

impl std::fmt::Debug for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClass")
            .field("kind", &self.manifest.kind)
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn state_string(state: &DeviceState, key: &str) -> String {
    match state.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Configured device instance.
#[derive(Clone)]
pub struct Device {
    class: Arc<DeviceClass>,
    state: Arc<DeviceState>,
    unique_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
}

impl Device {
    pub fn kind(&self) -> &str {
        self.class.kind()
    }

    pub fn class(&self) -> &Arc<DeviceClass> {
        &self.class
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Deterministic id for unauthenticated devices; `None` lets the caller pick one.
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.state.get("accessToken").and_then(|v| v.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.state.get("refreshToken").and_then(|v| v.as_str())
    }

    /// `Authorization` header value for outgoing requests.
    pub fn auth_header(&self) -> Option<String> {
        self.class.auth.header(&self.state)
    }

    fn binding(&self, query: &str) -> LoaderResult<&QueryBinding> {
        self.class
            .queries
            .get(query)
            .ok_or_else(|| LoaderError::UnknownFunction {
                kind: self.kind().to_string(),
                function_type: "query",
                name: query.to_string(),
            })
    }

    /// Run a query once.
    pub async fn get(&self, query: &str, params: &Params) -> LoaderResult<Vec<Record>> {
        let binding = self.binding(query)?;
        binding.handler.get(self, params).await
    }

    /// Run an action.
    pub async fn invoke(&self, action: &str, params: &Params) -> LoaderResult<serde_json::Value> {
        let handler = self
            .class
            .actions
            .get(action)
            .ok_or_else(|| LoaderError::UnknownFunction {
                kind: self.kind().to_string(),
                function_type: "action",
                name: action.to_string(),
            })?;
        handler.invoke(self, params).await
    }

    /// Monitor a query. Fails immediately for queries that cannot be monitored.
    pub fn subscribe(&self, query: &str, params: Params) -> LoaderResult<Subscription> {
        match &self.binding(query)?.monitoring {
            Monitoring::Poll(interval) => Ok(Subscription::polling(
                self.clone(),
                query.to_string(),
                params,
                *interval,
            )),
            Monitoring::Custom(handler) => handler.subscribe(self, &params),
            Monitoring::NotMonitorable => Err(LoaderError::NotMonitorable(query.to_string())),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("kind", &self.kind())
            .field("unique_id", &self.unique_id)
            .field("name", &self.name)
            .finish()
    }
}
