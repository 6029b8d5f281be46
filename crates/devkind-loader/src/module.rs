//! In-process device implementations.
//!
//! Packaged and builtin kinds are implemented by a [`DeviceModule`]: a table
//! of query, subscribe and action closures plus sub-modules for child kinds.
//! [`DeviceModule::bind`] checks the table against a manifest and produces a
//! [`DeviceClass`], rejecting any gap up front.

use crate::device::{
    ActionHandler, Device, DeviceClass, QueryBinding, QueryHandler, SubscribeHandler,
};
use crate::subscription::{Observation, Subscription};
use async_trait::async_trait;
use chrono::Utc;
use devkind_core::{DeviceManifest, LoaderError, LoaderResult, Params, Record, Value};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub type QueryFn =
    Arc<dyn Fn(Device, Params) -> BoxFuture<'static, anyhow::Result<JsonValue>> + Send + Sync>;
pub type ActionFn =
    Arc<dyn Fn(Device, Params) -> BoxFuture<'static, anyhow::Result<JsonValue>> + Send + Sync>;
pub type SubscribeFn = Arc<
    dyn Fn(Device, Params) -> anyhow::Result<BoxStream<'static, anyhow::Result<JsonValue>>>
        + Send
        + Sync,
>;

/// Implementation table of a device kind.
#[derive(Clone, Default)]
pub struct DeviceModule {
    queries: HashMap<String, QueryFn>,
    subscriptions: HashMap<String, SubscribeFn>,
    actions: HashMap<String, ActionFn>,
    subdevices: HashMap<String, DeviceModule>,
}

impl DeviceModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Implement a query. The result must be a JSON array of objects.
    pub fn query<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Device, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
    {
        self.queries
            .insert(name.into(), Arc::new(move |device, params| f(device, params).boxed()));
        self
    }

    /// Implement a custom subscription for a query.
    pub fn subscribe<F, S>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Device, Params) -> anyhow::Result<S> + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<JsonValue>> + Send + 'static,
    {
        self.subscriptions.insert(
            name.into(),
            Arc::new(move |device, params| f(device, params).map(StreamExt::boxed)),
        );
        self
    }

    pub fn action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Device, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
    {
        self.actions
            .insert(name.into(), Arc::new(move |device, params| f(device, params).boxed()));
        self
    }

    /// Register the implementation of a child kind.
    pub fn subdevice(mut self, kind: impl Into<String>, module: DeviceModule) -> Self {
        self.subdevices.insert(kind.into(), module);
        self
    }

    pub fn get_subdevice(&self, kind: &str) -> Option<&DeviceModule> {
        self.subdevices.get(kind)
    }

    /// Check the table against `manifest` and build the device class.
    ///
    /// Every declared action and query needs an implementation, and a query
    /// with a zero poll interval needs a subscribe implementation.
    pub fn bind(&self, manifest: Arc<DeviceManifest>, http: reqwest::Client) -> LoaderResult<DeviceClass> {
        let mut actions: IndexMap<String, Arc<dyn ActionHandler>> = IndexMap::new();
        for name in manifest.actions.keys() {
            let f = self.actions.get(name).ok_or_else(|| {
                LoaderError::Implementation(format!("Implementation for action {} missing", name))
            })?;
            actions.insert(name.clone(), Arc::new(ModuleAction(f.clone())));
        }

        let mut queries = IndexMap::new();
        for (name, spec) in &manifest.queries {
            let custom = self.subscriptions.get(name).map(|f| {
                Arc::new(ModuleSubscribe {
                    name: name.clone(),
                    f: f.clone(),
                }) as Arc<dyn SubscribeHandler>
            });
            if spec.poll_interval == 0 && custom.is_none() {
                return Err(LoaderError::Implementation(format!(
                    "Poll interval is 0 but no subscribe implementation was found for query {}",
                    name
                )));
            }
            let f = self.queries.get(name).ok_or_else(|| {
                LoaderError::Implementation(format!("Implementation for query {} missing", name))
            })?;
            let handler = Arc::new(ModuleQuery {
                name: name.clone(),
                f: f.clone(),
            });
            queries.insert(name.clone(), QueryBinding::new(name, spec, handler, custom)?);
        }

        Ok(DeviceClass::new(manifest, queries, actions, http))
    }
}

impl std::fmt::Debug for DeviceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceModule")
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("subdevices", &self.subdevices.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors raised by module code keep their type when they already are loader errors.
fn device_error(err: anyhow::Error) -> LoaderError {
    match err.downcast::<LoaderError>() {
        Ok(err) => err,
        Err(err) => LoaderError::Device(format!("{:#}", err)),
    }
}

fn record_of(value: JsonValue) -> Option<Record> {
    match value {
        JsonValue::Object(map) => Some(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => None,
    }
}

struct ModuleQuery {
    name: String,
    f: QueryFn,
}

#[async_trait]
impl QueryHandler for ModuleQuery {
    async fn get(&self, device: &Device, params: &Params) -> LoaderResult<Vec<Record>> {
        let result = (self.f)(device.clone(), params.clone())
            .await
            .map_err(device_error)?;

        let items = match result {
            JsonValue::Array(items) => items,
            other => {
                return Err(LoaderError::Implementation(format!(
                    "The query {} must return an array, got {}",
                    self.name, other
                )))
            }
        };
        items
            .into_iter()
            .map(|item| {
                let shown = item.to_string();
                record_of(item).ok_or_else(|| {
                    LoaderError::Implementation(format!(
                        "The query {} must return objects, got {}",
                        self.name, shown
                    ))
                })
            })
            .collect()
    }
}

struct ModuleAction(ActionFn);

#[async_trait]
impl ActionHandler for ModuleAction {
    async fn invoke(&self, device: &Device, params: &Params) -> LoaderResult<JsonValue> {
        (self.0)(device.clone(), params.clone())
            .await
            .map_err(device_error)
    }
}

struct ModuleSubscribe {
    name: String,
    f: SubscribeFn,
}

impl SubscribeHandler for ModuleSubscribe {
    fn subscribe(&self, device: &Device, params: &Params) -> LoaderResult<Subscription> {
        let stream = (self.f)(device.clone(), params.clone()).map_err(device_error)?;
        let name = self.name.clone();
        Ok(Subscription::from_stream(stream.map(move |item| {
            let value = item.map_err(device_error)?;
            let shown = value.to_string();
            let record = record_of(value).ok_or_else(|| {
                LoaderError::Implementation(format!(
                    "The subscription {} must yield objects, got {}",
                    name, shown
                ))
            })?;
            Ok(Observation {
                timestamp: Utc::now(),
                record,
            })
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devkind_core::{DeviceState, FunctionSpec, ModuleType};
    use serde_json::json;

    fn manifest() -> Arc<DeviceManifest> {
        let mut manifest = DeviceManifest::new("com.example.pkg", ModuleType::Packaged);
        manifest.package_version = Some(1);
        manifest.queries.insert("readings".into(), FunctionSpec::default());
        manifest.actions.insert("reset".into(), FunctionSpec::default());
        Arc::new(manifest)
    }

    fn complete_module() -> DeviceModule {
        DeviceModule::new()
            .query("readings", |_device, _params| async {
                Ok(json!([{"value": 1}, {"value": 2}]))
            })
            .action("reset", |_device, _params| async { Ok(JsonValue::Null) })
    }

    #[test]
    fn test_missing_action() {
        let module = DeviceModule::new().query("readings", |_d, _p| async { Ok(json!([])) });
        let err = module.bind(manifest(), reqwest::Client::new()).unwrap_err();
        assert_eq!(
            err,
            LoaderError::Implementation("Implementation for action reset missing".into())
        );
    }

    #[test]
    fn test_missing_query() {
        let module = DeviceModule::new().action("reset", |_d, _p| async { Ok(JsonValue::Null) });
        let err = module.bind(manifest(), reqwest::Client::new()).unwrap_err();
        assert_eq!(
            err,
            LoaderError::Implementation("Implementation for query readings missing".into())
        );
    }

    #[test]
    fn test_zero_poll_without_subscribe() {
        let mut manifest = (*manifest()).clone();
        manifest.queries["readings"].poll_interval = 0;
        let err = complete_module()
            .bind(Arc::new(manifest), reqwest::Client::new())
            .unwrap_err();
        assert!(matches!(err, LoaderError::Implementation(ref m) if m.contains("subscribe")));
    }

    #[tokio::test]
    async fn test_query_results_become_records() {
        let class = Arc::new(complete_module().bind(manifest(), reqwest::Client::new()).unwrap());
        let device = class.instantiate(DeviceState::new());
        let records = device.get("readings", &Params::new()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["value"], Value::Number(2.0));
    }

    #[tokio::test]
    async fn test_non_array_result_rejected() {
        let module = complete_module().query("readings", |_d, _p| async { Ok(json!(42)) });
        let class = Arc::new(module.bind(manifest(), reqwest::Client::new()).unwrap());
        let device = class.instantiate(DeviceState::new());
        let err = device.get("readings", &Params::new()).await.unwrap_err();
        assert!(matches!(err, LoaderError::Implementation(ref m) if m.contains("readings")));
    }

    #[tokio::test]
    async fn test_module_errors_map_to_device_errors() {
        let module = complete_module()
            .action("reset", |_d, _p| async { Err(anyhow::anyhow!("device offline")) });
        let class = Arc::new(module.bind(manifest(), reqwest::Client::new()).unwrap());
        let device = class.instantiate(DeviceState::new());
        let err = device.invoke("reset", &Params::new()).await.unwrap_err();
        assert_eq!(err, LoaderError::Device("device offline".into()));
    }

    #[tokio::test]
    async fn test_custom_subscribe() {
        let mut manifest = (*manifest()).clone();
        manifest.queries["readings"].poll_interval = 0;
        let module = complete_module().subscribe("readings", |_d, _p| {
            Ok(futures::stream::iter(vec![Ok::<_, anyhow::Error>(json!({"value": 7}))]))
        });
        let class = Arc::new(module.bind(Arc::new(manifest), reqwest::Client::new()).unwrap());
        let device = class.instantiate(DeviceState::new());

        let mut sub = device.subscribe("readings", Params::new()).unwrap();
        let observation = sub.next().await.unwrap().unwrap();
        assert_eq!(observation.record["value"], Value::Number(7.0));
        assert!(sub.next().await.is_none());
    }
}
