//! Declarative REST adapter.
//!
//! Queries render their URL template, issue one request (GET unless the
//! manifest says otherwise) and extract records from the JSON body. Actions
//! send the merged default and call parameters as a JSON body (POST unless the
//! manifest says otherwise), or as the query string for GET.

use super::http::DeviceRequest;
use crate::device::{ActionHandler, Device, DeviceClass, QueryBinding, QueryHandler};
use crate::extract::extract_records;
use crate::template::format_string;
use async_trait::async_trait;
use devkind_core::{DeviceManifest, FunctionSpec, HttpMethod, LoaderError, LoaderResult, Params, Record};
use indexmap::IndexMap;
use std::sync::Arc;

/// Default parameters overlaid with call parameters.
pub fn request_body(spec: &FunctionSpec, params: &Params) -> serde_json::Value {
    let mut body = spec.default_params.clone();
    for (key, value) in params {
        body.insert(key.clone(), value.to_json());
    }
    serde_json::Value::Object(body)
}

/// Flatten a request body into query pairs; strings are sent unquoted.
pub fn query_pairs(body: &serde_json::Value) -> Vec<(String, String)> {
    let Some(object) = body.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

fn url_template(spec: &FunctionSpec) -> &str {
    spec.url.as_deref().unwrap_or_default()
}

pub struct RestQuery {
    spec: FunctionSpec,
    http: reqwest::Client,
}

impl RestQuery {
    pub fn new(spec: FunctionSpec, http: reqwest::Client) -> Self {
        Self { spec, http }
    }
}

#[async_trait]
impl QueryHandler for RestQuery {
    async fn get(&self, device: &Device, params: &Params) -> LoaderResult<Vec<Record>> {
        let url = format_string(url_template(&self.spec), device.state(), Some(params));
        let method = self.spec.method.unwrap_or(HttpMethod::Get);
        let body = (method != HttpMethod::Get).then(|| request_body(&self.spec, params));

        let text = DeviceRequest {
            method,
            url: &url,
            query: Vec::new(),
            body,
            auth: device.auth_header(),
            accept: Some("application/json"),
        }
        .send(&self.http)
        .await?;

        let response: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            LoaderError::Communication(format!("Invalid JSON response from {}: {}", url, e))
        })?;
        extract_records(&response, &self.spec)
    }
}

pub struct RestAction {
    spec: FunctionSpec,
    http: reqwest::Client,
}

impl RestAction {
    pub fn new(spec: FunctionSpec, http: reqwest::Client) -> Self {
        Self { spec, http }
    }
}

#[async_trait]
impl ActionHandler for RestAction {
    async fn invoke(&self, device: &Device, params: &Params) -> LoaderResult<serde_json::Value> {
        let url = format_string(url_template(&self.spec), device.state(), Some(params));
        let method = self.spec.method.unwrap_or(HttpMethod::Post);
        let merged = request_body(&self.spec, params);
        let (query, body) = if method == HttpMethod::Get {
            (query_pairs(&merged), None)
        } else {
            (Vec::new(), Some(merged))
        };

        let text = DeviceRequest {
            method,
            url: &url,
            query,
            body,
            auth: device.auth_header(),
            accept: None,
        }
        .send(&self.http)
        .await?;

        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}

/// Build a device class for a `generic_rest` manifest.
pub fn build_rest_class(manifest: Arc<DeviceManifest>, http: reqwest::Client) -> LoaderResult<DeviceClass> {
    let mut queries = IndexMap::new();
    for (name, spec) in &manifest.queries {
        let handler = Arc::new(RestQuery::new(spec.clone(), http.clone()));
        queries.insert(name.clone(), QueryBinding::new(name, spec, handler, None)?);
    }

    let mut actions: IndexMap<String, Arc<dyn ActionHandler>> = IndexMap::new();
    for (name, spec) in &manifest.actions {
        actions.insert(name.clone(), Arc::new(RestAction::new(spec.clone(), http.clone())));
    }

    Ok(DeviceClass::new(manifest, queries, actions, http))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devkind_core::Value;
    use serde_json::json;

    #[test]
    fn test_call_params_override_defaults() {
        let spec: FunctionSpec = serde_json::from_value(json!({
            "url": "https://example.com",
            "default": {"mode": "auto", "level": 1}
        }))
        .unwrap();
        let mut params = Params::new();
        params.insert("level".into(), Value::Number(5.0));

        assert_eq!(
            request_body(&spec, &params),
            json!({"mode": "auto", "level": 5.0})
        );
    }

    #[test]
    fn test_query_pairs() {
        let mut pairs = query_pairs(&json!({"mode": "auto", "level": 5.0, "on": true, "skip": null}));
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("level".to_string(), "5.0".to_string()),
                ("mode".to_string(), "auto".to_string()),
                ("on".to_string(), "true".to_string()),
            ]
        );
    }
}
