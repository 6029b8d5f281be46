//! Remote registry client.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult};
use async_trait::async_trait;
use reqwest::{redirect, StatusCode};
use tracing::debug;

/// Source of manifest text and code bundle locations.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Raw manifest text of a device kind.
    async fn get_device_code(&self, kind: &str) -> LoaderResult<String>;

    /// Download URL of the code bundle for a device kind.
    async fn get_module_location(&self, kind: &str, version: i64) -> LoaderResult<String>;
}

/// Registry client speaking the registry HTTP API.
pub struct HttpRegistryClient {
    base_url: String,
    developer_key: Option<String>,
    http: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>, config: &LoaderConfig) -> LoaderResult<Self> {
        // bundle locations are read from the redirect itself
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| LoaderError::Registry(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            developer_key: None,
            http,
        })
    }

    pub fn with_developer_key(mut self, key: Option<String>) -> Self {
        self.developer_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.developer_key {
            Some(key) => request.query(&[("developer_key", key)]),
            None => request,
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_device_code(&self, kind: &str) -> LoaderResult<String> {
        let url = format!("{}/api/code/devices/{}", self.base_url, kind);
        debug!(kind = %kind, url = %url, "Fetching device manifest");

        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| LoaderError::Registry(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(LoaderError::Registry(format!(
                "Unexpected HTTP error {}",
                response.status().as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| LoaderError::Registry(e.to_string()))
    }

    async fn get_module_location(&self, kind: &str, version: i64) -> LoaderResult<String> {
        let url = format!("{}/download/devices/{}.zip", self.base_url, kind);
        debug!(kind = %kind, version, "Requesting code bundle location");

        let response = self
            .get(&url)
            .query(&[("version", version)])
            .send()
            .await
            .map_err(|e| LoaderError::Registry(e.to_string()))?;

        let status = response.status();
        if !matches!(
            status,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::TEMPORARY_REDIRECT
        ) {
            return Err(LoaderError::Registry(format!(
                "Unexpected HTTP status {} downloading code for {}",
                status.as_u16(),
                kind
            )));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                LoaderError::Registry(format!("Missing redirect location for {}", kind))
            })?;

        // relative redirects resolve against the request URL
        response
            .url()
            .join(location)
            .map(|u| u.to_string())
            .map_err(|e| LoaderError::Registry(format!("Invalid redirect location: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpRegistryClient {
        HttpRegistryClient::new(server.uri(), &LoaderConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_get_device_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/code/devices/com.example.test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"module_type\":\"rss\"}"))
            .mount(&server)
            .await;

        let text = client(&server)
            .get_device_code("com.example.test")
            .await
            .unwrap();
        assert_eq!(text, "{\"module_type\":\"rss\"}");
    }

    #[tokio::test]
    async fn test_get_device_code_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/code/devices/com.example.missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_device_code("com.example.missing")
            .await
            .unwrap_err();
        assert_eq!(err, LoaderError::Registry("Unexpected HTTP error 404".into()));
    }

    #[tokio::test]
    async fn test_module_location_follows_no_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/devices/com.example.pkg.zip"))
            .and(query_param("developer_key", "secret"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "/bundles/pkg-3.zip"),
            )
            .mount(&server)
            .await;

        let location = client(&server)
            .with_developer_key(Some("secret".into()))
            .get_module_location("com.example.pkg", 3)
            .await
            .unwrap();
        assert_eq!(location, format!("{}/bundles/pkg-3.zip", server.uri()));
    }

    #[tokio::test]
    async fn test_module_location_requires_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/devices/com.example.pkg.zip"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_module_location("com.example.pkg", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Registry(_)));
    }
}
