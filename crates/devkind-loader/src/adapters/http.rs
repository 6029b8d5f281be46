//! Shared request plumbing for the declarative adapters.

use devkind_core::{HttpMethod, LoaderError, LoaderResult};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Method;
use tracing::debug;

fn method_of(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// One outgoing device request.
pub struct DeviceRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub auth: Option<String>,
    pub accept: Option<&'static str>,
}

impl DeviceRequest<'_> {
    /// Send and return the body text; non-2xx statuses are errors.
    pub async fn send(self, http: &reqwest::Client) -> LoaderResult<String> {
        debug!(method = self.method.as_str(), url = %self.url, "Device request");

        let mut request = http.request(method_of(self.method), self.url);
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        if let Some(auth) = &self.auth {
            request = request.header(AUTHORIZATION, auth);
        }
        if let Some(accept) = self.accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(body) = &self.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LoaderError::Communication(format!("Request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::Http {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| LoaderError::Communication(format!("Failed to read response: {}", e)))
    }
}
