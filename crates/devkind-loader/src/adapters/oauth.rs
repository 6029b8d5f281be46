//! Generic OAuth2 code-grant wiring.
//!
//! The flow is three steps: send the user to [`OAuth2Flow::authorize_url`],
//! trade the returned code with [`OAuth2Flow::exchange_code`], then turn the
//! tokens into persisted device state with [`OAuth2Flow::complete`].

use super::http::DeviceRequest;
use devkind_core::{DeviceState, HttpMethod, LoaderError, LoaderResult, OAuth2Spec};
use serde_json::Value as JsonValue;
use tracing::info;

/// Token response fields that never end up in device state.
const TOKEN_FIELDS: &[&str] = &["access_token", "refresh_token", "expires_in"];

/// Outcome of a completed code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Remaining fields of the token response.
    pub extra: serde_json::Map<String, JsonValue>,
}

pub struct OAuth2Flow {
    kind: String,
    spec: OAuth2Spec,
    http: reqwest::Client,
}

impl OAuth2Flow {
    pub fn new(kind: &str, spec: OAuth2Spec, http: reqwest::Client) -> Self {
        Self {
            kind: kind.to_string(),
            spec,
            http,
        }
    }

    pub fn spec(&self) -> &OAuth2Spec {
        &self.spec
    }

    /// Authorization URL the user is redirected to.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> LoaderResult<String> {
        let scope = self.spec.scope.join(" ");
        let mut query = vec![
            ("response_type", "code"),
            ("client_id", self.spec.client_id.as_str()),
            ("redirect_uri", redirect_uri),
        ];
        if !scope.is_empty() {
            query.push(("scope", scope.as_str()));
        }
        if self.spec.set_state {
            query.push(("state", state));
        }

        reqwest::Url::parse_with_params(&self.spec.authorize_url, &query)
            .map(|url| url.to_string())
            .map_err(|e| LoaderError::Implementation(format!("Invalid authorize URL: {}", e)))
    }

    /// Trade an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> LoaderResult<OAuthTokens> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.spec.client_id.as_str()),
            ("client_secret", self.spec.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.spec.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| LoaderError::Communication(format!("Token exchange failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::Http {
                status: status.as_u16(),
                url: self.spec.token_url.clone(),
            });
        }

        let mut body: serde_json::Map<String, JsonValue> = response
            .json()
            .await
            .map_err(|e| LoaderError::Communication(format!("Invalid token response: {}", e)))?;

        let access_token = match body.remove("access_token") {
            Some(JsonValue::String(token)) => token,
            _ => {
                return Err(LoaderError::Communication(
                    "Token response has no access_token".to_string(),
                ))
            }
        };
        let refresh_token = match body.remove("refresh_token") {
            Some(JsonValue::String(token)) => Some(token),
            _ => None,
        };

        Ok(OAuthTokens {
            access_token,
            refresh_token,
            extra: body,
        })
    }

    /// Build the persisted state of a freshly authorized device.
    ///
    /// With a profile URL, one authenticated fetch runs first and either the
    /// configured profile fields or the whole profile are merged in.
    pub async fn complete(&self, tokens: OAuthTokens) -> LoaderResult<DeviceState> {
        let mut state = DeviceState::new();
        state.insert("kind".into(), JsonValue::String(self.kind.clone()));
        state.insert("accessToken".into(), JsonValue::String(tokens.access_token.clone()));
        state.insert(
            "refreshToken".into(),
            tokens
                .refresh_token
                .clone()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        );
        for (key, value) in tokens.extra {
            if !TOKEN_FIELDS.contains(&key.as_str()) {
                state.insert(key, value);
            }
        }

        if let Some(profile_url) = &self.spec.get_profile_url {
            let text = DeviceRequest {
                method: HttpMethod::Get,
                url: profile_url,
                query: Vec::new(),
                body: None,
                auth: Some(format!("Bearer {}", tokens.access_token)),
                accept: Some("application/json"),
            }
            .send(&self.http)
            .await?;

            let profile: JsonValue = serde_json::from_str(&text).map_err(|e| {
                LoaderError::Communication(format!("Invalid profile response: {}", e))
            })?;

            if self.spec.profile_fields.is_empty() {
                state.insert("profile".into(), profile);
            } else {
                for field in &self.spec.profile_fields {
                    state.insert(
                        field.clone(),
                        profile.get(field).cloned().unwrap_or(JsonValue::Null),
                    );
                }
            }
        }

        info!(kind = %self.kind, "OAuth2 authorization completed");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> OAuth2Spec {
        OAuth2Spec {
            client_id: "client".into(),
            client_secret: "secret".into(),
            authorize_url: "https://auth.example.com/authorize".into(),
            token_url: "https://auth.example.com/token".into(),
            scope: vec!["read".into(), "write".into()],
            profile_fields: vec![],
            get_profile_url: None,
            set_state: true,
        }
    }

    #[test]
    fn test_authorize_url() {
        let flow = OAuth2Flow::new("com.example.oauth", spec(), reqwest::Client::new());
        let url = flow.authorize_url("https://app/cb", "xyz").unwrap();
        assert!(url.starts_with("https://auth.example.com/authorize?response_type=code"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("scope=read+write"));
        assert!(url.contains("state=xyz"));
    }

    #[tokio::test]
    async fn test_complete_without_profile_drops_token_fields() {
        let flow = OAuth2Flow::new("com.example.oauth", spec(), reqwest::Client::new());
        let extra = json!({"expires_in": 3600, "user_id": "42"})
            .as_object()
            .cloned()
            .unwrap();
        let state = flow
            .complete(OAuthTokens {
                access_token: "at".into(),
                refresh_token: Some("rt".into()),
                extra,
            })
            .await
            .unwrap();

        assert_eq!(state["kind"], "com.example.oauth");
        assert_eq!(state["accessToken"], "at");
        assert_eq!(state["refreshToken"], "rt");
        assert_eq!(state["user_id"], "42");
        assert!(!state.contains_key("expires_in"));
    }
}
