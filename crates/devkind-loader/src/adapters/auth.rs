//! Authorization headers derived from the manifest auth type.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use devkind_core::{AuthSpec, DeviceState};

/// Header strategy for outgoing device requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthHeader {
    None,
    /// `Basic base64(username:password)` from device state.
    Basic,
    /// `Bearer <accessToken>` from device state.
    Bearer,
}

impl AuthHeader {
    pub fn for_auth(auth: &AuthSpec) -> Self {
        match auth {
            AuthSpec::Basic => AuthHeader::Basic,
            AuthSpec::OAuth2(_) => AuthHeader::Bearer,
            _ => AuthHeader::None,
        }
    }

    pub fn header(&self, state: &DeviceState) -> Option<String> {
        let field = |key: &str| state.get(key).and_then(|v| v.as_str()).unwrap_or("");
        match self {
            AuthHeader::None => None,
            AuthHeader::Basic => Some(basic_auth(field("username"), field("password"))),
            AuthHeader::Bearer => state
                .get("accessToken")
                .and_then(|v| v.as_str())
                .map(|token| format!("Bearer {}", token)),
        }
    }
}

pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}
