//! Authentication and cookie context applied to outgoing requests.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::http::HttpRequest;

/// Name of the session cookie issued by `POST /_session`.
pub const SESSION_COOKIE: &str = "AuthSession";

/// How `login` authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Static `Authorization: Basic` header on every request.
    #[default]
    Basic,
    /// Session cookie obtained from `/_session`.
    Cookie,
}

/// Credentials currently in effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    Anonymous,
    Basic {
        user: String,
        password: String,
    },
    /// Cookie auth. `token` is `None` until the login round trip completes.
    Cookie {
        token: Option<String>,
    },
}

/// Per-client request context: credentials plus cookies merged onto every
/// request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub auth: Auth,
    pub cookies: BTreeMap<String, String>,
}

impl Session {
    /// Add this session's credentials and cookies to `request`.
    ///
    /// Extra cookies are merged last, so a caller-set cookie wins over the
    /// session cookie of the same name.
    pub fn apply(&self, request: &mut HttpRequest) {
        match &self.auth {
            Auth::Anonymous => {}
            Auth::Basic { user, password } => {
                let token = STANDARD.encode(format!("{user}:{password}"));
                request
                    .headers
                    .insert("Authorization", format!("Basic {token}"));
            }
            Auth::Cookie { token: Some(token) } => {
                request
                    .cookies
                    .insert(SESSION_COOKIE.to_string(), token.clone());
                request.headers.insert("X-CouchDB-WWW-Authenticate", "Cookie");
            }
            Auth::Cookie { token: None } => {}
        }

        for (key, value) in &self.cookies {
            request.cookies.insert(key.clone(), value.clone());
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        match &self.auth {
            Auth::Cookie { token } => token.as_deref(),
            _ => None,
        }
    }
}
