//! HTTP request and response types shared by the transports.
//!
//! # Design
//! Requests and responses are plain data. The client prepares an
//! `HttpRequest`, a `Transport` puts it on the wire and hands back a
//! `RawResponse`, and the normalizer turns that into a typed result. Keeping
//! the wire types free of I/O lets the orchestrator be tested with scripted
//! responses.
//!
//! Header names are case-insensitive; `Headers` stores them lowercased.
//! Cookies travel separately on the request and are folded into a single
//! `Cookie` line by the transport.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive, single-valued header map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Set a header, replacing any previous value under the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Add a header value received off the wire. Repeated headers are folded
    /// into one value: `set-cookie` lines with `; `, everything else with `, `.
    pub fn append(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let separator = if name == "set-cookie" { "; " } else { ", " };
        match self.0.get_mut(&name) {
            Some(existing) => {
                existing.push_str(separator);
                existing.push_str(value);
            }
            None => {
                self.0.insert(name, value.to_string());
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// An HTTP request described as plain data.
///
/// `path` holds path and query only; the transport supplies scheme, host and
/// port from its own settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Headers,
    pub cookies: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            cookies: BTreeMap::new(),
            body: None,
        }
    }

    /// The `Cookie` header line for this request, if it carries any cookies.
    pub fn cookie_line(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(crate::cookie::format_cookie_line(&self.cookies))
    }
}

/// A response exactly as the transport received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Method of the request that produced this response.
    pub method: HttpMethod,
}
