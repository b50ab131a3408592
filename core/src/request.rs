//! Request preparation.
//!
//! # Design
//! `build_request` is pure: given the session context, the path prefix and
//! the caller's method, path, body and headers, it produces the exact
//! `HttpRequest` a transport will send. All defaults (`Accept`,
//! `Content-Type`, `Content-Length`, `User-Agent`) and all refusals
//! (`Expect: 100-continue`) happen here, before any I/O.

use url::form_urlencoded;

use crate::cookie::parse_cookie_string;
use crate::error::{Error, Result};
use crate::http::{Headers, HttpMethod, HttpRequest};
use crate::session::Session;

pub const USER_AGENT: &str = concat!("sofa/", env!("CARGO_PKG_VERSION"));
pub const JSON: &str = "application/json";

/// Assemble the request a transport will send.
pub fn build_request(
    session: &Session,
    prefix: &str,
    method: HttpMethod,
    path: &str,
    body: Option<Vec<u8>>,
    mut headers: Headers,
) -> Result<HttpRequest> {
    if let Some(expect) = headers.remove("expect") {
        if expect.trim().eq_ignore_ascii_case("100-continue") {
            return Err(Error::validation(
                "Expect: 100-continue is not supported",
            ));
        }
        if !expect.trim().is_empty() {
            headers.insert("Expect", expect);
        }
    }

    headers.insert("User-Agent", USER_AGENT);
    headers.insert("Accept", JSON);
    if !headers.contains("content-type") {
        headers.insert("Content-Type", JSON);
    }
    if let Some(body) = &body {
        headers.insert("Content-Length", body.len().to_string());
    }

    let caller_cookies = headers.remove("cookie");

    let mut request = HttpRequest {
        method,
        path: format!("{prefix}{path}"),
        headers,
        cookies: Default::default(),
        body,
    };
    session.apply(&mut request);
    if let Some(line) = caller_cookies {
        request.cookies.extend(parse_cookie_string(&line));
    }
    Ok(request)
}

/// Percent-encode one path segment or query value.
///
/// Spaces become `%20`: a `+` in a path is a literal plus.
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .map(|chunk| if chunk == "+" { "%20" } else { chunk })
        .collect()
}

/// Set `key=value` in the query of `path`, replacing an existing `key`.
pub fn set_query_parameter(path: &str, key: &str, value: &str) -> String {
    let (base, query) = match path.split_once('?') {
        Some((base, query)) => (base, query),
        None => (path, ""),
    };

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        if k != key {
            serializer.append_pair(&k, &v);
        }
    }
    serializer.append_pair(key, value);
    format!("{base}?{}", serializer.finish())
}
