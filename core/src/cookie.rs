//! Cookie header parsing and formatting.

use std::collections::BTreeMap;

/// Parse a `k1=v1; k2=v2` header into a map.
///
/// A pair without `=` maps to an empty value. Keys and values are trimmed.
/// Only the first `=` splits a pair, so values may themselves contain `=`.
pub fn parse_cookie_string(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter(|crumb| !crumb.trim().is_empty())
        .map(|crumb| match crumb.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (crumb.trim().to_string(), String::new()),
        })
        .collect()
}

/// Render a cookie map as a single `Cookie` header value.
pub fn format_cookie_line(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}
