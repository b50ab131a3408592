//! Response normalization.
//!
//! # Design
//! `normalize` is the single place where wire responses become typed
//! results. It checks that the body arrived complete, refuses error statuses,
//! decodes `application/json` bodies when the transport's decode flag is on,
//! and lifts cookies out of `set-cookie`. HEAD responses are never decoded:
//! they carry no body to inspect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cookie::parse_cookie_string;
use crate::error::{Error, Result};
use crate::http::{Headers, HttpMethod, RawResponse};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Response body: raw text, or a decoded JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    /// Body text. Invalid UTF-8 sequences are replaced with U+FFFD.
    Raw(String),
    Json(Value),
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Raw(_) => None,
        }
    }

    /// True for decoded objects and arrays.
    pub fn is_structured(&self) -> bool {
        matches!(self, Body::Json(Value::Object(_)) | Body::Json(Value::Array(_)))
    }
}

/// A response after validation and decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// Set when the result was served from a cache store after a 304.
    #[serde(skip)]
    pub from_cache: bool,
}

impl NormalizedResponse {
    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    /// The body as JSON, parsing raw text when decoding was disabled.
    pub fn document(&self) -> Option<Value> {
        match &self.body {
            Body::Json(value) => Some(value.clone()),
            Body::Raw(text) => serde_json::from_str(text).ok(),
        }
    }
}

/// Turn a raw transport response into a `NormalizedResponse`.
pub fn normalize(raw: RawResponse, decode: bool) -> Result<NormalizedResponse> {
    let is_head = raw.method == HttpMethod::Head;

    if !is_head {
        if let Some(declared) = raw.headers.get("content-length") {
            match declared.trim().parse::<usize>() {
                Ok(len) if len == raw.body.len() => {}
                _ => return Err(Error::transport("unexpected end of packet")),
            }
        }
    }

    let cookies = raw
        .headers
        .get("set-cookie")
        .map(parse_cookie_string)
        .unwrap_or_default();

    if is_head {
        if raw.status >= 400 {
            return Err(Error::Protocol {
                status: raw.status,
                message: "HTTP error without message body".to_string(),
            });
        }
        return Ok(NormalizedResponse {
            status: raw.status,
            headers: raw.headers,
            body: Body::Raw(String::new()),
            cookies,
            from_cache: false,
        });
    }

    let text = match std::str::from_utf8(&raw.body) {
        Ok(text) => text.to_string(),
        Err(e) => {
            debug!(error = %e, bytes = raw.body.len(), "body is not UTF-8; decoding lossily");
            String::from_utf8_lossy(&raw.body).into_owned()
        }
    };
    let mut body = Body::Raw(text);

    if raw.headers.get("content-type") == Some(JSON_CONTENT_TYPE) {
        if let Ok(json) = serde_json::from_slice::<Value>(&raw.body) {
            if let Some(error) = json.get("error").filter(|e| is_present(e)) {
                let reason = json.get("reason").map(field_text).unwrap_or_default();
                return Err(Error::Protocol {
                    status: raw.status,
                    message: format!("{} ({})", field_text(error), reason),
                });
            }
            if decode {
                body = Body::Json(json);
            }
        }
    }

    if raw.status >= 400 {
        let message = match &body {
            Body::Raw(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => format!("HTTP status {}", raw.status),
        };
        return Err(Error::Protocol {
            status: raw.status,
            message,
        });
    }

    Ok(NormalizedResponse {
        status: raw.status,
        headers: raw.headers,
        body,
        cookies,
        from_cache: false,
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(method: HttpMethod, status: u16, headers: &[(&str, &str)], body: &str) -> RawResponse {
        RawResponse {
            status,
            headers: headers.iter().copied().collect(),
            body: body.as_bytes().to_vec(),
            method,
        }
    }

    #[test]
    fn decodes_json_body_when_enabled() {
        let response = normalize(
            raw(
                HttpMethod::Get,
                200,
                &[("Content-Type", "application/json"), ("Content-Length", "8")],
                r#"{"a":1} "#,
            ),
            true,
        )
        .unwrap();
        assert_eq!(response.body, Body::Json(json!({"a": 1})));
        assert!(!response.from_cache);
    }

    #[test]
    fn leaves_raw_text_when_decoding_disabled() {
        let response = normalize(
            raw(HttpMethod::Get, 200, &[("content-type", "application/json")], r#"{"a":1}"#),
            false,
        )
        .unwrap();
        assert_eq!(response.body, Body::Raw(r#"{"a":1}"#.to_string()));
        assert_eq!(response.document(), Some(json!({"a": 1})));
    }

    #[test]
    fn non_utf8_body_is_kept_as_lossy_text() {
        let response = normalize(
            RawResponse {
                status: 200,
                headers: [("content-type", "application/octet-stream"), ("content-length", "4")]
                    .into_iter()
                    .collect(),
                body: vec![b'o', b'k', 0xff, 0xfe],
                method: HttpMethod::Get,
            },
            true,
        )
        .unwrap();
        assert_eq!(response.body, Body::Raw("ok\u{FFFD}\u{FFFD}".to_string()));
    }

    #[test]
    fn content_length_mismatch_is_a_transport_error() {
        let err = normalize(
            raw(HttpMethod::Get, 200, &[("content-length", "100")], "short"),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Transport(ref msg) if msg == "unexpected end of packet"));
    }

    #[test]
    fn head_skips_length_check_and_decoding() {
        let response = normalize(
            raw(
                HttpMethod::Head,
                200,
                &[("content-type", "application/json"), ("content-length", "512")],
                "",
            ),
            true,
        )
        .unwrap();
        assert_eq!(response.body, Body::Raw(String::new()));
    }

    #[test]
    fn head_error_status_is_a_protocol_error() {
        let err = normalize(raw(HttpMethod::Head, 404, &[], ""), true).unwrap_err();
        assert_eq!(err.code(), Some(404));
        assert!(err.to_string().contains("without message body"));
    }

    #[test]
    fn embedded_error_object_is_a_protocol_error() {
        let err = normalize(
            raw(
                HttpMethod::Get,
                404,
                &[("content-type", "application/json")],
                r#"{"error":"not_found","reason":"missing"}"#,
            ),
            true,
        )
        .unwrap_err();
        match err {
            Error::Protocol { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "not_found (missing)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn embedded_error_with_success_status_still_fails() {
        let err = normalize(
            raw(
                HttpMethod::Post,
                200,
                &[("content-type", "application/json")],
                r#"{"error":"forbidden","reason":"nope"}"#,
            ),
            true,
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(200));
    }

    #[test]
    fn empty_error_field_is_ignored() {
        let response = normalize(
            raw(
                HttpMethod::Get,
                200,
                &[("content-type", "application/json")],
                r#"{"error":"","ok":true}"#,
            ),
            true,
        )
        .unwrap();
        assert_eq!(response.body, Body::Json(json!({"error": "", "ok": true})));
    }

    #[test]
    fn other_content_types_are_not_decoded() {
        let response = normalize(
            raw(
                HttpMethod::Get,
                200,
                &[("content-type", "text/plain;charset=utf-8")],
                r#"{"a":1}"#,
            ),
            true,
        )
        .unwrap();
        assert!(matches!(response.body, Body::Raw(_)));
    }

    #[test]
    fn error_status_without_json_is_a_protocol_error() {
        let err = normalize(
            raw(HttpMethod::Get, 500, &[("content-type", "text/plain")], "boom"),
            true,
        )
        .unwrap_err();
        match err {
            Error::Protocol { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn set_cookie_is_parsed_into_the_cookie_map() {
        let response = normalize(
            raw(
                HttpMethod::Post,
                200,
                &[("set-cookie", "AuthSession=abc; Version=1; Path=/; HttpOnly")],
                "",
            ),
            true,
        )
        .unwrap();
        assert_eq!(response.cookies.get("AuthSession").map(String::as_str), Some("abc"));
        assert_eq!(response.cookies.get("HttpOnly").map(String::as_str), Some(""));
    }

    #[test]
    fn structured_body_detection() {
        assert!(Body::Json(json!({"a": 1})).is_structured());
        assert!(Body::Json(json!([1, 2])).is_structured());
        assert!(!Body::Json(json!("text")).is_structured());
        assert!(!Body::Json(json!(7)).is_structured());
        assert!(!Body::Raw("{}".to_string()).is_structured());
    }
}
