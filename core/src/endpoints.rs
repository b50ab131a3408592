//! Convenience calls for common server endpoints.
//!
//! Each helper validates its arguments, shapes the request and delegates to
//! `SofaClient::send`. Only document reads and writes go through the cache,
//! so these helpers never consult it (attachment uploads drop the owning
//! document's entry).

use serde_json::{json, Value};
use tracing::debug;
use url::form_urlencoded;

use crate::client::SofaClient;
use crate::error::{Error, Result};
use crate::http::{Headers, HttpMethod};
use crate::request::encode_component;
use crate::response::NormalizedResponse;
use crate::session::{Auth, AuthMode, Session, SESSION_COOKIE};
use crate::types::{AllDocsQuery, BulkDocs, Replication};

const FORM: &str = "application/x-www-form-urlencoded";

fn json_body(value: &impl serde::Serialize) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| Error::validation(format!("request body cannot be serialized: {e}")))
}

fn require_name<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    if value.is_empty() {
        Err(Error::validation(format!("{what} must not be empty")))
    } else {
        Ok(value)
    }
}

impl SofaClient {
    /// Authenticate subsequent requests.
    ///
    /// `Basic` only records the credentials. `Cookie` posts them to
    /// `/_session` and keeps the returned session token, which is also
    /// returned to the caller. A failed login leaves the previous
    /// credentials in place.
    pub fn login(&mut self, user: &str, password: &str, mode: AuthMode) -> Result<Option<String>> {
        require_name(user, "user name")?;

        match mode {
            AuthMode::Basic => {
                self.session.auth = Auth::Basic {
                    user: user.to_string(),
                    password: password.to_string(),
                };
                Ok(None)
            }
            AuthMode::Cookie => {
                let pending = Session {
                    auth: Auth::Cookie { token: None },
                    cookies: self.session.cookies.clone(),
                };
                let form = form_urlencoded::Serializer::new(String::new())
                    .append_pair("name", user)
                    .append_pair("password", password)
                    .finish();
                let headers: Headers = [("Content-Type", FORM)].into_iter().collect();

                let response = self.send_as(
                    &pending,
                    HttpMethod::Post,
                    "/_session",
                    Some(form.into_bytes()),
                    headers,
                )?;
                let token = response.cookies.get(SESSION_COOKIE).cloned().ok_or_else(|| {
                    Error::Protocol {
                        status: response.status,
                        message: "login response carried no session cookie".to_string(),
                    }
                })?;

                debug!(user, "cookie session established");
                self.session.auth = Auth::Cookie {
                    token: Some(token.clone()),
                };
                Ok(Some(token))
            }
        }
    }

    /// `GET /_session`: who the server thinks we are.
    pub fn session_info(&self) -> Result<NormalizedResponse> {
        self.send(HttpMethod::Get, "/_session", None, Headers::new())
    }

    /// Select `name`, creating the database first if the server reports it
    /// missing.
    pub fn set_database_or_create(&mut self, name: &str) -> Result<&mut Self> {
        require_name(name, "database name")?;
        let path = format!("/{}", encode_component(name));
        match self.send(HttpMethod::Head, &path, None, Headers::new()) {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!(database = name, "creating missing database");
                self.create_database(name)?;
            }
            Err(err) => return Err(err),
        }
        self.set_database(name)
    }

    /// `POST /{db}[/{path}]`: store a document under a server-assigned id,
    /// or post to a handler below the database.
    pub fn post(&self, doc: &Value, path: Option<&str>) -> Result<NormalizedResponse> {
        let url = match path {
            None => self.db_path("")?,
            Some(path) => {
                let path = require_name(path.trim_start_matches('/'), "post path")?;
                self.db_path(&format!("/{}", encode_component(path)))?
            }
        };
        self.send(HttpMethod::Post, &url, Some(json_body(doc)?), Headers::new())
    }

    /// `POST /{db}/_bulk_docs`.
    pub fn bulk(&self, docs: Vec<Value>, all_or_nothing: bool) -> Result<NormalizedResponse> {
        let url = self.db_path("/_bulk_docs")?;
        let body = json_body(&BulkDocs {
            all_or_nothing,
            docs,
        })?;
        self.send(HttpMethod::Post, &url, Some(body), Headers::new())
    }

    /// `_all_docs`, as a POST when `query.keys` is set.
    pub fn all_docs(&self, query: &AllDocsQuery) -> Result<NormalizedResponse> {
        let url = self.db_path(&format!("/_all_docs{}", query.query_string()))?;
        match &query.keys {
            Some(keys) => {
                let body = json_body(&json!({ "keys": keys }))?;
                self.send(HttpMethod::Post, &url, Some(body), Headers::new())
            }
            None => self.send(HttpMethod::Get, &url, None, Headers::new()),
        }
    }

    pub fn all_databases(&self) -> Result<NormalizedResponse> {
        self.send(HttpMethod::Get, "/_all_dbs", None, Headers::new())
    }

    /// Ask the server for `count` fresh ids.
    pub fn generate_ids(&self, count: u32) -> Result<Vec<String>> {
        if count == 0 {
            return Err(Error::validation("id count must be at least 1"));
        }
        let response = self.send(
            HttpMethod::Get,
            &format!("/_uuids?count={count}"),
            None,
            Headers::new(),
        )?;

        let ids = response
            .document()
            .and_then(|doc| doc.get("uuids").and_then(Value::as_array).cloned())
            .ok_or_else(|| Error::Protocol {
                status: response.status,
                message: "response carried no uuids".to_string(),
            })?;
        Ok(ids
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    pub fn create_database(&self, name: &str) -> Result<NormalizedResponse> {
        let path = format!("/{}", encode_component(require_name(name, "database name")?));
        self.send(HttpMethod::Put, &path, None, Headers::new())
    }

    pub fn delete_database(&self, name: &str) -> Result<NormalizedResponse> {
        let path = format!("/{}", encode_component(require_name(name, "database name")?));
        self.send(HttpMethod::Delete, &path, None, Headers::new())
    }

    /// `POST /_replicate`.
    pub fn replicate(&self, replication: &Replication) -> Result<NormalizedResponse> {
        replication.validate()?;
        let body = json_body(replication)?;
        self.send(HttpMethod::Post, "/_replicate", Some(body), Headers::new())
    }

    /// Compact the current database, or one design document's views.
    pub fn compact(&self, design: Option<&str>) -> Result<NormalizedResponse> {
        let url = match design {
            None => self.db_path("/_compact")?,
            Some(design) => {
                let design = require_name(design, "design document name")?;
                self.db_path(&format!("/_compact/{}", encode_component(design)))?
            }
        };
        self.send(HttpMethod::Post, &url, None, Headers::new())
    }

    /// Upload `data` as attachment `name` of document `doc_id`.
    ///
    /// `rev` is required when the document already exists.
    pub fn set_attachment(
        &mut self,
        doc_id: &str,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
        rev: Option<&str>,
    ) -> Result<NormalizedResponse> {
        let name = require_name(name, "attachment name")?;
        let content_type = require_name(content_type, "attachment content type")?;

        let mut url = format!("{}/{}", self.document_path(doc_id)?, encode_component(name));
        if let Some(rev) = rev {
            url.push_str(&format!("?rev={}", encode_component(require_name(rev, "revision")?)));
        }
        self.invalidate_document(doc_id)?;

        let headers: Headers = [("Content-Type", content_type)].into_iter().collect();
        self.send(HttpMethod::Put, &url, Some(data), headers)
    }

    /// Server statistics.
    pub fn stats(&self) -> Result<NormalizedResponse> {
        self.send(HttpMethod::Get, "/_stats", None, Headers::new())
    }
}
