//! In-memory document store speaking a CouchDB-compatible HTTP subset.
//!
//! Enough of the protocol to drive the client end to end: databases,
//! documents with revisions and ETags, conditional GET, bulk writes,
//! `_all_docs`, attachments, cookie sessions and local replication.
//! Nothing is persisted.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

/// Name of the cookie carrying a session token.
pub const SESSION_COOKIE: &str = "AuthSession";

pub type Document = Map<String, Value>;

#[derive(Debug, Default)]
pub struct Database {
    pub docs: BTreeMap<String, Document>,
}

#[derive(Debug, Default)]
pub struct Couch {
    pub databases: BTreeMap<String, Database>,
    sessions: HashMap<String, String>,
}

pub type Db = Arc<RwLock<Couch>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Couch::default()));
    Router::new()
        .route("/_all_dbs", get(all_dbs))
        .route("/_uuids", get(uuids))
        .route("/_session", get(session_info).post(login))
        .route("/_stats", get(stats))
        .route("/_replicate", post(replicate))
        .route(
            "/{db}",
            get(db_info).put(create_db).delete(delete_db).post(post_doc),
        )
        .route("/{db}/_all_docs", get(all_docs).post(all_docs_by_keys))
        .route("/{db}/_bulk_docs", post(bulk_docs))
        .route("/{db}/_compact", post(compact))
        .route("/{db}/_compact/{design}", post(compact_design))
        .route("/{db}/{doc}", get(get_doc).put(put_doc).delete(delete_doc))
        .route("/{db}/{doc}/{attachment}", put(put_attachment))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Errors and helpers
// ---------------------------------------------------------------------------

/// Error reply in the `{"error": ..., "reason": ...}` shape.
#[derive(Debug)]
pub struct CouchError {
    status: StatusCode,
    error: &'static str,
    reason: String,
}

impl CouchError {
    fn new(status: StatusCode, error: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            error,
            reason: reason.into(),
        }
    }

    fn no_db() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "Database does not exist.")
    }

    fn missing() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "missing")
    }

    fn conflict() -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", "Document update conflict.")
    }

    fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", reason)
    }
}

impl IntoResponse for CouchError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.error, "reason": self.reason })),
        )
            .into_response()
    }
}

type Reply<T> = Result<T, CouchError>;

fn etag(rev: &str) -> String {
    format!("\"{rev}\"")
}

/// Next revision after `current`: generation + 1 and a fresh suffix.
fn next_rev(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split('-').next())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

fn rev_of(doc: &Document) -> Option<&str> {
    doc.get("_rev").and_then(Value::as_str)
}

fn database<'a>(couch: &'a Couch, name: &str) -> Reply<&'a Database> {
    couch.databases.get(name).ok_or_else(CouchError::no_db)
}

fn database_mut<'a>(couch: &'a mut Couch, name: &str) -> Reply<&'a mut Database> {
    couch.databases.get_mut(name).ok_or_else(CouchError::no_db)
}

impl Database {
    /// Store `body` as `id`, checking `rev` against the current revision.
    fn write(&mut self, id: &str, mut body: Document, rev: Option<String>) -> Reply<String> {
        let current = self.docs.get(id).and_then(rev_of).map(str::to_string);
        match (&current, &rev) {
            (Some(current), Some(rev)) if current == rev => {}
            (None, None) => {}
            _ => return Err(CouchError::conflict()),
        }

        let new_rev = next_rev(current.as_deref());
        body.insert("_id".to_string(), Value::String(id.to_string()));
        body.insert("_rev".to_string(), Value::String(new_rev.clone()));
        self.docs.insert(id.to_string(), body);
        Ok(new_rev)
    }
}

fn saved(status: StatusCode, id: &str, rev: &str) -> Response {
    (
        status,
        [(header::ETAG, etag(rev))],
        Json(json!({ "ok": true, "id": id, "rev": rev })),
    )
        .into_response()
}

fn object(body: Value) -> Reply<Document> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(CouchError::bad_request("Document must be a JSON object")),
    }
}

/// Revision from `?rev=` or, failing that, the body's `_rev`.
fn requested_rev(query: &RevQuery, body: &Document) -> Option<String> {
    query
        .rev
        .clone()
        .or_else(|| rev_of(body).map(str::to_string))
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let line = headers.get(header::COOKIE)?.to_str().ok()?;
    line.split(';').find_map(|crumb| {
        let (key, value) = crumb.split_once('=')?;
        (key.trim() == SESSION_COOKIE).then(|| value.trim().to_string())
    })
}

// ---------------------------------------------------------------------------
// Server endpoints
// ---------------------------------------------------------------------------

async fn all_dbs(State(db): State<Db>) -> Json<Vec<String>> {
    let couch = db.read().await;
    Json(couch.databases.keys().cloned().collect())
}

#[derive(Deserialize)]
struct UuidsQuery {
    count: Option<usize>,
}

async fn uuids(Query(query): Query<UuidsQuery>) -> Json<Value> {
    let count = query.count.unwrap_or(1).min(1000);
    let uuids: Vec<String> = (0..count)
        .map(|_| Uuid::new_v4().simple().to_string())
        .collect();
    Json(json!({ "uuids": uuids }))
}

#[derive(Deserialize)]
struct LoginForm {
    name: String,
    password: String,
}

async fn login(State(db): State<Db>, Form(form): Form<LoginForm>) -> Reply<Response> {
    if form.name.is_empty() || form.password.is_empty() {
        return Err(CouchError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Name or password is incorrect.",
        ));
    }

    let token = Uuid::new_v4().simple().to_string();
    db.write()
        .await
        .sessions
        .insert(token.clone(), form.name.clone());
    debug!(name = %form.name, "session opened");

    let cookie = format!("{SESSION_COOKIE}={token}; Version=1; Path=/; HttpOnly");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true, "name": form.name, "roles": [] })),
    )
        .into_response())
}

async fn session_info(State(db): State<Db>, headers: HeaderMap) -> Json<Value> {
    let couch = db.read().await;
    let name = session_token(&headers).and_then(|token| couch.sessions.get(&token).cloned());
    Json(json!({ "ok": true, "userCtx": { "name": name, "roles": [] } }))
}

async fn stats(State(db): State<Db>) -> Json<Value> {
    let couch = db.read().await;
    let documents: usize = couch.databases.values().map(|d| d.docs.len()).sum();
    Json(json!({
        "couchdb": {
            "open_databases": { "value": couch.databases.len() },
            "documents": { "value": documents }
        }
    }))
}

#[derive(Deserialize)]
struct ReplicateRequest {
    source: String,
    target: String,
    #[serde(default)]
    create_target: bool,
}

async fn replicate(State(db): State<Db>, Json(req): Json<ReplicateRequest>) -> Reply<Json<Value>> {
    let mut couch = db.write().await;
    let docs = database(&couch, &req.source)?.docs.clone();

    if !couch.databases.contains_key(&req.target) {
        if !req.create_target {
            return Err(CouchError::no_db());
        }
        couch.databases.insert(req.target.clone(), Database::default());
    }
    let target = database_mut(&mut couch, &req.target)?;
    let written = docs.len();
    target.docs.extend(docs);

    Ok(Json(json!({ "ok": true, "docs_written": written })))
}

// ---------------------------------------------------------------------------
// Database endpoints
// ---------------------------------------------------------------------------

async fn db_info(State(db): State<Db>, Path(name): Path<String>) -> Reply<Json<Value>> {
    let couch = db.read().await;
    let database = database(&couch, &name)?;
    Ok(Json(json!({ "db_name": name, "doc_count": database.docs.len() })))
}

async fn create_db(State(db): State<Db>, Path(name): Path<String>) -> Reply<(StatusCode, Json<Value>)> {
    let mut couch = db.write().await;
    if couch.databases.contains_key(&name) {
        return Err(CouchError::new(
            StatusCode::PRECONDITION_FAILED,
            "file_exists",
            "The database could not be created, the file already exists.",
        ));
    }
    couch.databases.insert(name, Database::default());
    Ok((StatusCode::CREATED, Json(json!({ "ok": true }))))
}

async fn delete_db(State(db): State<Db>, Path(name): Path<String>) -> Reply<Json<Value>> {
    let mut couch = db.write().await;
    couch.databases.remove(&name).ok_or_else(CouchError::no_db)?;
    Ok(Json(json!({ "ok": true })))
}

async fn post_doc(
    State(db): State<Db>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Reply<Response> {
    let body = object(body)?;
    let id = match body.get("_id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().simple().to_string(),
    };
    let rev = rev_of(&body).map(str::to_string);

    let mut couch = db.write().await;
    let rev = database_mut(&mut couch, &name)?.write(&id, body, rev)?;
    Ok(saved(StatusCode::CREATED, &id, &rev))
}

#[derive(Deserialize)]
struct AllDocsParams {
    include_docs: Option<bool>,
    descending: Option<bool>,
    limit: Option<usize>,
    skip: Option<usize>,
    startkey: Option<String>,
    endkey: Option<String>,
}

#[derive(Deserialize)]
struct KeysBody {
    keys: Vec<String>,
}

fn json_key(raw: &Option<String>) -> Reply<Option<String>> {
    raw.as_deref()
        .map(|key| {
            serde_json::from_str::<String>(key)
                .map_err(|_| CouchError::bad_request("keys must be JSON strings"))
        })
        .transpose()
}

fn row(id: &str, doc: &Document, include_docs: bool) -> Value {
    let mut row = json!({
        "id": id,
        "key": id,
        "value": { "rev": rev_of(doc) },
    });
    if include_docs {
        row["doc"] = Value::Object(doc.clone());
    }
    row
}

async fn all_docs(
    State(db): State<Db>,
    Path(name): Path<String>,
    Query(params): Query<AllDocsParams>,
) -> Reply<Json<Value>> {
    let couch = db.read().await;
    let database = database(&couch, &name)?;
    let start = json_key(&params.startkey)?;
    let end = json_key(&params.endkey)?;
    let include_docs = params.include_docs.unwrap_or(false);

    let mut ids: Vec<&String> = database
        .docs
        .keys()
        .filter(|id| start.as_ref().map_or(true, |s| *id >= s))
        .filter(|id| end.as_ref().map_or(true, |e| *id <= e))
        .collect();
    if params.descending.unwrap_or(false) {
        ids.reverse();
    }

    let rows: Vec<Value> = ids
        .into_iter()
        .skip(params.skip.unwrap_or(0))
        .take(params.limit.unwrap_or(usize::MAX))
        .map(|id| row(id, &database.docs[id], include_docs))
        .collect();

    Ok(Json(json!({
        "total_rows": database.docs.len(),
        "offset": params.skip.unwrap_or(0),
        "rows": rows,
    })))
}

async fn all_docs_by_keys(
    State(db): State<Db>,
    Path(name): Path<String>,
    Query(params): Query<AllDocsParams>,
    Json(body): Json<KeysBody>,
) -> Reply<Json<Value>> {
    let couch = db.read().await;
    let database = database(&couch, &name)?;
    let include_docs = params.include_docs.unwrap_or(false);

    let rows: Vec<Value> = body
        .keys
        .iter()
        .map(|key| match database.docs.get(key) {
            Some(doc) => row(key, doc, include_docs),
            None => json!({ "key": key, "error": "not_found" }),
        })
        .collect();

    Ok(Json(json!({
        "total_rows": database.docs.len(),
        "offset": 0,
        "rows": rows,
    })))
}

#[derive(Deserialize)]
struct BulkBody {
    docs: Vec<Value>,
    #[serde(default)]
    all_or_nothing: bool,
}

async fn bulk_docs(
    State(db): State<Db>,
    Path(name): Path<String>,
    Json(body): Json<BulkBody>,
) -> Reply<(StatusCode, Json<Vec<Value>>)> {
    let mut couch = db.write().await;
    let database = database_mut(&mut couch, &name)?;

    let mut docs = Vec::with_capacity(body.docs.len());
    for doc in body.docs {
        let doc = object(doc)?;
        let id = match doc.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        docs.push((id, doc));
    }

    if body.all_or_nothing {
        let conflicted = docs.iter().any(|(id, doc)| {
            let current = database.docs.get(id).and_then(rev_of);
            current != rev_of(doc)
        });
        if conflicted {
            return Err(CouchError::new(
                StatusCode::EXPECTATION_FAILED,
                "conflict",
                "Document update conflict.",
            ));
        }
    }

    let results: Vec<Value> = docs
        .into_iter()
        .map(|(id, doc)| {
            let rev = rev_of(&doc).map(str::to_string);
            match database.write(&id, doc, rev) {
                Ok(rev) => json!({ "ok": true, "id": id, "rev": rev }),
                Err(err) => json!({ "id": id, "error": err.error, "reason": err.reason }),
            }
        })
        .collect();

    Ok((StatusCode::CREATED, Json(results)))
}

async fn compact(State(db): State<Db>, Path(name): Path<String>) -> Reply<(StatusCode, Json<Value>)> {
    let couch = db.read().await;
    database(&couch, &name)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

async fn compact_design(
    State(db): State<Db>,
    Path((name, _design)): Path<(String, String)>,
) -> Reply<(StatusCode, Json<Value>)> {
    compact(State(db), Path(name)).await
}

// ---------------------------------------------------------------------------
// Document endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RevQuery {
    rev: Option<String>,
}

async fn get_doc(
    State(db): State<Db>,
    Path((name, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply<Response> {
    let couch = db.read().await;
    let doc = database(&couch, &name)?
        .docs
        .get(&id)
        .ok_or_else(CouchError::missing)?;
    let tag = etag(rev_of(doc).unwrap_or_default());

    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == tag);
    if matches {
        debug!(%name, %id, "not modified");
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, tag)]).into_response());
    }

    Ok(([(header::ETAG, tag)], Json(Value::Object(doc.clone()))).into_response())
}

async fn put_doc(
    State(db): State<Db>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
    Json(body): Json<Value>,
) -> Reply<Response> {
    let body = object(body)?;
    let rev = requested_rev(&query, &body);

    let mut couch = db.write().await;
    let rev = database_mut(&mut couch, &name)?.write(&id, body, rev)?;
    Ok(saved(StatusCode::CREATED, &id, &rev))
}

async fn delete_doc(
    State(db): State<Db>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
) -> Reply<Json<Value>> {
    let mut couch = db.write().await;
    let database = database_mut(&mut couch, &name)?;
    let current = database
        .docs
        .get(&id)
        .and_then(rev_of)
        .map(str::to_string)
        .ok_or_else(CouchError::missing)?;
    if query.rev.as_deref() != Some(current.as_str()) {
        return Err(CouchError::conflict());
    }

    database.docs.remove(&id);
    Ok(Json(json!({ "ok": true, "id": id, "rev": next_rev(Some(&current)) })))
}

async fn put_attachment(
    State(db): State<Db>,
    Path((name, id, attachment)): Path<(String, String, String)>,
    Query(query): Query<RevQuery>,
    headers: HeaderMap,
    data: Bytes,
) -> Reply<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut couch = db.write().await;
    let database = database_mut(&mut couch, &name)?;
    let mut doc = database.docs.get(&id).cloned().unwrap_or_default();

    let stubs = doc
        .entry("_attachments")
        .or_insert_with(|| Value::Object(Map::new()));
    stubs[attachment.as_str()] = json!({
        "content_type": content_type,
        "length": data.len(),
        "stub": true,
    });

    let rev = database.write(&id, doc, query.rev)?;
    Ok(saved(StatusCode::CREATED, &id, &rev))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revisions_count_up_from_one() {
        let first = next_rev(None);
        assert!(first.starts_with("1-"));
        assert_eq!(first.len(), 2 + 32);

        let second = next_rev(Some(&first));
        assert!(second.starts_with("2-"));
        assert_ne!(first, second);
    }

    #[test]
    fn write_enforces_revisions() {
        let mut database = Database::default();
        let rev = database.write("doc", Map::new(), None).unwrap();

        let stale = database.write("doc", Map::new(), None).unwrap_err();
        assert_eq!(stale.status, StatusCode::CONFLICT);

        let next = database.write("doc", Map::new(), Some(rev.clone())).unwrap();
        assert!(next.starts_with("2-"));
        assert_eq!(rev_of(&database.docs["doc"]), Some(next.as_str()));
    }

    #[test]
    fn write_rejects_revision_for_missing_document() {
        let mut database = Database::default();
        let err = database
            .write("doc", Map::new(), Some("1-abc".to_string()))
            .unwrap_err();
        assert_eq!(err.error, "conflict");
    }

    #[test]
    fn session_token_reads_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "theme=dark; AuthSession=tok".parse().unwrap());
        assert_eq!(session_token(&headers).as_deref(), Some("tok"));
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn etag_quotes_revision() {
        assert_eq!(etag("1-abc"), "\"1-abc\"");
    }
}
