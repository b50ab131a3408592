//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives the client over real
//! TCP with each built-in transport. Both runs share one scenario, so the
//! socket and `ureq` adapters are held to identical observable behaviour.

use std::net::SocketAddr;

use serde_json::{json, Value};
use sofa_core::{
    AllDocsQuery, AuthMode, Body, CacheStore, ClientConfig, Error, FileCache, MemoryCache,
    Replication, SofaClient, TransportKind,
};

fn start_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

fn client(addr: SocketAddr, transport: TransportKind) -> SofaClient {
    let config = ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        transport,
        open_timeout: Some(5),
        ..Default::default()
    };
    SofaClient::from_config(&config).unwrap()
}

fn rev(response: &sofa_core::NormalizedResponse) -> String {
    response.document().unwrap()["rev"].as_str().unwrap().to_string()
}

fn document_lifecycle(transport: TransportKind) {
    let addr = start_server();
    let mut client = client(addr, transport);
    client.set_cache(Box::new(MemoryCache::new()));

    // Step 1: select a database that does not exist yet.
    client.set_database_or_create("notes").unwrap();
    let dbs = client.all_databases().unwrap();
    assert_eq!(dbs.body, Body::Json(json!(["notes"])));

    // Step 2: write a document; the cache now holds it with its new revision.
    let created = client.put("doc1", &json!({"a": 1})).unwrap();
    assert_eq!(created.status, 201);
    let rev1 = rev(&created);

    // Step 3: reading it back is a 304 revalidation.
    let read = client.get("doc1").unwrap();
    assert!(read.from_cache);
    assert_eq!(read.body, Body::Json(json!({"a": 1, "_rev": rev1})));

    // Step 4: HEAD goes to the server and leaves the cache alone.
    let head = client.head("doc1").unwrap();
    assert_eq!(head.status, 200);
    assert!(!head.from_cache);
    assert!(client.cache().unwrap().get("/notes/doc1").unwrap().is_some());

    // Step 5: a write from another client changes the ETag.
    let mut other = self::client(addr, transport);
    other.set_database("notes").unwrap();
    let updated = other
        .put("doc1", &json!({"a": 2, "_rev": rev1}))
        .unwrap();
    let rev2 = rev(&updated);

    let fresh = client.get("doc1").unwrap();
    assert!(!fresh.from_cache);
    assert_eq!(fresh.document().unwrap()["a"], 2);
    assert_eq!(fresh.etag(), Some(format!("\"{rev2}\"").as_str()));

    // Step 6: stale writes surface as conflicts.
    let err = client.put("doc1", &json!({"a": 3, "_rev": rev1})).unwrap_err();
    assert_eq!(err.code(), Some(409));

    // Step 7: delete drops the cache entry; the document is gone.
    client.delete("doc1", &rev2).unwrap();
    assert!(client.cache().unwrap().get("/notes/doc1").unwrap().is_none());
    let err = client.get("doc1").unwrap_err();
    assert!(err.is_not_found());
}

fn endpoint_helpers(transport: TransportKind) {
    let addr = start_server();
    let mut client = client(addr, transport);

    // ids
    let ids = client.generate_ids(3).unwrap();
    assert_eq!(ids.len(), 3);

    // databases
    client.set_database("inventory").unwrap();
    assert!(client.head("").unwrap_err().is_not_found());
    client.create_database("inventory").unwrap();
    assert_eq!(client.head("").unwrap().status, 200);
    let err = client.create_database("inventory").unwrap_err();
    assert_eq!(err.code(), Some(412));

    // post + bulk + all_docs
    let posted = client.post(&json!({"kind": "widget"}), None).unwrap();
    assert_eq!(posted.status, 201);
    client
        .bulk(vec![json!({"_id": "a"}), json!({"_id": "b"})], false)
        .unwrap();
    let listing = client
        .all_docs(&AllDocsQuery {
            keys: Some(vec!["a".to_string(), "b".to_string()]),
            ..Default::default()
        })
        .unwrap();
    let rows = listing.document().unwrap()["rows"].clone();
    assert_eq!(rows.as_array().unwrap().len(), 2);

    let everything = client
        .all_docs(&AllDocsQuery {
            include_docs: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(everything.document().unwrap()["total_rows"], 3);

    // attachment
    let doc = client.put("manual", &json!({"title": "Manual"})).unwrap();
    let manual_rev = rev(&doc);
    let uploaded = client
        .set_attachment("manual", "readme.txt", b"hello".to_vec(), "text/plain", Some(manual_rev.as_str()))
        .unwrap();
    assert_eq!(uploaded.status, 201);
    let manual = client.get("manual").unwrap();
    assert_eq!(
        manual.document().unwrap()["_attachments"]["readme.txt"]["length"],
        5
    );

    // compaction, replication, stats
    assert_eq!(client.compact(None).unwrap().status, 202);
    let mut replication = Replication::new("inventory", "backup");
    replication.create_target = true;
    let replicated = client.replicate(&replication).unwrap();
    assert_eq!(replicated.document().unwrap()["docs_written"], 4);
    assert!(client.stats().unwrap().document().unwrap()["couchdb"].is_object());

    // cleanup
    client.delete_database("backup").unwrap();
    assert!(client.delete_database("backup").unwrap_err().is_not_found());
}

fn cookie_login(transport: TransportKind) {
    let addr = start_server();
    let mut client = client(addr, transport);

    let token = client.login("admin", "relax", AuthMode::Cookie).unwrap();
    assert!(token.is_some());
    assert_eq!(client.session().session_token(), token.as_deref());

    let info = client.session_info().unwrap();
    assert_eq!(info.document().unwrap()["userCtx"]["name"], "admin");

    let err = client.login("admin", "", AuthMode::Cookie).unwrap_err();
    assert_eq!(err.code(), Some(401));
}

#[test]
fn document_lifecycle_over_ureq() {
    document_lifecycle(TransportKind::Ureq);
}

#[test]
fn document_lifecycle_over_socket() {
    document_lifecycle(TransportKind::Socket);
}

#[test]
fn endpoint_helpers_over_ureq() {
    endpoint_helpers(TransportKind::Ureq);
}

#[test]
fn endpoint_helpers_over_socket() {
    endpoint_helpers(TransportKind::Socket);
}

#[test]
fn cookie_login_over_ureq() {
    cookie_login(TransportKind::Ureq);
}

#[test]
fn cookie_login_over_socket() {
    cookie_login(TransportKind::Socket);
}

#[test]
fn switching_transport_mid_session() {
    let addr = start_server();
    let mut client = client(addr, TransportKind::Socket);
    client.set_database_or_create("db").unwrap();
    client.put("doc1", &json!({"a": 1})).unwrap();
    client.decode(false);

    client.set_transport(TransportKind::Ureq);
    let read = client.get("doc1").unwrap();
    assert!(matches!(read.body, Body::Raw(_)));
    assert_eq!(read.document().unwrap()["a"], 1);
}

#[test]
fn ids_with_spaces_and_plus_signs_round_trip() {
    let addr = start_server();
    for transport in [TransportKind::Ureq, TransportKind::Socket] {
        let mut client = client(addr, transport);
        client.set_database_or_create("spaced").unwrap();

        let id = format!("a b+c {transport:?}");
        let created = client.put(&id, &json!({"x": 1})).unwrap();
        assert_eq!(created.document().unwrap()["id"], id.as_str());

        let read = client.get_document(&id).unwrap();
        assert_eq!(read.document().unwrap()["_id"], id.as_str());
        assert_eq!(read.document().unwrap()["x"], 1);
    }

    let mut client = client(addr, TransportKind::Ureq);
    client.set_database("spaced").unwrap();
    let listing = client.all_docs(&AllDocsQuery::default()).unwrap();
    let ids: Vec<Value> = listing.document().unwrap()["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("a b+c Socket"), json!("a b+c Ureq")]);
}

#[test]
fn file_cache_survives_client_restart() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server();

    let mut first = client(addr, TransportKind::Ureq);
    first.set_cache(Box::new(FileCache::open(dir.path()).unwrap()));
    first.set_database_or_create("db").unwrap();
    first.put("doc1", &json!({"a": 1})).unwrap();
    drop(first);

    let mut second = client(addr, TransportKind::Socket);
    let cache = FileCache::open(dir.path()).unwrap();
    assert!(cache.usage().unwrap() > 0);
    second.set_cache(Box::new(cache));
    second.set_database("db").unwrap();

    let read = second.get("doc1").unwrap();
    assert!(read.from_cache);
    assert_eq!(read.document().unwrap()["a"], 1);
}

#[test]
fn unreachable_server_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    for transport in [TransportKind::Socket, TransportKind::Ureq] {
        let client = client(addr, transport);
        let err = client.all_databases().unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "{transport:?}: {err}");
    }
}

#[test]
fn undecoded_responses_keep_raw_json() {
    let addr = start_server();
    let mut client = client(addr, TransportKind::Ureq);
    client.decode(false);
    let response = client.all_databases().unwrap();
    match &response.body {
        Body::Raw(text) => assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!([])),
        other => panic!("expected raw body, got {other:?}"),
    }
}
