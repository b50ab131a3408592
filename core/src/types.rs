//! Request payloads for the endpoint helpers.
//!
//! # Design
//! These types only shape JSON bodies and query strings; they carry no
//! protocol logic. Empty or default fields are omitted from the wire so the
//! server applies its own defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::request::encode_component;

/// Options for `GET/POST /{db}/_all_docs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllDocsQuery {
    pub include_docs: bool,
    pub limit: Option<u64>,
    pub start_key: Option<String>,
    pub end_key: Option<String>,
    /// When set the request becomes a POST with `{"keys": [...]}`.
    pub keys: Option<Vec<String>>,
    pub descending: bool,
    pub skip: Option<u64>,
}

impl AllDocsQuery {
    /// Query string including the leading `?`, or empty when no option is set.
    pub fn query_string(&self) -> String {
        let mut params = Vec::new();
        if self.include_docs {
            params.push("include_docs=true".to_string());
        }
        if let Some(key) = &self.start_key {
            params.push(format!("startkey={}", encode_component(&json_key(key))));
        }
        if let Some(key) = &self.end_key {
            params.push(format!("endkey={}", encode_component(&json_key(key))));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={limit}"));
        }
        if self.descending {
            params.push("descending=true".to_string());
        }
        if let Some(skip) = self.skip {
            params.push(format!("skip={skip}"));
        }

        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

fn json_key(key: &str) -> String {
    Value::String(key.to_string()).to_string()
}

/// Body of `POST /{db}/_bulk_docs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDocs {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all_or_nothing: bool,
    pub docs: Vec<Value>,
}

/// Body of `POST /_replicate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Replication {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continuous: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub create_target: bool,
    /// `ddoc/filter` name of a filter function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_params: Option<Value>,
}

impl Replication {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::validation("replication is missing a source"));
        }
        if self.target.is_empty() {
            return Err(Error::validation("replication is missing a target"));
        }
        if let Some(params) = &self.query_params {
            if self.filter.is_none() {
                return Err(Error::validation("query_params requires a filter"));
            }
            if !params.is_object() && !params.is_array() {
                return Err(Error::validation(
                    "query_params must be an object or an array",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_all_docs_query_has_no_query_string() {
        assert_eq!(AllDocsQuery::default().query_string(), "");
    }

    #[test]
    fn all_docs_query_encodes_json_keys() {
        let query = AllDocsQuery {
            include_docs: true,
            limit: Some(10),
            start_key: Some("a".to_string()),
            end_key: Some("b".to_string()),
            descending: true,
            skip: Some(2),
            ..Default::default()
        };
        assert_eq!(
            query.query_string(),
            "?include_docs=true&startkey=%22a%22&endkey=%22b%22&limit=10&descending=true&skip=2"
        );
    }

    #[test]
    fn bulk_docs_omits_default_all_or_nothing() {
        let bulk = BulkDocs {
            all_or_nothing: false,
            docs: vec![json!({"_id": "a"})],
        };
        assert_eq!(serde_json::to_value(&bulk).unwrap(), json!({"docs": [{"_id": "a"}]}));

        let strict = BulkDocs {
            all_or_nothing: true,
            docs: vec![],
        };
        assert_eq!(
            serde_json::to_value(&strict).unwrap(),
            json!({"all_or_nothing": true, "docs": []})
        );
    }

    #[test]
    fn replication_serializes_only_set_fields() {
        let mut replication = Replication::new("db", "http://backup:5984/db");
        replication.continuous = true;
        assert_eq!(
            serde_json::to_value(&replication).unwrap(),
            json!({"source": "db", "target": "http://backup:5984/db", "continuous": true})
        );
    }

    #[test]
    fn replication_validation() {
        assert!(Replication::new("", "b").validate().is_err());
        assert!(Replication::new("a", "").validate().is_err());

        let mut replication = Replication::new("a", "b");
        replication.query_params = Some(json!({"k": 1}));
        assert!(replication.validate().is_err());

        replication.filter = Some("app/by_type".to_string());
        assert!(replication.validate().is_ok());

        replication.query_params = Some(json!("scalar"));
        assert!(replication.validate().is_err());
    }
}
