//! Usage: Postman v2 collection parsing and flattening into stored requests.

use crate::db::Db;
use crate::domain::collections::save_collection;
use crate::domain::request_data::{null_as_default, RequestData, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmanCollection {
    #[serde(default)]
    pub info: PostmanInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub item: Vec<PostmanItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmanInfo {
    #[serde(default)]
    pub name: String,
    /// Either a plain string or a `{content, type}` object depending on the exporter.
    #[serde(default)]
    pub description: serde_json::Value,
    #[serde(default)]
    pub schema: String,
}

/// A folder (has `item`) or a request leaf (has `request`); some exports carry both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmanItem {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<PostmanRequest>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub item: Vec<PostmanItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmanRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: PostmanUrl,
    #[serde(default, deserialize_with = "null_as_default")]
    pub header: Vec<PostmanHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<PostmanBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostmanUrl {
    Raw(String),
    Detailed {
        #[serde(default)]
        raw: String,
    },
}

impl Default for PostmanUrl {
    fn default() -> Self {
        PostmanUrl::Raw(String::new())
    }
}

impl PostmanUrl {
    pub fn raw(&self) -> &str {
        match self {
            PostmanUrl::Raw(raw) | PostmanUrl::Detailed { raw } => raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmanHeader {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmanBody {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub raw: String,
}

pub fn parse_collection(bytes: &[u8]) -> AppResult<PostmanCollection> {
    serde_json::from_slice(bytes)
        .map_err(|e| format!("SEC_INVALID_INPUT: invalid postman collection: {e}").into())
}

/// Depth-first, in document order: an item's own request comes before its children.
pub fn flatten_requests(collection: &PostmanCollection) -> Vec<RequestData> {
    let mut out = Vec::new();
    collect_requests(&collection.item, &mut out);
    out
}

fn collect_requests(items: &[PostmanItem], out: &mut Vec<RequestData>) {
    for item in items {
        if let Some(req) = item.request.as_ref() {
            out.push(to_request_data(req));
        }
        if !item.item.is_empty() {
            collect_requests(&item.item, out);
        }
    }
}

fn to_request_data(req: &PostmanRequest) -> RequestData {
    let headers: BTreeMap<String, String> = req
        .header
        .iter()
        .map(|h| (h.key.clone(), h.value.clone()))
        .collect();

    RequestData {
        method: req.method.clone(),
        url: req.url.raw().to_string(),
        headers,
        body: req.body.as_ref().map(|b| b.raw.clone()).unwrap_or_default(),
        form_data: BTreeMap::new(),
        timeout: DEFAULT_REQUEST_TIMEOUT_MS,
    }
}

/// Store the flattened requests under `info.name`. Returns how many were saved (0 saves nothing).
pub async fn save_imported(db: &Db, collection: &PostmanCollection) -> AppResult<usize> {
    let requests = flatten_requests(collection);
    if requests.is_empty() {
        tracing::info!(collection = %collection.info.name, "postman import: no requests; nothing saved");
        return Ok(0);
    }
    save_collection(db, &collection.info.name, &requests).await?;
    tracing::info!(
        collection = %collection.info.name,
        requests = requests.len(),
        "postman collection imported"
    );
    Ok(requests.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"{
      "info": {"name": "Demo", "description": {"content": "d", "type": "text/plain"}, "schema": "v2.1"},
      "item": [
        {"name": "list", "request": {"method": "GET", "url": {"raw": "{{base}}/items", "host": ["{{base}}"]},
          "header": [{"key": "Accept", "value": "application/json"}]}},
        {"name": "folder", "item": [
          {"name": "create", "request": {"method": "POST", "url": "{{base}}/items",
            "body": {"mode": "raw", "raw": "{\"a\":1}"}}},
          {"name": "inner", "item": [
            {"name": "delete", "request": {"method": "DELETE", "url": {"raw": "{{base}}/items/1"}}}
          ]}
        ]},
        {"name": "last", "request": {"method": "PATCH", "url": "{{base}}/x", "header": null}}
      ]
    }"#;

    #[test]
    fn flatten_is_depth_first_in_document_order() {
        let collection = parse_collection(NESTED.as_bytes()).expect("parse");
        assert_eq!(collection.info.name, "Demo");

        let requests = flatten_requests(&collection);
        let methods: Vec<&str> = requests.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, vec!["GET", "POST", "DELETE", "PATCH"]);

        assert_eq!(requests[0].url, "{{base}}/items");
        assert_eq!(
            requests[0].headers.get("Accept").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(requests[1].body, "{\"a\":1}");
        assert_eq!(requests[1].url, "{{base}}/items");
        assert!(requests.iter().all(|r| r.timeout == 5000));
    }

    #[test]
    fn string_description_is_accepted() {
        let raw = r#"{"info":{"name":"S","description":"plain"},"item":[]}"#;
        let collection = parse_collection(raw.as_bytes()).expect("parse");
        assert_eq!(collection.info.description, serde_json::json!("plain"));
        assert!(flatten_requests(&collection).is_empty());
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let err = parse_collection(b"{\"info\":").expect_err("malformed");
        assert_eq!(err.code(), "SEC_INVALID_INPUT");
    }
}
