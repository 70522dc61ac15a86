//! Usage: Request/response records shared by collections, history, and imports.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 5000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDataPart {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_file: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub form_data: BTreeMap<String, FormDataPart>,
    #[serde(default)]
    pub timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub time_ms: i64,
    #[serde(default)]
    pub size: i64,
}

/// Older stores wrote `null` for empty maps.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
