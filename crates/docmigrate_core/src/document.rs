use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Fresh unique `_key` for an array item.
pub fn new_key() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "_type", default = "reference_type")]
    pub kind: String,
    #[serde(rename = "_ref")]
    pub target_id: String,
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

fn reference_type() -> String {
    "reference".to_string()
}

impl Reference {
    /// Array-item reference carrying a fresh `_key`.
    pub fn keyed(target_id: impl Into<String>) -> Self {
        Self {
            kind: reference_type(),
            target_id: target_id.into(),
            key: Some(new_key()),
        }
    }

    /// Single-valued reference field (no `_key`).
    pub fn to(target_id: impl Into<String>) -> Self {
        Self {
            kind: reference_type(),
            target_id: target_id.into(),
            key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugField {
    pub current: String,
}

impl SlugField {
    pub fn new(current: impl Into<String>) -> Self {
        Self {
            current: current.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_type")]
    pub kind: String,
    pub label: String,
    pub slug: SlugField,
}

impl TagDocument {
    pub fn new(slug: &str, label: &str) -> Self {
        Self {
            id: crate::slug::tag_document_id(slug),
            kind: "tag".to_string(),
            label: label.to_string(),
            slug: SlugField::new(slug),
        }
    }
}

/// Tag lookup row: `{_id, "slug": slug.current}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageField {
    #[serde(rename = "_type")]
    pub kind: String,
    pub asset: Reference,
}

impl ImageField {
    pub fn from_asset(asset_id: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            asset: Reference::to(asset_id),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("_type").and_then(Value::as_str) != Some("image") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlock {
    #[serde(rename = "_type")]
    pub kind: String,
    pub title: String,
    pub asset_type: String,
    pub platform: String,
    pub platform_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_code: Option<String>,
    pub player_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Value>,
}

/// Errors raised while turning a fetched record into a write plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("{doc_id}: required field `{field}` is missing")]
    MissingField { doc_id: String, field: &'static str },
    #[error("{doc_id}: field `{field}` is invalid: {reason}")]
    InvalidField {
        doc_id: String,
        field: &'static str,
        reason: String,
    },
    #[error("{doc_id}: field `{field}` holds an unparseable date: {value}")]
    InvalidDate {
        doc_id: String,
        field: &'static str,
        value: String,
    },
}

/// Decode a fetched JSON record into its typed shape, naming the document on failure.
pub fn decode_record<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, TransformError> {
    let doc_id = value
        .get("_id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    serde_json::from_value(value).map_err(|error| TransformError::InvalidField {
        doc_id,
        field: "_document",
        reason: error.to_string(),
    })
}

/// Serialize a typed value into a JSON object map.
pub fn to_object<T: Serialize>(value: &T) -> anyhow::Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object, got {other}"),
    }
}

/// Non-blank trimmed string field.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// Parse RFC 3339, RFC 2822 or a bare `YYYY-MM-DD[THH:MM:SS]` date (taken as UTC) and
/// render it as an RFC 3339 UTC timestamp with millisecond precision.
pub fn normalize_timestamp(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })?;
    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Strip the `drafts.` prefix from a document id.
pub fn published_id(id: &str) -> &str {
    id.strip_prefix("drafts.").unwrap_or(id)
}
