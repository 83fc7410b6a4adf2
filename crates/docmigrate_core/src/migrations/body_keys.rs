use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use super::{document_id, of_types, types_param};
use crate::blocks::{ensure_array_item_keys, ensure_block_keys, text_to_blocks};
use crate::config::{ConfigError, EnvVars};
use crate::document::{TransformError, decode_record};
use crate::runner::{Migration, Plan, RunContext};
use crate::store::{Mutation, Patch, query_documents};

const BODY_DOCUMENTS_QUERY: &str = r#"*[_type in $types]{_id, _type, body, media}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyKeyOptions {
    pub types: Vec<String>,
}

impl BodyKeyOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            types: env.list_or("BODY_KEY_TYPES", &["opEd"]),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BodyRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    media: Value,
}

/// Repairs rich-text bodies and media arrays so every item carries a `_key`.
pub struct BodyKeyMigration {
    options: BodyKeyOptions,
}

impl BodyKeyMigration {
    pub fn new(options: BodyKeyOptions) -> Self {
        Self { options }
    }
}

impl Migration for BodyKeyMigration {
    type Item = Value;

    fn name(&self) -> &'static str {
        "body-keys"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<Value>> {
        let documents = query_documents(
            &mut *ctx.store,
            BODY_DOCUMENTS_QUERY,
            &types_param(&self.options.types),
        )?;
        Ok(of_types(documents, &self.options.types))
    }

    fn item_id(&self, item: &Value) -> String {
        document_id(item)
    }

    fn plan(&mut self, _ctx: &mut RunContext<'_>, item: &Value) -> Result<Plan> {
        let record: BodyRecord = decode_record(item.clone())?;
        let mut patch = Patch::new(record.id.clone());
        let mut changed = Vec::new();

        match &record.body {
            Value::Null => {
                patch = patch.set("body", Value::Array(Vec::new()));
                changed.push("body (empty)".to_string());
            }
            Value::String(text) => {
                let blocks = text_to_blocks(text);
                changed.push(format!("body ({} block(s) from text)", blocks.len()));
                patch = patch.set("body", serde_json::to_value(blocks)?);
            }
            Value::Array(blocks) => {
                let repaired = ensure_block_keys(blocks);
                if repaired != *blocks {
                    changed.push(format!("body ({} block(s) repaired)", repaired.len()));
                    patch = patch.set("body", Value::Array(repaired));
                }
            }
            other => {
                return Err(TransformError::InvalidField {
                    doc_id: record.id,
                    field: "body",
                    reason: format!("expected text or a block list, got {other}"),
                }
                .into());
            }
        }

        if let Value::Array(media) = &record.media
            && let Some(keyed) = ensure_array_item_keys(media)
        {
            changed.push("media".to_string());
            patch = patch.set("media", Value::Array(keyed));
        }

        if patch.is_empty() {
            return Ok(Plan::Unchanged("all keys present".to_string()));
        }
        Ok(Plan::update(
            vec![Mutation::Patch(patch)],
            format!("set {}", changed.join(", ")),
        ))
    }
}
