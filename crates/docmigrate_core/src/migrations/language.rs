use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{document_id, of_types, types_param};
use crate::config::{ConfigError, EnvVars};
use crate::document::{TransformError, decode_record};
use crate::runner::{Migration, Plan, RunContext};
use crate::store::{Mutation, Patch, query_documents};

const LANGUAGE_DOCUMENTS_QUERY: &str =
    r#"*[_type in $types && defined(language)]{_id, _type, language}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageOptions {
    pub types: Vec<String>,
}

impl LanguageOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            types: env.list_or("LANGUAGE_DOCUMENT_TYPES", &["video"]),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LanguageRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    language: Value,
}

/// Turns a scalar `language` into a one-element list.
pub struct LanguageMigration {
    options: LanguageOptions,
}

impl LanguageMigration {
    pub fn new(options: LanguageOptions) -> Self {
        Self { options }
    }
}

impl Migration for LanguageMigration {
    type Item = Value;

    fn name(&self) -> &'static str {
        "language"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<Value>> {
        let documents = query_documents(
            &mut *ctx.store,
            LANGUAGE_DOCUMENTS_QUERY,
            &types_param(&self.options.types),
        )?;
        Ok(of_types(documents, &self.options.types))
    }

    fn item_id(&self, item: &Value) -> String {
        document_id(item)
    }

    fn plan(&mut self, _ctx: &mut RunContext<'_>, item: &Value) -> Result<Plan> {
        let record: LanguageRecord = decode_record(item.clone())?;
        match record.language {
            Value::Null => Ok(Plan::Unchanged("no language".to_string())),
            Value::Array(_) => Ok(Plan::Unchanged("language is already a list".to_string())),
            Value::String(language) if language.trim().is_empty() => {
                Ok(Plan::Skip("language is blank".to_string()))
            }
            Value::String(language) => {
                let summary = format!("language {language:?} -> [{language:?}]");
                let patch = Patch::new(record.id).set("language", json!([language]));
                Ok(Plan::update(vec![Mutation::Patch(patch)], summary))
            }
            other => Err(TransformError::InvalidField {
                doc_id: record.id,
                field: "language",
                reason: format!("expected a string or a list, got {other}"),
            }
            .into()),
        }
    }
}
