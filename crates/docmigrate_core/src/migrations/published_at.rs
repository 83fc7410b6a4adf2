use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use super::{document_id, of_types, types_param};
use crate::config::{ConfigError, EnvVars};
use crate::document::{TransformError, decode_record, non_blank, normalize_timestamp};
use crate::runner::{Migration, Plan, RunContext};
use crate::store::{Mutation, Patch, query_documents};

const MISSING_PUBLISHED_AT_QUERY: &str = r#"*[_type in $types && !defined(publishedAt)]{_id, _type, _createdAt, publishedAt, publishDate, datePublished, pubDate}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedAtOptions {
    pub types: Vec<String>,
}

impl PublishedAtOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            types: env.list_or(
                "PUBLISHED_AT_TYPES",
                &["opEd", "curatedPost", "vlog", "project", "podcast"],
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatedRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    published_at: Option<Value>,
    #[serde(default)]
    date_published: Option<String>,
    #[serde(default)]
    pub_date: Option<String>,
    #[serde(default)]
    publish_date: Option<String>,
    #[serde(default, rename = "_createdAt")]
    created_at: Option<String>,
}

impl DatedRecord {
    /// First non-blank fallback, in priority order.
    fn fallback(&self) -> Option<(&'static str, String)> {
        [
            ("datePublished", &self.date_published),
            ("pubDate", &self.pub_date),
            ("publishDate", &self.publish_date),
            ("_createdAt", &self.created_at),
        ]
        .into_iter()
        .find_map(|(field, value)| non_blank(value.as_deref()).map(|value| (field, value)))
    }
}

/// Fills a missing `publishedAt` from the best date the document already has.
pub struct PublishedAtMigration {
    options: PublishedAtOptions,
}

impl PublishedAtMigration {
    pub fn new(options: PublishedAtOptions) -> Self {
        Self { options }
    }
}

impl Migration for PublishedAtMigration {
    type Item = Value;

    fn name(&self) -> &'static str {
        "published-at"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<Value>> {
        let documents = query_documents(
            &mut *ctx.store,
            MISSING_PUBLISHED_AT_QUERY,
            &types_param(&self.options.types),
        )?;
        Ok(of_types(documents, &self.options.types))
    }

    fn item_id(&self, item: &Value) -> String {
        document_id(item)
    }

    fn plan(&mut self, _ctx: &mut RunContext<'_>, item: &Value) -> Result<Plan> {
        let record: DatedRecord = decode_record(item.clone())?;
        if record.published_at.as_ref().is_some_and(|value| !value.is_null()) {
            return Ok(Plan::Unchanged("publishedAt already set".to_string()));
        }
        let Some((field, raw)) = record.fallback() else {
            return Ok(Plan::Skip("no fallback date available for publishedAt".to_string()));
        };
        let Some(published_at) = normalize_timestamp(&raw) else {
            return Err(TransformError::InvalidDate {
                doc_id: record.id,
                field,
                value: raw,
            }
            .into());
        };

        let summary = format!("publishedAt {published_at} from {field}");
        let patch = Patch::new(record.id).set_if_missing("publishedAt", Value::from(published_at));
        Ok(Plan::update(vec![Mutation::Patch(patch)], summary))
    }
}
