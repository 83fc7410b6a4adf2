use std::collections::BTreeSet;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{document_id, of_types, string_list, types_param};
use crate::config::{ConfigError, EnvVars};
use crate::document::{decode_record, non_blank};
use crate::runner::{Migration, Plan, RunContext};
use crate::store::{Mutation, Patch, query_documents};

const TAGGED_DOCUMENTS_QUERY: &str =
    r#"*[_type in $types && count(tags) > 0]{_id, _type, tags, tags_ref}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMigrationOptions {
    pub types: Vec<String>,
}

impl TagMigrationOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            types: env.list_or("TAG_DOCUMENT_TYPES", &["curatedPost", "vlog", "socialPost"]),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TaggedRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    tags: Option<Vec<Value>>,
    #[serde(default)]
    tags_ref: Option<Vec<Value>>,
}

/// Backfills `tags_ref` from the legacy string `tags`. The string list is left in
/// place so older readers keep working.
pub struct TagMigration {
    options: TagMigrationOptions,
}

impl TagMigration {
    pub fn new(options: TagMigrationOptions) -> Self {
        Self { options }
    }
}

impl Migration for TagMigration {
    type Item = Value;

    fn name(&self) -> &'static str {
        "tags"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<Value>> {
        let documents = query_documents(
            &mut *ctx.store,
            TAGGED_DOCUMENTS_QUERY,
            &types_param(&self.options.types),
        )?;
        Ok(of_types(documents, &self.options.types)
            .into_iter()
            .filter(|document| !string_list(document.get("tags")).is_empty())
            .collect())
    }

    fn item_id(&self, item: &Value) -> String {
        document_id(item)
    }

    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &Value) -> Result<Plan> {
        let record: TaggedRecord = decode_record(item.clone())?;
        let labels: Vec<String> = record
            .tags
            .unwrap_or_default()
            .iter()
            .filter_map(|tag| non_blank(tag.as_str()))
            .collect();
        if labels.is_empty() {
            return Ok(Plan::Unchanged("no string tags".to_string()));
        }

        let referenced: BTreeSet<String> = record
            .tags_ref
            .unwrap_or_default()
            .iter()
            .filter_map(|reference| reference.get("_ref").and_then(Value::as_str))
            .map(ToString::to_string)
            .collect();

        let resolved = ctx.tags.resolve_all(&mut *ctx.store, &labels)?;
        let mut additions = Vec::new();
        let mut added = Vec::new();
        for tag in resolved {
            if referenced.contains(&tag.reference.target_id) {
                continue;
            }
            added.push(tag.reference.target_id.clone());
            additions.push(serde_json::to_value(&tag.reference)?);
        }
        if additions.is_empty() {
            return Ok(Plan::Unchanged(format!(
                "all {} tag(s) already referenced",
                labels.len()
            )));
        }

        let summary = format!("append tags_ref {}", added.join(", "));
        let patch = Patch::new(record.id)
            .set_if_missing("tags_ref", json!([]))
            .append("tags_ref", additions);
        Ok(Plan::update(vec![Mutation::Patch(patch)], summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{DocumentAction, RunReport, run_migration};
    use crate::testing::{MemoryStore, MockSource, env_map};

    fn options() -> TagMigrationOptions {
        TagMigrationOptions::from_env(&EnvVars::from_map(&env_map(&[]))).expect("options")
    }

    fn run(store: &mut MemoryStore, dry_run: bool) -> RunReport {
        let mut source = MockSource::default();
        let mut ctx = RunContext::new(store, &mut source, dry_run);
        run_migration(&mut TagMigration::new(options()), &mut ctx).expect("run")
    }

    #[test]
    fn defaults_cover_the_tagged_types() {
        assert_eq!(options().types, vec!["curatedPost", "vlog", "socialPost"]);
        let custom = TagMigrationOptions::from_env(&EnvVars::from_map(&env_map(&[(
            "TAG_DOCUMENT_TYPES",
            "opEd, podcast",
        )])))
        .expect("options");
        assert_eq!(custom.types, vec!["opEd", "podcast"]);
    }

    #[test]
    fn case_variant_labels_yield_one_tag_and_one_reference() {
        let mut store = MemoryStore::with_documents(vec![json!({
            "_id": "post-1",
            "_type": "curatedPost",
            "tags": ["Open Source", "open source"]
        })]);

        let report = run(&mut store, false);
        assert_eq!(report.updated, 1);
        assert_eq!(report.tags_created, 1);
        assert_eq!(store.count_of_type("tag"), 1);

        let document = store.get("post-1").expect("document");
        let references = document["tags_ref"].as_array().expect("tags_ref");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0]["_ref"], "tag.open-source");
        assert_eq!(references[0]["_type"], "reference");
        assert!(references[0]["_key"].is_string());
        assert_eq!(document["tags"], json!(["Open Source", "open source"]));
    }

    #[test]
    fn rerun_is_a_no_op() {
        let mut store = MemoryStore::with_documents(vec![json!({
            "_id": "vlog-1",
            "_type": "vlog",
            "tags": ["Trade", "Policy"]
        })]);
        run(&mut store, false);
        let writes = store.write_count();

        let rerun = run(&mut store, false);
        assert_eq!(rerun.unchanged, 1);
        assert_eq!(rerun.writes(), 0);
        assert_eq!(rerun.tags_created, 0);
        assert_eq!(store.write_count(), writes);
        assert_eq!(store.count_of_type("tag"), 2);
        assert_eq!(
            store.get("vlog-1").expect("document")["tags_ref"]
                .as_array()
                .map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn only_missing_references_are_appended() {
        let mut store = MemoryStore::with_documents(vec![
            json!({"_id": "tag.policy", "_type": "tag", "label": "Policy", "slug": {"current": "policy"}}),
            json!({
                "_id": "social-1",
                "_type": "socialPost",
                "tags": ["Policy", "Energy"],
                "tags_ref": [{"_type": "reference", "_ref": "tag.policy", "_key": "k1"}]
            }),
        ]);

        let report = run(&mut store, false);
        assert_eq!(report.updated, 1);
        let references = store.get("social-1").expect("document")["tags_ref"]
            .as_array()
            .cloned()
            .expect("tags_ref");
        let targets: Vec<&str> = references
            .iter()
            .filter_map(|reference| reference["_ref"].as_str())
            .collect();
        assert_eq!(targets, vec!["tag.policy", "tag.energy"]);
        assert_eq!(references[0]["_key"], "k1");
    }

    #[test]
    fn dry_run_plans_the_same_writes_without_committing() {
        let seed = || {
            MemoryStore::with_documents(vec![
                json!({"_id": "a", "_type": "curatedPost", "tags": ["One"]}),
                json!({"_id": "b", "_type": "vlog", "tags": ["Two", "One"]}),
                json!({"_id": "c", "_type": "opEd", "tags": ["Ignored"]}),
            ])
        };

        let mut dry_store = seed();
        let dry = run(&mut dry_store, true);
        assert_eq!(dry_store.write_count(), 0);
        assert!(dry.documents.iter().all(|result| result.action == DocumentAction::WouldUpdate));

        let mut live_store = seed();
        let live = run(&mut live_store, false);
        assert_eq!(dry.writes(), live.writes());
        assert_eq!(dry.tags_created, live.tags_created);
        assert_eq!(live.fetched, 2);
        assert!(live_store.get("c").expect("opEd")["tags_ref"].is_null());
    }

    #[test]
    fn malformed_tags_are_skipped_not_fatal() {
        let mut store = MemoryStore::with_documents(vec![
            json!({"_id": "bad", "_type": "vlog", "tags": ["Fine"], "tags_ref": "oops"}),
            json!({"_id": "good", "_type": "vlog", "tags": ["Fine"]}),
        ]);
        let report = run(&mut store, false);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 0);
    }
}
