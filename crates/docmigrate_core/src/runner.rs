use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;

use crate::document::TransformError;
use crate::source::SourceApi;
use crate::store::{ContentWriteApi, Mutation};
use crate::tags::TagResolver;

/// Everything a migration needs while fetching and planning.
pub struct RunContext<'a> {
    pub store: &'a mut dyn ContentWriteApi,
    pub source: &'a mut dyn SourceApi,
    pub dry_run: bool,
    pub tags: TagResolver,
}

impl<'a> RunContext<'a> {
    pub fn new(
        store: &'a mut dyn ContentWriteApi,
        source: &'a mut dyn SourceApi,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            source,
            dry_run,
            tags: TagResolver::new(dry_run),
        }
    }

    pub fn request_count(&self) -> usize {
        self.store.request_count() + self.source.request_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Write {
        kind: WriteKind,
        mutations: Vec<Mutation>,
        summary: String,
    },
    Unchanged(String),
    Skip(String),
}

impl Plan {
    pub fn create(mutations: Vec<Mutation>, summary: impl Into<String>) -> Self {
        Self::Write {
            kind: WriteKind::Create,
            mutations,
            summary: summary.into(),
        }
    }

    pub fn update(mutations: Vec<Mutation>, summary: impl Into<String>) -> Self {
        Self::Write {
            kind: WriteKind::Update,
            mutations,
            summary: summary.into(),
        }
    }
}

/// One batch transformation: fetch candidates, then plan each independently.
/// Committing planned writes is the runner's job, never the migration's.
pub trait Migration {
    type Item;

    fn name(&self) -> &'static str;
    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<Self::Item>>;
    fn item_id(&self, item: &Self::Item) -> String;
    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &Self::Item) -> Result<Plan>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentAction {
    Created,
    Updated,
    WouldCreate,
    WouldUpdate,
    Unchanged,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentResult {
    pub id: String,
    pub action: DocumentAction,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub migration: String,
    pub dry_run: bool,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tags_created: usize,
    pub documents: Vec<DocumentResult>,
    pub errors: Vec<String>,
    pub request_count: usize,
}

impl RunReport {
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }

    fn record(&mut self, id: String, action: DocumentAction, detail: String) {
        match action {
            DocumentAction::Created | DocumentAction::WouldCreate => self.created += 1,
            DocumentAction::Updated | DocumentAction::WouldUpdate => self.updated += 1,
            DocumentAction::Unchanged => self.unchanged += 1,
            DocumentAction::Skipped => self.skipped += 1,
            DocumentAction::Failed => {
                self.failed += 1;
                self.errors.push(format!("{id}: {detail}"));
            }
        }
        self.documents.push(DocumentResult { id, action, detail });
    }
}

/// Run a migration to completion. Only configuration and fetch errors abort;
/// per-document plan and commit errors are logged, counted and skipped.
pub fn run_migration<M: Migration + ?Sized>(
    migration: &mut M,
    ctx: &mut RunContext<'_>,
) -> Result<RunReport> {
    let name = migration.name();
    let mut report = RunReport {
        migration: name.to_string(),
        dry_run: ctx.dry_run,
        ..RunReport::default()
    };
    info!("starting {name} (dry_run={})", ctx.dry_run);

    let tags_before = ctx.tags.created().len();
    let items = migration
        .fetch(ctx)
        .with_context(|| format!("{name}: failed to fetch source documents"))?;
    report.fetched = items.len();
    if items.is_empty() {
        info!("{name}: nothing to do");
    }

    let total = items.len();
    for (index, item) in items.iter().enumerate() {
        let id = migration.item_id(item);
        let progress = format!("[{}/{total}]", index + 1);

        let plan = match migration.plan(ctx, item) {
            Ok(plan) => plan,
            Err(error) => {
                let detail = format!("{error:#}");
                if error.downcast_ref::<TransformError>().is_some() {
                    warn!("{progress} skipping {id}: {detail}");
                    report.record(id, DocumentAction::Skipped, detail);
                } else {
                    warn!("{progress} failed {id}: {detail}");
                    report.record(id, DocumentAction::Failed, detail);
                }
                continue;
            }
        };

        match plan {
            Plan::Unchanged(reason) => {
                debug!("{progress} unchanged {id}: {reason}");
                report.record(id, DocumentAction::Unchanged, reason);
            }
            Plan::Skip(reason) => {
                warn!("{progress} skipping {id}: {reason}");
                report.record(id, DocumentAction::Skipped, reason);
            }
            Plan::Write { mutations, .. } if mutations.is_empty() => {
                report.record(id, DocumentAction::Unchanged, "no mutations".to_string());
            }
            Plan::Write {
                kind,
                mutations,
                summary,
            } => {
                let verb = match kind {
                    WriteKind::Create => "create",
                    WriteKind::Update => "update",
                };
                if ctx.dry_run {
                    info!("{progress} [dry-run] would {verb} {id}: {summary}");
                    let action = match kind {
                        WriteKind::Create => DocumentAction::WouldCreate,
                        WriteKind::Update => DocumentAction::WouldUpdate,
                    };
                    report.record(id, action, summary);
                    continue;
                }
                match ctx.store.mutate(&mutations) {
                    Ok(()) => {
                        info!("{progress} {verb}d {id}: {summary}");
                        let action = match kind {
                            WriteKind::Create => DocumentAction::Created,
                            WriteKind::Update => DocumentAction::Updated,
                        };
                        report.record(id, action, summary);
                    }
                    Err(error) => {
                        let detail = format!("failed to {verb}: {error:#}");
                        warn!("{progress} {id}: {detail}");
                        report.record(id, DocumentAction::Failed, detail);
                    }
                }
            }
        }
    }

    report.tags_created = ctx.tags.created().len() - tags_before;
    report.request_count = ctx.request_count();
    info!(
        "{name}: fetched {}, {} {}, {} {}, unchanged {}, skipped {}, failed {}",
        report.fetched,
        if ctx.dry_run { "would create" } else { "created" },
        report.created,
        if ctx.dry_run { "would update" } else { "updated" },
        report.updated,
        report.unchanged,
        report.skipped,
        report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use serde_json::{Map, Value, json};

    use super::*;
    use crate::store::Patch;
    use crate::testing::{MemoryStore, MockSource};

    /// Sets `done: true` on every listed id; ids starting with `bad` fail to transform,
    /// ids starting with `net` fail with a plain error.
    struct MarkDone {
        ids: Vec<&'static str>,
        fetch_fails: bool,
    }

    impl Migration for MarkDone {
        type Item = &'static str;

        fn name(&self) -> &'static str {
            "mark-done"
        }

        fn fetch(&mut self, _ctx: &mut RunContext<'_>) -> Result<Vec<Self::Item>> {
            if self.fetch_fails {
                bail!("upstream unavailable");
            }
            Ok(self.ids.clone())
        }

        fn item_id(&self, item: &Self::Item) -> String {
            (*item).to_string()
        }

        fn plan(&mut self, ctx: &mut RunContext<'_>, item: &Self::Item) -> Result<Plan> {
            if item.starts_with("bad") {
                return Err(TransformError::MissingField {
                    doc_id: (*item).to_string(),
                    field: "title",
                }
                .into());
            }
            if item.starts_with("net") {
                bail!("connection reset");
            }
            if item.starts_with("skip") {
                return Ok(Plan::Skip("no date".to_string()));
            }
            match ctx.store.get_document(item)? {
                Some(document) if document["done"] == json!(true) => {
                    Ok(Plan::Unchanged("already done".to_string()))
                }
                Some(_) => Ok(Plan::update(
                    vec![Mutation::Patch(Patch::new(*item).set("done", json!(true)))],
                    "done=true",
                )),
                None => {
                    let mut document = Map::new();
                    document.insert("_id".to_string(), Value::from(*item));
                    document.insert("_type".to_string(), Value::from("thing"));
                    document.insert("done".to_string(), json!(true));
                    Ok(Plan::create(
                        vec![Mutation::CreateIfNotExists(document)],
                        "new thing",
                    ))
                }
            }
        }
    }

    fn seeded_store() -> MemoryStore {
        MemoryStore::with_documents(vec![
            json!({"_id": "a", "_type": "thing"}),
            json!({"_id": "b", "_type": "thing", "done": true}),
        ])
    }

    fn migration() -> MarkDone {
        MarkDone {
            ids: vec!["a", "b", "c", "bad-1", "net-1", "skip-1"],
            fetch_fails: false,
        }
    }

    #[test]
    fn live_run_commits_and_counts() {
        let mut store = seeded_store();
        let mut source = MockSource::default();
        let mut ctx = RunContext::new(&mut store, &mut source, false);
        let report = run_migration(&mut migration(), &mut ctx).expect("run");

        assert_eq!(report.fetched, 6);
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, vec!["net-1: connection reset".to_string()]);
        assert_eq!(report.documents.len(), 6);
        assert_eq!(store.get("a").map(|doc| doc["done"].clone()), Some(json!(true)));
        assert!(store.get("c").is_some());
        assert_eq!(store.mutation_calls, 2);
    }

    #[test]
    fn dry_run_writes_nothing_but_reports_the_same_plan() {
        let mut live_store = seeded_store();
        let mut live_source = MockSource::default();
        let live = {
            let mut ctx = RunContext::new(&mut live_store, &mut live_source, false);
            run_migration(&mut migration(), &mut ctx).expect("live")
        };

        let mut dry_store = seeded_store();
        let mut dry_source = MockSource::default();
        let dry = {
            let mut ctx = RunContext::new(&mut dry_store, &mut dry_source, true);
            run_migration(&mut migration(), &mut ctx).expect("dry")
        };

        assert_eq!(dry_store.write_count(), 0);
        assert!(dry.dry_run);
        assert_eq!(dry.writes(), live.writes());
        assert_eq!(
            dry.documents
                .iter()
                .filter(|doc| matches!(
                    doc.action,
                    DocumentAction::WouldCreate | DocumentAction::WouldUpdate
                ))
                .count(),
            live_store.mutation_calls
        );
    }

    #[test]
    fn commit_failures_do_not_abort_the_batch() {
        let mut store = seeded_store();
        store.failing_ids.insert("a".to_string());
        let mut source = MockSource::default();
        let mut ctx = RunContext::new(&mut store, &mut source, false);
        let report = run_migration(&mut migration(), &mut ctx).expect("run");

        assert_eq!(report.failed, 2);
        assert_eq!(report.created, 1);
        assert!(report.errors.iter().any(|error| error.starts_with("a: failed to update")));
    }

    #[test]
    fn fetch_failure_is_fatal() {
        let mut store = seeded_store();
        let mut source = MockSource::default();
        let mut ctx = RunContext::new(&mut store, &mut source, false);
        let mut failing = MarkDone {
            ids: Vec::new(),
            fetch_fails: true,
        };
        let error = run_migration(&mut failing, &mut ctx).expect_err("must fail");
        assert!(format!("{error:#}").contains("upstream unavailable"));
    }

    #[test]
    fn empty_fetch_is_a_successful_no_op() {
        let mut store = seeded_store();
        let mut source = MockSource::default();
        let mut ctx = RunContext::new(&mut store, &mut source, false);
        let mut empty = MarkDone {
            ids: Vec::new(),
            fetch_fails: false,
        };
        let report = run_migration(&mut empty, &mut ctx).expect("run");
        assert_eq!(report.fetched, 0);
        assert!(report.documents.is_empty());
    }

    #[test]
    fn report_serializes_actions_in_snake_case() {
        let mut report = RunReport::default();
        report.record("x".to_string(), DocumentAction::WouldCreate, "new".to_string());
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["documents"][0]["action"], "would_create");
        assert_eq!(value["created"], 1);
    }
}
