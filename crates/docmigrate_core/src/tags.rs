use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::info;

use crate::document::{Reference, TagDocument, to_object};
use crate::slug::{TAG_SLUG_MAX, slugify};
use crate::store::{ContentWriteApi, Mutation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTag {
    pub label: String,
    pub slug: String,
    pub reference: Reference,
}

/// Resolves free-text labels to tag references, creating missing tag documents.
///
/// Lookups are memoized by slug for the lifetime of the resolver, so a label seen
/// twice in one run costs one query and is never created twice. In dry-run mode
/// missing tags are logged and counted but not written; the reference still
/// points at the id the tag would get.
#[derive(Debug, Default)]
pub struct TagResolver {
    dry_run: bool,
    known: BTreeMap<String, String>,
    created: Vec<String>,
    lookups: usize,
}

impl TagResolver {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn resolve<A: ContentWriteApi + ?Sized>(
        &mut self,
        store: &mut A,
        label: &str,
    ) -> Result<Option<Reference>> {
        Ok(self
            .resolve_all(store, &[label.to_string()])?
            .into_iter()
            .next()
            .map(|tag| tag.reference))
    }

    /// Resolve many labels with at most one lookup query. Output is de-duplicated by
    /// slug in first-seen order; labels that slugify to nothing are dropped.
    pub fn resolve_all<A: ContentWriteApi + ?Sized>(
        &mut self,
        store: &mut A,
        labels: &[String],
    ) -> Result<Vec<ResolvedTag>> {
        let mut wanted: Vec<(String, String)> = Vec::new();
        for label in labels {
            let label = label.trim();
            let slug = slugify(label, TAG_SLUG_MAX);
            if slug.is_empty() || wanted.iter().any(|(seen, _)| *seen == slug) {
                continue;
            }
            wanted.push((slug, label.to_string()));
        }

        let missing: Vec<String> = wanted
            .iter()
            .filter(|(slug, _)| !self.known.contains_key(slug))
            .map(|(slug, _)| slug.clone())
            .collect();
        if !missing.is_empty() {
            self.lookups += 1;
            let existing = store
                .find_tags_by_slug(&missing)
                .context("failed to look up tags by slug")?;
            for tag in existing {
                self.known.entry(tag.slug).or_insert(tag.id);
            }
        }

        let mut output = Vec::with_capacity(wanted.len());
        for (slug, label) in wanted {
            let id = match self.known.get(&slug) {
                Some(id) => id.clone(),
                None => self.create(store, &slug, &label)?,
            };
            output.push(ResolvedTag {
                label,
                slug,
                reference: Reference::keyed(id),
            });
        }
        Ok(output)
    }

    fn create<A: ContentWriteApi + ?Sized>(
        &mut self,
        store: &mut A,
        slug: &str,
        label: &str,
    ) -> Result<String> {
        let tag = TagDocument::new(slug, label);
        if self.dry_run {
            info!("[dry-run] would create tag {} ({label})", tag.id);
        } else {
            store
                .mutate(&[Mutation::CreateIfNotExists(to_object(&tag)?)])
                .with_context(|| format!("failed to create tag {}", tag.id))?;
            info!("created tag {} ({label})", tag.id);
        }
        self.known.insert(slug.to_string(), tag.id.clone());
        self.created.push(tag.id.clone());
        Ok(tag.id)
    }

    /// Tag ids created during this run (or that would be, in dry-run).
    pub fn created(&self) -> &[String] {
        &self.created
    }

    pub fn lookups(&self) -> usize {
        self.lookups
    }
}
