use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};

use crate::source::{Downloaded, SourceApi};
use crate::store::{ContentReadApi, ContentWriteApi, Mutation, TAG_LOOKUP_QUERY};

/// In-memory content store. Queries return whole documents filtered by the
/// `types` parameter; the tag lookup query is answered by slug.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub documents: BTreeMap<String, Value>,
    pub mutation_calls: usize,
    pub uploads: Vec<String>,
    pub failing_ids: BTreeSet<String>,
    request_count: usize,
}

impl MemoryStore {
    pub fn with_documents(documents: Vec<Value>) -> Self {
        let mut store = Self::default();
        for document in documents {
            store.insert(document);
        }
        store
    }

    pub fn insert(&mut self, document: Value) {
        let id = document
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.documents.insert(id, document);
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.documents.get(id)
    }

    pub fn write_count(&self) -> usize {
        self.mutation_calls + self.uploads.len()
    }

    pub fn count_of_type(&self, kind: &str) -> usize {
        self.documents
            .values()
            .filter(|document| document["_type"] == kind)
            .count()
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::CreateIfNotExists(document) => {
                let id = document_id(document)?;
                self.documents
                    .entry(id)
                    .or_insert_with(|| Value::Object(document.clone()));
            }
            Mutation::CreateOrReplace(document) => {
                let id = document_id(document)?;
                self.documents.insert(id, Value::Object(document.clone()));
            }
            Mutation::Patch(patch) => {
                let Some(Value::Object(target)) = self.documents.get_mut(&patch.id) else {
                    bail!("document not found: {}", patch.id);
                };
                for (field, value) in &patch.set_if_missing {
                    target.entry(field.clone()).or_insert_with(|| value.clone());
                }
                for (field, value) in &patch.set {
                    target.insert(field.clone(), value.clone());
                }
                for (field, items) in &patch.append {
                    let Some(Value::Array(existing)) = target.get_mut(field) else {
                        bail!("cannot insert into missing array {field} on {}", patch.id);
                    };
                    existing.extend(items.iter().cloned());
                }
            }
        }
        Ok(())
    }
}

fn document_id(document: &Map<String, Value>) -> Result<String> {
    match document.get("_id").and_then(Value::as_str) {
        Some(id) => Ok(id.to_string()),
        None => bail!("document without _id"),
    }
}

impl ContentReadApi for MemoryStore {
    fn query(&mut self, query: &str, params: &Map<String, Value>) -> Result<Value> {
        self.request_count += 1;
        if query == TAG_LOOKUP_QUERY {
            let slugs: BTreeSet<&str> = params
                .get("slugs")
                .and_then(Value::as_array)
                .map(|slugs| slugs.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let rows: Vec<Value> = self
                .documents
                .values()
                .filter(|document| document["_type"] == "tag")
                .filter_map(|document| {
                    let slug = document["slug"]["current"].as_str()?;
                    slugs
                        .contains(slug)
                        .then(|| json!({"_id": document["_id"], "slug": slug}))
                })
                .collect();
            return Ok(Value::Array(rows));
        }

        let types: Option<BTreeSet<&str>> = params
            .get("types")
            .and_then(Value::as_array)
            .map(|types| types.iter().filter_map(Value::as_str).collect());
        let rows: Vec<Value> = self
            .documents
            .values()
            .filter(|document| match &types {
                Some(types) => document["_type"]
                    .as_str()
                    .is_some_and(|kind| types.contains(kind)),
                None => true,
            })
            .cloned()
            .collect();
        Ok(Value::Array(rows))
    }

    fn get_document(&mut self, id: &str) -> Result<Option<Value>> {
        self.request_count += 1;
        Ok(self.documents.get(id).cloned())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl ContentWriteApi for MemoryStore {
    fn mutate(&mut self, mutations: &[Mutation]) -> Result<()> {
        self.request_count += 1;
        self.mutation_calls += 1;
        for mutation in mutations {
            if let Some(id) = mutation.document_id()
                && self.failing_ids.contains(id)
            {
                bail!("simulated write failure for {id}");
            }
        }
        for mutation in mutations {
            self.apply(mutation)?;
        }
        Ok(())
    }

    fn upload_image(
        &mut self,
        _bytes: &[u8],
        filename: &str,
        _content_type: &str,
    ) -> Result<String> {
        self.request_count += 1;
        self.uploads.push(filename.to_string());
        Ok(format!("image-upload-{}", self.uploads.len()))
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockSource {
    pub texts: BTreeMap<String, String>,
    pub json: BTreeMap<String, Value>,
    pub bytes: BTreeMap<String, Downloaded>,
    pub requested: Vec<String>,
}

impl MockSource {
    pub fn with_text(mut self, url: &str, body: &str) -> Self {
        self.texts.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_json(mut self, url: &str, body: Value) -> Self {
        self.json.insert(url.to_string(), body);
        self
    }

    pub fn with_bytes(mut self, url: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.bytes.insert(
            url.to_string(),
            Downloaded {
                bytes: bytes.to_vec(),
                content_type: Some(content_type.to_string()),
            },
        );
        self
    }
}

impl SourceApi for MockSource {
    fn fetch_text(&mut self, url: &str, _headers: &[(&str, &str)]) -> Result<String> {
        self.requested.push(url.to_string());
        match self.texts.get(url) {
            Some(body) => Ok(body.clone()),
            None => bail!("request failed (404 Not Found): {url}"),
        }
    }

    fn fetch_json(&mut self, url: &str) -> Result<Value> {
        self.requested.push(url.to_string());
        match self.json.get(url) {
            Some(body) => Ok(body.clone()),
            None => bail!("request failed (404 Not Found): {url}"),
        }
    }

    fn fetch_bytes(&mut self, url: &str) -> Result<Downloaded> {
        self.requested.push(url.to_string());
        match self.bytes.get(url) {
            Some(body) => Ok(body.clone()),
            None => bail!("request failed (404 Not Found): {url}"),
        }
    }

    fn request_count(&self) -> usize {
        self.requested.len()
    }
}

pub(crate) fn env_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}
