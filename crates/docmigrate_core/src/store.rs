use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{ConfigError, EnvVars, MigrateConfig};
use crate::document::TagSummary;

pub const TAG_LOOKUP_QUERY: &str =
    r#"*[_type == "tag" && slug.current in $slugs]{_id, "slug": slug.current}"#;

const ERROR_BODY_LIMIT: usize = 500;

pub trait ContentReadApi {
    /// Run a GROQ query. `params` are bound as `$name` variables.
    fn query(&mut self, query: &str, params: &Map<String, Value>) -> Result<Value>;
    fn get_document(&mut self, id: &str) -> Result<Option<Value>>;
    fn request_count(&self) -> usize;

    fn find_tags_by_slug(&mut self, slugs: &[String]) -> Result<Vec<TagSummary>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let mut params = Map::new();
        params.insert("slugs".to_string(), json!(slugs));
        let result = self.query(TAG_LOOKUP_QUERY, &params)?;
        serde_json::from_value(result).context("failed to decode tag lookup result")
    }
}

pub trait ContentWriteApi: ContentReadApi {
    /// Apply mutations as one request. Fails as a whole.
    fn mutate(&mut self, mutations: &[Mutation]) -> Result<()>;
    /// Upload image bytes and return the new asset document id.
    fn upload_image(&mut self, bytes: &[u8], filename: &str, content_type: &str) -> Result<String>;
}

/// Run a query whose result is an array of documents.
pub fn query_documents<A: ContentReadApi + ?Sized>(
    api: &mut A,
    query: &str,
    params: &Map<String, Value>,
) -> Result<Vec<Value>> {
    match api.query(query, params)? {
        Value::Array(documents) => Ok(documents),
        Value::Null => Ok(Vec::new()),
        other => bail!("expected an array from query, got {other}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateIfNotExists(Map<String, Value>),
    CreateOrReplace(Map<String, Value>),
    Patch(Patch),
}

impl Mutation {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::CreateIfNotExists(document) | Self::CreateOrReplace(document) => {
                document.get("_id").and_then(Value::as_str)
            }
            Self::Patch(patch) => Some(patch.id.as_str()),
        }
    }

    /// Wire form. A patch with several appends expands into one entry per insert.
    pub fn to_wire(&self) -> Vec<Value> {
        match self {
            Self::CreateIfNotExists(document) => vec![json!({"createIfNotExists": document})],
            Self::CreateOrReplace(document) => vec![json!({"createOrReplace": document})],
            Self::Patch(patch) => patch.to_wire(),
        }
    }
}

/// Field-level patch of one document: `setIfMissing`, then `set`, then appends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub id: String,
    pub set_if_missing: Map<String, Value>,
    pub set: Map<String, Value>,
    pub append: Vec<(String, Vec<Value>)>,
}

impl Patch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn set_if_missing(mut self, field: &str, value: Value) -> Self {
        self.set_if_missing.insert(field.to_string(), value);
        self
    }

    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.set.insert(field.to_string(), value);
        self
    }

    pub fn append(mut self, field: &str, items: Vec<Value>) -> Self {
        if !items.is_empty() {
            self.append.push((field.to_string(), items));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set_if_missing.is_empty() && self.set.is_empty() && self.append.is_empty()
    }

    fn to_wire(&self) -> Vec<Value> {
        let mut head = Map::new();
        head.insert("id".to_string(), Value::from(self.id.clone()));
        if !self.set_if_missing.is_empty() {
            head.insert(
                "setIfMissing".to_string(),
                Value::Object(self.set_if_missing.clone()),
            );
        }
        if !self.set.is_empty() {
            head.insert("set".to_string(), Value::Object(self.set.clone()));
        }

        let mut output = Vec::with_capacity(self.append.len().max(1));
        let mut appends = self.append.iter();
        if let Some((field, items)) = appends.next() {
            head.insert("insert".to_string(), insert_after_last(field, items));
        }
        output.push(json!({ "patch": head }));
        for (field, items) in appends {
            output.push(json!({
                "patch": {"id": self.id, "insert": insert_after_last(field, items)}
            }));
        }
        output
    }
}

fn insert_after_last(field: &str, items: &[Value]) -> Value {
    json!({"after": format!("{field}[-1]"), "items": items})
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityClientConfig {
    pub project_id: String,
    pub dataset: String,
    pub api_version: String,
    pub token: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl SanityClientConfig {
    pub fn resolve(config: &MigrateConfig, env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            project_id: config.project_id(env)?,
            dataset: config.dataset(env),
            api_version: config.api_version(env),
            token: config.write_token(env)?,
            user_agent: config.user_agent(env),
            timeout_ms: config.store_timeout_ms(env)?,
        })
    }

    pub fn base_url(&self) -> String {
        format!(
            "https://{}.api.sanity.io/v{}",
            self.project_id,
            self.api_version.trim_start_matches('v')
        )
    }
}

/// Blocking client for the hosted content API. Sequential, no retries.
pub struct SanityClient {
    client: Client,
    config: SanityClientConfig,
    request_count: usize,
}

impl SanityClient {
    pub fn new(config: SanityClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build content store HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    pub fn config(&self) -> &SanityClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.config.base_url(), path);
        Url::parse(&raw).with_context(|| format!("invalid content store URL: {raw}"))
    }

    fn send_json(&mut self, request: RequestBuilder) -> Result<Value> {
        self.request_count += 1;
        let response = request
            .bearer_auth(&self.config.token)
            .send()
            .context("failed to call content store API")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "content store request failed with HTTP {status}: {}",
                truncate(&body, ERROR_BODY_LIMIT)
            );
        }
        let payload: Value = response
            .json()
            .context("failed to decode content store JSON response")?;
        if let Some(error) = payload.get("error") {
            let description = error
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("content store API error: {description}");
        }
        Ok(payload)
    }
}

impl ContentReadApi for SanityClient {
    fn query(&mut self, query: &str, params: &Map<String, Value>) -> Result<Value> {
        let mut url = self.endpoint(&format!("data/query/{}", self.config.dataset))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("query", query);
            for (name, value) in params {
                pairs.append_pair(&format!("${name}"), &value.to_string());
            }
        }
        debug!("query {query}");
        let request = self.client.get(url);
        let payload: QueryResponse = serde_json::from_value(self.send_json(request)?)
            .context("failed to decode query response")?;
        Ok(payload.result)
    }

    fn get_document(&mut self, id: &str) -> Result<Option<Value>> {
        let mut url = self.endpoint(&format!("data/doc/{}", self.config.dataset))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("content store URL cannot take path segments"))?
            .push(id);
        let request = self.client.get(url);
        let payload: DocumentsResponse = serde_json::from_value(self.send_json(request)?)
            .with_context(|| format!("failed to decode document response for {id}"))?;
        Ok(payload.documents.into_iter().next())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl ContentWriteApi for SanityClient {
    fn mutate(&mut self, mutations: &[Mutation]) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&format!("data/mutate/{}", self.config.dataset))?;
        let wire: Vec<Value> = mutations.iter().flat_map(Mutation::to_wire).collect();
        let request = self
            .client
            .post(url)
            .query(&[("returnIds", "true"), ("visibility", "sync")])
            .json(&json!({ "mutations": wire }));
        self.send_json(request)?;
        Ok(())
    }

    fn upload_image(&mut self, bytes: &[u8], filename: &str, content_type: &str) -> Result<String> {
        let url = self.endpoint(&format!("assets/images/{}", self.config.dataset))?;
        let request = self
            .client
            .post(url)
            .query(&[("filename", filename)])
            .header("Content-Type", content_type)
            .body(bytes.to_vec());
        let payload: UploadResponse = serde_json::from_value(self.send_json(request)?)
            .with_context(|| format!("failed to decode upload response for {filename}"))?;
        Ok(payload.document.id)
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    documents: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    document: UploadedAsset,
}

#[derive(Debug, Deserialize)]
struct UploadedAsset {
    #[serde(rename = "_id")]
    id: String,
}
