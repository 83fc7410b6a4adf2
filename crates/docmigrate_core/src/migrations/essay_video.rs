use anyhow::Result;
use log::warn;
use serde_json::{Map, Value};

use super::{document_id, field, of_types, text_field, types_param};
use crate::document::{TransformError, now_timestamp, published_id};
use crate::embed::detect_platform_from_url;
use crate::runner::{Migration, Plan, RunContext};
use crate::store::{Mutation, query_documents};

const PUBLISHED_DOCUMENTS_QUERY: &str =
    r#"*[_type in $types && !(_id in path("drafts.**"))]"#;

const SYSTEM_FIELDS: [&str; 5] = ["_id", "_type", "_rev", "_createdAt", "_updatedAt"];

/// Copies each published `opEd` into a new `essay-<id>` document.
#[derive(Debug, Default)]
pub struct EssayMigration;

/// Copies each published `vlog` into a new `video-<id>` document.
#[derive(Debug, Default)]
pub struct VideoMigration;

impl Migration for EssayMigration {
    type Item = Value;

    fn name(&self) -> &'static str {
        "essays"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<Value>> {
        fetch_published(ctx, "opEd")
    }

    fn item_id(&self, item: &Value) -> String {
        document_id(item)
    }

    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &Value) -> Result<Plan> {
        let source_id = document_id(item);
        let source = as_document(item, &source_id)?;
        let target_id = format!("essay-{}", published_id(&source_id));
        if ctx.store.get_document(&target_id)?.is_some() {
            return Ok(Plan::Unchanged(format!("{target_id} already exists")));
        }

        let mut essay = copy_without(source, &["seo"]);
        essay.insert("_id".to_string(), Value::from(target_id.clone()));
        essay.insert("_type".to_string(), Value::from("essay"));
        essay.insert(
            "language".to_string(),
            Value::from(normalize_language(source.get("language"))),
        );
        essay.insert("publicationVenue".to_string(), Value::from("aldia"));
        essay.insert(
            "publishDate".to_string(),
            Value::from(text_field(Some(item), "publishDate").unwrap_or_else(now_timestamp)),
        );
        essay.insert(
            "fiveYearTest".to_string(),
            field(Some(item), "fiveYearTest")
                .cloned()
                .unwrap_or(Value::Bool(false)),
        );
        match field(Some(item), "seo").or_else(|| field(Some(item), "seoBlock")) {
            Some(seo) => essay.insert("seoBlock".to_string(), seo.clone()),
            None => essay.remove("seoBlock"),
        };
        essay.insert("originalId".to_string(), Value::from(source_id.clone()));

        Ok(Plan::create(
            vec![Mutation::CreateIfNotExists(essay)],
            format!("{source_id} -> {target_id}"),
        ))
    }
}

impl Migration for VideoMigration {
    type Item = Value;

    fn name(&self) -> &'static str {
        "videos"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<Value>> {
        fetch_published(ctx, "vlog")
    }

    fn item_id(&self, item: &Value) -> String {
        document_id(item)
    }

    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &Value) -> Result<Plan> {
        let source_id = document_id(item);
        let source = as_document(item, &source_id)?;
        let target_id = format!("video-{}", published_id(&source_id));
        if ctx.store.get_document(&target_id)?.is_some() {
            return Ok(Plan::Unchanged(format!("{target_id} already exists")));
        }

        let video_url = text_field(Some(item), "videoUrl");
        if video_url.is_none() {
            warn!("{source_id} has no videoUrl");
        }

        let mut video = copy_without(source, &["tags_ref", "datePublished"]);
        video.insert("_id".to_string(), Value::from(target_id.clone()));
        video.insert("_type".to_string(), Value::from("video"));
        video.insert("videoFormat".to_string(), Value::from("longform"));
        video.insert(
            "platform".to_string(),
            Value::from(map_platform(
                video_url.as_deref(),
                text_field(Some(item), "channelType").as_deref(),
            )),
        );
        video.insert(
            "publishDate".to_string(),
            Value::from(text_field(Some(item), "datePublished").unwrap_or_else(now_timestamp)),
        );
        match &video_url {
            Some(url) => video.insert("videoUrl".to_string(), Value::from(url.clone())),
            None => video.remove("videoUrl"),
        };
        match item.pointer("/video/thumbnail").filter(|value| is_truthy(value)) {
            Some(thumbnail) => video.insert("thumbnailImage".to_string(), thumbnail.clone()),
            None => video.remove("thumbnailImage"),
        };
        video.insert(
            "tags".to_string(),
            field(Some(item), "tags_ref")
                .filter(|value| value.is_array())
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
        );
        video.insert("originalId".to_string(), Value::from(source_id.clone()));

        Ok(Plan::create(
            vec![Mutation::CreateIfNotExists(video)],
            format!("{source_id} -> {target_id}"),
        ))
    }
}

fn fetch_published(ctx: &mut RunContext<'_>, kind: &str) -> Result<Vec<Value>> {
    let types = vec![kind.to_string()];
    let documents = query_documents(
        &mut *ctx.store,
        PUBLISHED_DOCUMENTS_QUERY,
        &types_param(&types),
    )?;
    Ok(of_types(documents, &types)
        .into_iter()
        .filter(|document| !document_id(document).starts_with("drafts."))
        .collect())
}

fn as_document<'a>(item: &'a Value, id: &str) -> Result<&'a Map<String, Value>, TransformError> {
    item.as_object().ok_or_else(|| TransformError::InvalidField {
        doc_id: id.to_string(),
        field: "_document",
        reason: "expected an object".to_string(),
    })
}

/// Every field except system fields and `extra`.
fn copy_without(source: &Map<String, Value>, extra: &[&str]) -> Map<String, Value> {
    source
        .iter()
        .filter(|(name, _)| {
            !SYSTEM_FIELDS.contains(&name.as_str()) && !extra.contains(&name.as_str())
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Two-letter code for a free-form language value. Lists use their first entry.
fn normalize_language(value: Option<&Value>) -> &'static str {
    let raw = match value {
        Some(Value::String(language)) => language.as_str(),
        Some(Value::Array(languages)) => languages
            .iter()
            .find_map(Value::as_str)
            .unwrap_or_default(),
        _ => "",
    };
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return "en";
    }
    if normalized == "es" || normalized.starts_with("spanish") {
        "es"
    } else if normalized == "en" || normalized.starts_with("english") {
        "en"
    } else if normalized.contains("es") {
        "es"
    } else {
        "en"
    }
}

fn map_platform(video_url: Option<&str>, channel_type: Option<&str>) -> &'static str {
    if let Some(platform) = video_url.and_then(detect_platform_from_url) {
        return platform;
    }
    let channel_type = channel_type.unwrap_or_default().to_lowercase();
    if channel_type.contains("tiktok") {
        "TikTok"
    } else if channel_type.contains("instagram") {
        "Instagram Reels"
    } else if channel_type.contains("linkedin") {
        "LinkedIn"
    } else {
        "YouTube"
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}
