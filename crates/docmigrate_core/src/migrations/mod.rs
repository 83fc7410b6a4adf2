//! The concrete batch migrations. Each one fetches candidates, plans one write
//! per document and leaves committing to [`crate::runner::run_migration`].

pub mod blog_opeds;
pub mod body_keys;
pub mod essay_video;
pub mod language;
pub mod podcast;
pub mod published_at;
pub mod tags;
pub mod tiktok;
pub mod youtube;

use std::collections::BTreeSet;

use anyhow::{Result, bail};
use log::{debug, warn};
use serde_json::{Map, Value, json};

use crate::document::{ImageField, new_key, non_blank, to_object};
use crate::feed::{FeedItem, parse_feed};
use crate::runner::RunContext;
use crate::slug::{SHORT_SLUG_MAX, slugify};

pub use blog_opeds::{BlogOpEdMigration, BlogOpEdOptions};
pub use body_keys::{BodyKeyMigration, BodyKeyOptions};
pub use essay_video::{EssayMigration, VideoMigration};
pub use language::{LanguageMigration, LanguageOptions};
pub use podcast::{PodcastMigration, PodcastOptions};
pub use published_at::{PublishedAtMigration, PublishedAtOptions};
pub use tags::{TagMigration, TagMigrationOptions};
pub use tiktok::{TikTokMigration, TikTokOptions};
pub use youtube::{PlaylistSource, YouTubeMigration, YouTubeOptions};

const FEED_ACCEPT: &str = "application/rss+xml, application/xml;q=0.9, */*;q=0.8";

/// `$types` binding for the document fetch queries.
pub(crate) fn types_param(types: &[String]) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("types".to_string(), json!(types));
    params
}

/// Keep only documents whose `_type` is one of `types`.
pub(crate) fn of_types(documents: Vec<Value>, types: &[String]) -> Vec<Value> {
    documents
        .into_iter()
        .filter(|document| {
            document
                .get("_type")
                .and_then(Value::as_str)
                .is_some_and(|kind| types.iter().any(|wanted| wanted == kind))
        })
        .collect()
}

pub(crate) fn document_id(document: &Value) -> String {
    document
        .get("_id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

/// A field that is present and not null.
pub(crate) fn field<'a>(document: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    document
        .and_then(|document| document.get(name))
        .filter(|value| !value.is_null())
}

pub(crate) fn field_or(document: Option<&Value>, name: &str, default: Value) -> Value {
    field(document, name).cloned().unwrap_or(default)
}

pub(crate) fn text_field(document: Option<&Value>, name: &str) -> Option<String> {
    non_blank(field(document, name).and_then(Value::as_str))
}

/// String entries of an array field; anything else is ignored.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Concatenate and de-duplicate, keeping first-seen order. Blank entries are dropped.
pub(crate) fn merge_unique<I, J>(base: I, extra: J) -> Vec<String>
where
    I: IntoIterator<Item = String>,
    J: IntoIterator<Item = String>,
{
    let mut seen = BTreeSet::new();
    base.into_iter()
        .chain(extra)
        .filter(|item| !item.trim().is_empty())
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Hashtag labels without their leading `#`.
pub(crate) fn bare_hashtags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| non_blank(Some(tag.trim_start_matches('#'))))
        .collect()
}

pub(crate) fn default_ai_derivatives() -> Value {
    json!({"summary": "", "quotes": [], "captions": []})
}

pub(crate) fn default_analytics(source: &str) -> Value {
    json!({"views": 0, "likes": 0, "shares": 0, "source": source})
}

pub(crate) fn into_document(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(document) => Ok(document),
        other => bail!("expected a document object, got {other}"),
    }
}

/// Image field with a fresh `_key`, for use inside arrays.
pub(crate) fn keyed_image(image: &ImageField) -> Result<Value> {
    let mut object = to_object(image)?;
    object.insert("_key".to_string(), Value::from(new_key()));
    Ok(Value::Object(object))
}

pub(crate) fn load_feed_items(
    ctx: &mut RunContext<'_>,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<Vec<FeedItem>> {
    let mut request_headers = vec![("Accept", FEED_ACCEPT)];
    request_headers.extend_from_slice(headers);
    let xml = ctx.source.fetch_text(url, &request_headers)?;
    let feed = parse_feed(&xml)?;
    debug!(
        "feed {} has {} item(s)",
        feed.title.as_deref().unwrap_or(url),
        feed.items.len()
    );
    Ok(feed.items)
}

/// Download a remote image and upload it as an asset. Never runs in dry-run mode;
/// download and upload failures are logged and yield `None`.
pub(crate) fn upload_remote_image(
    ctx: &mut RunContext<'_>,
    url: &str,
    name_hint: &str,
) -> Option<ImageField> {
    if ctx.dry_run {
        debug!("[dry-run] would upload image {url}");
        return None;
    }
    let downloaded = match ctx.source.fetch_bytes(url) {
        Ok(downloaded) => downloaded,
        Err(error) => {
            warn!("failed to download image {url}: {error:#}");
            return None;
        }
    };
    if downloaded.bytes.is_empty() {
        warn!("image {url} has an empty body");
        return None;
    }
    let content_type = downloaded
        .content_type
        .clone()
        .unwrap_or_else(|| "image/jpeg".to_string());
    let stem = slugify(name_hint, SHORT_SLUG_MAX);
    let stem = if stem.is_empty() { "image".to_string() } else { stem };
    let filename = format!("{stem}.{}", image_extension(&content_type));

    match ctx
        .store
        .upload_image(&downloaded.bytes, &filename, &content_type)
    {
        Ok(asset_id) => Some(ImageField::from_asset(asset_id)),
        Err(error) => {
            warn!("upload failed for image {url}: {error:#}");
            None
        }
    }
}

fn image_extension(content_type: &str) -> &'static str {
    if content_type.contains("png") {
        "png"
    } else if content_type.contains("webp") {
        "webp"
    } else {
        "jpg"
    }
}
