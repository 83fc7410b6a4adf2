use anyhow::Result;
use log::{debug, info, warn};
use serde_json::{Value, json};

use super::{
    bare_hashtags, default_ai_derivatives, default_analytics, field, field_or, into_document,
    keyed_image, load_feed_items, merge_unique, upload_remote_image,
};
use crate::blocks::{hashtag_block, html_to_blocks};
use crate::config::{ConfigError, EnvVars};
use crate::document::{Reference, SlugField, TransformError, non_blank, now_timestamp};
use crate::feed::FeedItem;
use crate::html::image_sources;
use crate::runner::{Migration, Plan, RunContext};
use crate::slug::{TAG_SLUG_MAX, slugify};
use crate::store::Mutation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlogOpEdOptions {
    pub feed_url: String,
    pub language: String,
    pub author_ref: Option<String>,
    pub force_tags: Vec<String>,
    pub max_items: usize,
    pub download_images: bool,
}

impl BlogOpEdOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            feed_url: env.require("BLOG_FEED_URL")?,
            language: env.value_or("OPED_LANGUAGE", "English"),
            author_ref: env.value("OPED_AUTHOR_REF"),
            force_tags: env.list("OPED_FORCE_TAGS").unwrap_or_default(),
            max_items: env.number("OPED_MAX_ITEMS", 30)? as usize,
            download_images: env.enabled("DOWNLOAD_IMAGES"),
        })
    }
}

/// Imports blog posts from an RSS feed as `opEd` documents.
pub struct BlogOpEdMigration {
    options: BlogOpEdOptions,
    author: Option<Reference>,
}

impl BlogOpEdMigration {
    pub fn new(options: BlogOpEdOptions) -> Self {
        Self {
            options,
            author: None,
        }
    }

    /// Reference the configured author only if that document exists.
    fn resolve_author(&mut self, ctx: &mut RunContext<'_>) {
        let Some(author_id) = self.options.author_ref.clone() else {
            return;
        };
        match ctx.store.get_document(&author_id) {
            Ok(Some(_)) => self.author = Some(Reference::to(author_id)),
            Ok(None) => {
                warn!("author document {author_id} not found; keeping existing authors")
            }
            Err(error) => warn!("failed to look up author {author_id}: {error:#}"),
        }
    }

    /// Existing images are reused in order before anything new is uploaded.
    fn build_gallery(
        &self,
        ctx: &mut RunContext<'_>,
        image_urls: &[String],
        existing_media: &[Value],
    ) -> Result<Vec<Value>> {
        let existing_images: Vec<&Value> = existing_media
            .iter()
            .filter(|entry| entry.get("_type").and_then(Value::as_str) == Some("image"))
            .collect();
        if image_urls.is_empty() {
            return Ok(existing_images.into_iter().cloned().collect());
        }

        let mut reusable = existing_images.into_iter();
        let mut gallery = Vec::new();
        for url in image_urls {
            if let Some(image) = reusable.next() {
                gallery.push(image.clone());
                continue;
            }
            if !self.options.download_images {
                continue;
            }
            let name = url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .unwrap_or("image");
            if let Some(image) = upload_remote_image(ctx, url, name) {
                gallery.push(keyed_image(&image)?);
            }
        }
        Ok(gallery)
    }
}

impl Migration for BlogOpEdMigration {
    type Item = FeedItem;

    fn name(&self) -> &'static str {
        "blog-opeds"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<FeedItem>> {
        self.resolve_author(ctx);
        let mut items = load_feed_items(ctx, &self.options.feed_url, &[])?;
        items.truncate(self.options.max_items);
        Ok(items)
    }

    fn item_id(&self, item: &FeedItem) -> String {
        match non_blank(item.title.as_deref()) {
            Some(title) => format!("opEd.{}", slugify(&title, TAG_SLUG_MAX)),
            None => item.link.clone().unwrap_or_else(|| "<feed item>".to_string()),
        }
    }

    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &FeedItem) -> Result<Plan> {
        let (Some(title), Some(link)) = (
            non_blank(item.title.as_deref()),
            non_blank(item.link.as_deref()),
        ) else {
            return Ok(Plan::Skip("feed item without a title or link".to_string()));
        };
        let slug = slugify(&title, TAG_SLUG_MAX);
        if slug.is_empty() {
            return Err(TransformError::InvalidField {
                doc_id: link,
                field: "title",
                reason: format!("{title:?} has no slug characters"),
            }
            .into());
        }
        let doc_id = format!("opEd.{slug}");
        let existing = ctx.store.get_document(&doc_id)?;
        let existing = existing.as_ref();

        let html = match non_blank(item.content.as_deref()) {
            Some(html) => html,
            None => fetch_article_html(ctx, &link).unwrap_or_default(),
        };
        let mut body = html_to_blocks(&html);
        body.extend(hashtag_block(&bare_hashtags(&self.options.force_tags)));
        let body_len = body.len();
        let body = serde_json::to_value(body)?;

        let image_urls = merge_unique(item.media_urls.iter().cloned(), image_sources(&html));
        let existing_media: Vec<Value> = field(existing, "media")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut media = self.build_gallery(ctx, &image_urls, &existing_media)?;
        let gallery_len = media.len();
        media.extend(
            existing_media
                .into_iter()
                .filter(|entry| entry.get("_type").and_then(Value::as_str) != Some("image")),
        );

        let now = now_timestamp();
        let publish_date = item.iso_date.clone();
        let mut document = into_document(json!({
            "_id": doc_id,
            "_type": "opEd",
            "title": title,
            "slug": SlugField::new(&slug),
            "language": field_or(existing, "language", Value::from(self.options.language.clone())),
            "body": body,
            "publishDate": publish_date
                .clone()
                .map(Value::from)
                .unwrap_or_else(|| field_or(existing, "publishDate", Value::Null)),
            "publishedAt": publish_date
                .map(Value::from)
                .unwrap_or_else(|| field_or(existing, "publishedAt", Value::from(now.clone()))),
            "updatedAt": now,
            "media": media,
            "seo": field_or(existing, "seo", Value::Null),
            "publish": field_or(existing, "publish", Value::Bool(true)),
            "order": field_or(existing, "order", json!(0)),
            "narrative": field_or(existing, "narrative", Value::Null),
            "ai_derivatives": field_or(existing, "ai_derivatives", default_ai_derivatives()),
            "distribution": field_or(existing, "distribution", json!([])),
            "analytics": field_or(existing, "analytics", default_analytics("blog")),
        }))?;
        match &self.author {
            Some(author) => {
                document.insert("author".to_string(), serde_json::to_value(author)?);
            }
            None => {
                if let Some(author) = field(existing, "author") {
                    document.insert("author".to_string(), author.clone());
                }
            }
        }

        let summary = format!("{title} ({body_len} block(s), {gallery_len} image(s))");
        let mutations = vec![Mutation::CreateOrReplace(document)];
        if existing.is_some() {
            Ok(Plan::update(mutations, summary))
        } else {
            Ok(Plan::create(mutations, summary))
        }
    }
}

/// Article markup for items whose feed entry carries no content. Non-HTML
/// responses and fetch failures yield `None`.
fn fetch_article_html(ctx: &mut RunContext<'_>, link: &str) -> Option<String> {
    match ctx.source.fetch_bytes(link) {
        Ok(page) if page.is_html() => {
            info!("fetched article body from {link}");
            Some(String::from_utf8_lossy(&page.bytes).into_owned())
        }
        Ok(page) => {
            debug!(
                "ignoring {link}: content type {}",
                page.content_type.as_deref().unwrap_or("unknown")
            );
            None
        }
        Err(error) => {
            warn!("failed to fetch article {link}: {error:#}");
            None
        }
    }
}
