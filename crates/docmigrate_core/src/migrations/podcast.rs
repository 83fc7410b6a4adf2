use anyhow::Result;
use serde_json::{Map, Value, json};

use super::{default_ai_derivatives, default_analytics, load_feed_items, merge_unique};
use crate::config::{ConfigError, EnvVars};
use crate::document::{Reference, SlugField, TransformError, non_blank, now_timestamp};
use crate::embed::audio_media_block;
use crate::feed::FeedItem;
use crate::runner::{Migration, Plan, RunContext};
use crate::slug::{TAG_SLUG_MAX, slugify};
use crate::store::{Mutation, Patch};

const EPISODE_TYPE: &str = "podcastEpisode";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodcastOptions {
    pub feed_url: String,
    /// `_id` of the podcast series every episode references.
    pub parent_id: String,
    pub language: String,
}

impl PodcastOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            feed_url: env.require("PODCAST_FEED_URL")?,
            parent_id: env.require("PODCAST_PARENT_ID")?,
            language: env.value_or("PODCAST_LANGUAGE", "English"),
        })
    }
}

/// Upserts one `podcastEpisode` per RSS item.
pub struct PodcastMigration {
    options: PodcastOptions,
}

impl PodcastMigration {
    pub fn new(options: PodcastOptions) -> Self {
        Self { options }
    }
}

impl Migration for PodcastMigration {
    type Item = FeedItem;

    fn name(&self) -> &'static str {
        "podcast-episodes"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<FeedItem>> {
        load_feed_items(ctx, &self.options.feed_url, &[])
    }

    fn item_id(&self, item: &FeedItem) -> String {
        let slug = episode_slug(item);
        if slug.is_empty() {
            return "<untitled episode>".to_string();
        }
        format!("{EPISODE_TYPE}.{slug}")
    }

    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &FeedItem) -> Result<Plan> {
        let slug = episode_slug(item);
        if slug.is_empty() {
            return Err(TransformError::MissingField {
                doc_id: item
                    .guid
                    .clone()
                    .or_else(|| item.link.clone())
                    .unwrap_or_else(|| "<feed item>".to_string()),
                field: "title",
            }
            .into());
        }
        let doc_id = format!("{EPISODE_TYPE}.{slug}");
        let title = non_blank(item.title.as_deref());
        let now = now_timestamp();

        let legacy_tags = merge_unique(item.categories.iter().cloned(), Vec::new());
        let tag_refs = ctx
            .tags
            .resolve_all(&mut *ctx.store, &legacy_tags)?
            .into_iter()
            .map(|tag| serde_json::to_value(tag.reference))
            .collect::<Result<Vec<_>, _>>()?;

        let episode_number = parse_number(item.itunes_episode.as_deref());
        let season_number = parse_number(item.itunes_season.as_deref());
        let audio = audio_media_block(
            title.as_deref().unwrap_or("Episode audio"),
            item.enclosure_url.as_deref().or(item.link.as_deref()),
            item.guid.as_deref(),
        );
        let description = [&item.content_snippet, &item.content, &item.content_encoded]
            .into_iter()
            .find_map(|value| non_blank(value.as_deref()))
            .unwrap_or_default();

        let mut set = Map::new();
        set.insert(
            "title".to_string(),
            Value::from(title.clone().unwrap_or_else(|| "Untitled Episode".to_string())),
        );
        set.insert("description".to_string(), Value::from(description));
        set.insert("slug".to_string(), serde_json::to_value(SlugField::new(&slug))?);
        set.insert("pubDate".to_string(), json!(item.iso_date));
        set.insert(
            "publishedAt".to_string(),
            Value::from(item.iso_date.clone().unwrap_or_else(|| now.clone())),
        );
        set.insert("updatedAt".to_string(), Value::from(now));
        if let Some(number) = episode_number {
            set.insert("episodeNumber".to_string(), Value::from(number));
        }
        if let Some(number) = season_number {
            set.insert("seasonNumber".to_string(), Value::from(number));
        }
        set.insert(
            "duration".to_string(),
            json!(non_blank(item.itunes_duration.as_deref())),
        );
        set.insert("audioEmbed".to_string(), serde_json::to_value(audio)?);
        set.insert("videoEmbed".to_string(), Value::Null);
        set.insert(
            "series".to_string(),
            serde_json::to_value(Reference::to(self.options.parent_id.clone()))?,
        );
        set.insert("tags".to_string(), json!(legacy_tags));
        set.insert("tags_ref".to_string(), Value::Array(tag_refs));
        set.insert(
            "language".to_string(),
            Value::from(self.options.language.clone()),
        );
        set.insert("order".to_string(), Value::from(episode_number.unwrap_or(0)));
        set.insert("publish".to_string(), Value::Bool(true));

        let mut patch = Patch::new(doc_id.clone())
            .set_if_missing("ai_derivatives", default_ai_derivatives())
            .set_if_missing("distribution", json!([]))
            .set_if_missing("analytics", default_analytics("unknown"));
        patch.set = set;

        let mut shell = Map::new();
        shell.insert("_id".to_string(), Value::from(doc_id.clone()));
        shell.insert("_type".to_string(), Value::from(EPISODE_TYPE));
        let mutations = vec![Mutation::CreateIfNotExists(shell), Mutation::Patch(patch)];

        let summary = format!(
            "{} ({} tag(s))",
            title.as_deref().unwrap_or("Untitled Episode"),
            legacy_tags.len()
        );
        if ctx.store.get_document(&doc_id)?.is_some() {
            Ok(Plan::update(mutations, summary))
        } else {
            Ok(Plan::create(mutations, summary))
        }
    }
}

/// `isoDate-title` when both exist, otherwise title, otherwise guid.
fn episode_slug(item: &FeedItem) -> String {
    let title = non_blank(item.title.as_deref());
    let base = match (non_blank(item.iso_date.as_deref()), title) {
        (Some(date), Some(title)) => format!("{date}-{title}"),
        (Some(date), None) => date,
        (None, Some(title)) => title,
        (None, None) => non_blank(item.guid.as_deref()).unwrap_or_default(),
    };
    slugify(&base, TAG_SLUG_MAX)
}

fn parse_number(value: Option<&str>) -> Option<i64> {
    value?.trim().parse::<i64>().ok()
}
