use anyhow::Result;
use log::debug;
use reqwest::Url;
use serde_json::{Map, Value, json};

use super::{
    bare_hashtags, field, field_or, into_document, load_feed_items, merge_unique, string_list,
    text_field, upload_remote_image,
};
use crate::config::{ConfigError, EnvVars};
use crate::document::non_blank;
use crate::embed::tiktok_media_block;
use crate::feed::FeedItem;
use crate::runner::{Migration, Plan, RunContext};
use crate::store::Mutation;

const OEMBED_ENDPOINT: &str = "https://www.tiktok.com/oembed";
// TikTok serves an empty feed to unknown agents.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TikTokOptions {
    pub feed_url: String,
    pub limit: usize,
    pub default_platforms: Vec<String>,
    pub forced_tags: Vec<String>,
    pub download_thumbnails: bool,
}

impl TikTokOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        let feed_url = match env.value("TIKTOK_RSS_URL") {
            Some(url) => url,
            None => {
                let handle = env
                    .value("TIKTOK_HANDLE")
                    .and_then(|handle| non_blank(Some(handle.trim_start_matches('@'))))
                    .ok_or(ConfigError::MissingOneOf {
                        names: "TIKTOK_RSS_URL or TIKTOK_HANDLE",
                    })?;
                format!("https://www.tiktok.com/@{handle}/rss")
            }
        };
        Ok(Self {
            feed_url,
            limit: env.number("TIKTOK_VIDEO_LIMIT", 50)? as usize,
            default_platforms: env.list_or("TIKTOK_DEFAULT_PLATFORMS", &["TikTok"]),
            forced_tags: bare_hashtags(&env.list("TIKTOK_FORCE_TAGS").unwrap_or_default()),
            download_thumbnails: env.enabled("DOWNLOAD_THUMBNAILS"),
        })
    }
}

/// Upserts `clip` documents from a TikTok RSS feed, enriched through oEmbed.
pub struct TikTokMigration {
    options: TikTokOptions,
}

impl TikTokMigration {
    pub fn new(options: TikTokOptions) -> Self {
        Self { options }
    }

    fn thumbnail(
        &self,
        ctx: &mut RunContext<'_>,
        video_id: &str,
        oembed: Option<&Value>,
        existing: Option<&Value>,
    ) -> Result<Option<Value>> {
        let remote = oembed.and_then(|oembed| text_field(Some(oembed), "thumbnail_url"));
        if self.options.download_thumbnails
            && let Some(url) = remote
            && let Some(image) = upload_remote_image(ctx, &url, &format!("tiktok-{video_id}"))
        {
            return Ok(Some(serde_json::to_value(image)?));
        }
        Ok(existing
            .and_then(|existing| existing.pointer("/clipMedia/thumbnail"))
            .filter(|thumbnail| !thumbnail.is_null())
            .cloned())
    }
}

impl Migration for TikTokMigration {
    type Item = FeedItem;

    fn name(&self) -> &'static str {
        "tiktok-clips"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<FeedItem>> {
        let mut items = load_feed_items(
            ctx,
            &self.options.feed_url,
            &[("User-Agent", BROWSER_USER_AGENT)],
        )?;
        items.truncate(self.options.limit);
        Ok(items)
    }

    fn item_id(&self, item: &FeedItem) -> String {
        match video_url(item).as_deref().and_then(extract_video_id) {
            Some(id) => clip_id(&id),
            None => "<tiktok item>".to_string(),
        }
    }

    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &FeedItem) -> Result<Plan> {
        let Some(url) = video_url(item) else {
            return Ok(Plan::Skip("feed item has no link".to_string()));
        };
        let Some(video_id) = extract_video_id(&url) else {
            return Ok(Plan::Skip(format!("no video id in {url}")));
        };
        let doc_id = clip_id(&video_id);

        let oembed = fetch_oembed(ctx, &url);
        let oembed = oembed.as_ref();
        let existing = ctx.store.get_document(&doc_id)?;
        let existing = existing.as_ref();

        let title = oembed
            .and_then(|oembed| text_field(Some(oembed), "title"))
            .or_else(|| non_blank(item.title.as_deref()))
            .or_else(|| text_field(existing, "title"))
            .unwrap_or_else(|| format!("TikTok clip {video_id}"));
        let description = non_blank(item.content_snippet.as_deref())
            .or_else(|| non_blank(item.content.as_deref()))
            .or_else(|| text_field(existing, "description"))
            .or_else(|| oembed.and_then(|oembed| text_field(Some(oembed), "title")))
            .unwrap_or_default();
        let description = with_hashtags(&description, &self.options.forced_tags);

        let thumbnail = self.thumbnail(ctx, &video_id, oembed, existing)?;
        let clip_media = clip_media(
            field(existing, "clipMedia"),
            serde_json::to_value(tiktok_media_block(&video_id, &url, &title, None))?,
            thumbnail,
        );
        let platforms = merge_unique(
            string_list(field(existing, "platforms")),
            self.options.default_platforms.iter().cloned(),
        );

        let document = into_document(json!({
            "_id": doc_id,
            "_type": "clip",
            "title": title,
            "description": description,
            "clipMedia": clip_media,
            "platforms": platforms,
            "order": field_or(existing, "order", json!(0)),
            "publish": field_or(existing, "publish", Value::Bool(true)),
            "seo": field_or(existing, "seo", Value::Null),
        }))?;

        let mutations = vec![Mutation::CreateOrReplace(document)];
        if existing.is_some() {
            Ok(Plan::update(mutations, title))
        } else {
            Ok(Plan::create(mutations, title))
        }
    }
}

fn clip_id(video_id: &str) -> String {
    format!("clip.tiktok-{video_id}")
}

fn video_url(item: &FeedItem) -> Option<String> {
    non_blank(item.link.as_deref()).or_else(|| non_blank(item.guid.as_deref()))
}

/// The segment after `/video/`, otherwise the last path segment.
fn extract_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .collect();
    let after_video = segments
        .windows(2)
        .find(|pair| pair[0] == "video")
        .map(|pair| pair[1]);
    non_blank(after_video.or_else(|| segments.last().copied()))
}

/// Best-effort oEmbed lookup; failures only lose the enrichment.
fn fetch_oembed(ctx: &mut RunContext<'_>, video_url: &str) -> Option<Value> {
    let endpoint = Url::parse_with_params(OEMBED_ENDPOINT, &[("url", video_url)]).ok()?;
    match ctx.source.fetch_json(endpoint.as_str()) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(error) => {
            debug!("oEmbed lookup failed for {video_url}: {error:#}");
            None
        }
    }
}

/// Overlay the fresh embed fields on the stored block, keeping a custom player colour.
fn clip_media(existing: Option<&Value>, fresh: Value, thumbnail: Option<Value>) -> Value {
    let mut media: Map<String, Value> = existing
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let kept_color = media
        .get("playerColor")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    if let Value::Object(fields) = fresh {
        media.extend(fields);
    }
    if let Some(color) = kept_color {
        media.insert("playerColor".to_string(), Value::from(color));
    }
    match thumbnail {
        Some(thumbnail) => {
            media.insert("thumbnail".to_string(), thumbnail);
        }
        None => {
            media.remove("thumbnail");
        }
    }
    Value::Object(media)
}

/// Append `#tag` for each tag not already mentioned as a whole word.
fn with_hashtags(description: &str, tags: &[String]) -> String {
    let missing: Vec<String> = tags
        .iter()
        .filter(|tag| !mentions(description, tag))
        .map(|tag| format!("#{tag}"))
        .collect();
    if missing.is_empty() {
        return description.to_string();
    }
    let suffix = missing.join(" ");
    if description.trim().is_empty() {
        suffix
    } else {
        format!("{}\n\n{suffix}", description.trim_end())
    }
}

fn mentions(text: &str, tag: &str) -> bool {
    let haystack = text.to_lowercase();
    let needle = tag.to_lowercase();
    if needle.is_empty() {
        return true;
    }
    let is_word = |ch: char| ch.is_alphanumeric() || ch == '_';
    haystack.match_indices(&needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{DocumentAction, RunReport, run_migration};
    use crate::testing::{MemoryStore, MockSource, env_map};

    const FEED_URL: &str = "https://rss.example.com/tiktok.xml";
    const CLIP_URL: &str = "https://www.tiktok.com/@maker/video/7312345678901234567";
    const OEMBED_URL: &str = "https://www.tiktok.com/oembed?url=https%3A%2F%2Fwww.tiktok.com%2F%40maker%2Fvideo%2F7312345678901234567";

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
<channel>
  <title>maker on TikTok</title>
  <item>
    <title>feed title</title>
    <link>https://www.tiktok.com/@maker/video/7312345678901234567</link>
    <description>Building things #ai</description>
  </item>
  <item>
    <title>no link</title>
  </item>
  <item>
    <title>Second</title>
    <guid>https://www.tiktok.com/@maker/video/7300000000000000001</guid>
  </item>
</channel>
</rss>"#;

    fn options(extra: &[(&str, &str)]) -> TikTokOptions {
        let mut pairs = vec![("TIKTOK_RSS_URL", FEED_URL), ("TIKTOK_FORCE_TAGS", "#ai, Policy")];
        pairs.extend_from_slice(extra);
        TikTokOptions::from_env(&EnvVars::from_map(&env_map(&pairs))).expect("options")
    }

    fn source() -> MockSource {
        MockSource::default()
            .with_text(FEED_URL, FEED)
            .with_json(
                OEMBED_URL,
                json!({
                    "title": "oEmbed title",
                    "thumbnail_url": "https://p16.tiktokcdn.com/thumb.jpeg"
                }),
            )
            .with_bytes("https://p16.tiktokcdn.com/thumb.jpeg", "image/jpeg", b"jpg")
    }

    fn run(store: &mut MemoryStore, options: TikTokOptions, dry_run: bool) -> RunReport {
        let mut source = source();
        let mut ctx = RunContext::new(store, &mut source, dry_run);
        run_migration(&mut TikTokMigration::new(options), &mut ctx).expect("run")
    }

    #[test]
    fn handle_builds_feed_url() {
        let options = TikTokOptions::from_env(&EnvVars::from_map(&env_map(&[(
            "TIKTOK_HANDLE",
            "@maker",
        )])))
        .expect("options");
        assert_eq!(options.feed_url, "https://www.tiktok.com/@maker/rss");
        assert_eq!(options.limit, 50);
        assert_eq!(options.default_platforms, vec!["TikTok"]);

        let error = TikTokOptions::from_env(&EnvVars::from_map(&env_map(&[])))
            .expect_err("no feed");
        assert!(matches!(error, ConfigError::MissingOneOf { .. }));
    }

    #[test]
    fn imports_clips_with_oembed_and_hashtags() {
        let mut store = MemoryStore::default();
        let report = run(&mut store, options(&[]), false);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.created, 2);
        assert_eq!(report.skipped, 1);

        let clip = store
            .get("clip.tiktok-7312345678901234567")
            .expect("clip");
        assert_eq!(clip["_type"], "clip");
        assert_eq!(clip["title"], "oEmbed title");
        assert_eq!(clip["description"], "Building things #ai\n\n#Policy");
        assert_eq!(clip["clipMedia"]["platform"], "tiktok");
        assert_eq!(clip["clipMedia"]["platformId"], CLIP_URL);
        assert_eq!(clip["clipMedia"]["playerColor"], "000000");
        assert_eq!(clip["clipMedia"]["thumbnail"]["asset"]["_ref"], "image-upload-1");
        assert_eq!(clip["platforms"], json!(["TikTok"]));
        assert_eq!(clip["publish"], true);
        assert_eq!(store.uploads, vec!["tiktok-7312345678901234567.jpg"]);

        let second = store
            .get("clip.tiktok-7300000000000000001")
            .expect("second clip");
        assert_eq!(second["title"], "Second");
        assert_eq!(second["description"], "#ai #Policy");
        assert!(second["clipMedia"].get("thumbnail").is_none());
    }

    #[test]
    fn rerun_keeps_existing_media_settings_and_platforms() {
        let mut store = MemoryStore::with_documents(vec![json!({
            "_id": "clip.tiktok-7312345678901234567",
            "_type": "clip",
            "title": "Old",
            "platforms": ["Instagram"],
            "publish": false,
            "clipMedia": {
                "_type": "mediaBlock",
                "playerColor": "FF00FF",
                "caption": "kept",
                "thumbnail": {"_type": "image", "asset": {"_type": "reference", "_ref": "image-old"}}
            }
        })]);
        let report = run(&mut store, options(&[("DOWNLOAD_THUMBNAILS", "false")]), false);
        assert_eq!(report.updated, 1);

        let clip = store
            .get("clip.tiktok-7312345678901234567")
            .expect("clip");
        assert_eq!(clip["publish"], false);
        assert_eq!(clip["platforms"], json!(["Instagram", "TikTok"]));
        assert_eq!(clip["clipMedia"]["playerColor"], "FF00FF");
        assert_eq!(clip["clipMedia"]["caption"], "kept");
        assert_eq!(clip["clipMedia"]["thumbnail"]["asset"]["_ref"], "image-old");
        assert_eq!(clip["clipMedia"]["platform"], "tiktok");
        assert!(store.uploads.is_empty());
    }

    #[test]
    fn limit_and_dry_run_are_honoured() {
        let mut store = MemoryStore::default();
        let report = run(&mut store, options(&[("TIKTOK_VIDEO_LIMIT", "1")]), true);
        assert_eq!(report.fetched, 1);
        assert_eq!(store.write_count(), 0);
        assert_eq!(report.documents[0].action, DocumentAction::WouldCreate);
    }

    #[test]
    fn video_id_comes_from_path() {
        assert_eq!(extract_video_id(CLIP_URL).as_deref(), Some("7312345678901234567"));
        assert_eq!(
            extract_video_id("https://vm.tiktok.com/ZMabc123/").as_deref(),
            Some("ZMabc123")
        );
        assert_eq!(extract_video_id("https://www.tiktok.com/"), None);
        assert_eq!(extract_video_id("not a url"), None);
    }

    #[test]
    fn hashtags_match_whole_words_only() {
        let tags = vec!["ai".to_string(), "art".to_string()];
        assert_eq!(with_hashtags("#AI and #artist", &tags), "#AI and #artist\n\n#art");
        assert_eq!(with_hashtags("ai art", &tags), "ai art");
        assert_eq!(with_hashtags("  ", &tags), "#ai #art");
    }
}
