use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use log::info;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    default_ai_derivatives, field, field_or, into_document, merge_unique, string_list,
    text_field, upload_remote_image,
};
use crate::config::{ConfigError, EnvVars};
use crate::document::{
    Reference, SlugField, TransformError, non_blank, normalize_timestamp, now_timestamp,
};
use crate::embed::youtube_media_block;
use crate::runner::{Migration, Plan, RunContext};
use crate::slug::{SHORT_SLUG_MAX, TAG_SLUG_MAX, slugify};
use crate::store::Mutation;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const PAGE_SIZE: usize = 50;
const SHORT_MAX_SECONDS: u64 = 60;
const THUMBNAIL_PRIORITY: [&str; 5] = ["maxres", "standard", "high", "medium", "default"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistSource {
    Playlist(String),
    /// Resolved to the channel's uploads playlist at fetch time.
    Channel(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YouTubeOptions {
    pub api_key: String,
    pub source: PlaylistSource,
    pub channel_type: String,
    pub language: String,
    pub forced_tags: Vec<String>,
    pub channel_ref: Option<String>,
    pub max_results: usize,
    pub include_shorts: bool,
    pub include_live: bool,
    pub download_thumbnails: bool,
}

impl YouTubeOptions {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        let source = env
            .value("YOUTUBE_PLAYLIST_ID")
            .or_else(|| env.value("YOUTUBE_UPLOADS_PLAYLIST_ID"))
            .map(PlaylistSource::Playlist)
            .or_else(|| env.value("YOUTUBE_CHANNEL_ID").map(PlaylistSource::Channel))
            .ok_or(ConfigError::MissingOneOf {
                names: "YOUTUBE_PLAYLIST_ID, YOUTUBE_UPLOADS_PLAYLIST_ID or YOUTUBE_CHANNEL_ID",
            })?;
        Ok(Self {
            api_key: env.require("YOUTUBE_API_KEY")?,
            source,
            channel_type: env.value_or("VLOG_CHANNEL_TYPE", "personal"),
            language: env.value_or("VLOG_LANGUAGE", "English"),
            forced_tags: env.list("VLOG_TAGS").unwrap_or_default(),
            channel_ref: env.value("YOUTUBE_CHANNEL_REF_ID"),
            max_results: env.number("YOUTUBE_MAX_RESULTS", 200)? as usize,
            include_shorts: env.enabled("YOUTUBE_INCLUDE_SHORTS"),
            include_live: env.enabled("YOUTUBE_INCLUDE_LIVE"),
            download_thumbnails: env.enabled("DOWNLOAD_THUMBNAILS"),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistPage {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    #[serde(default)]
    snippet: Option<PlaylistSnippet>,
    #[serde(default)]
    content_details: Option<PlaylistContentDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    #[serde(default)]
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    video_published_at: Option<String>,
}

impl PlaylistItem {
    fn video_id(&self) -> Option<String> {
        let from_details = self
            .content_details
            .as_ref()
            .and_then(|details| details.video_id.as_deref());
        let from_snippet = self
            .snippet
            .as_ref()
            .and_then(|snippet| snippet.resource_id.as_ref())
            .and_then(|resource| resource.video_id.as_deref());
        non_blank(from_details).or_else(|| non_blank(from_snippet))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetail {
    id: String,
    #[serde(default)]
    snippet: VideoSnippet,
    #[serde(default)]
    content_details: VideoContentDetails,
    #[serde(default)]
    statistics: Option<VideoStatistics>,
    #[serde(default)]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    thumbnails: BTreeMap<String, Thumbnail>,
    live_broadcast_content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    view_count: Option<String>,
    like_count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    actual_start_time: Option<String>,
    actual_end_time: Option<String>,
}

/// A playlist entry joined with its video details, when the API returned them.
#[derive(Debug, Clone)]
pub struct YouTubeVideo {
    pub id: String,
    pub playlist_published_at: Option<String>,
    detail: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoFormat {
    Longform,
    Short,
    Live,
}

impl VideoFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Longform => "longform",
            Self::Short => "short",
            Self::Live => "live",
        }
    }
}

/// Upserts `vlog` documents from a YouTube playlist or channel uploads.
pub struct YouTubeMigration {
    options: YouTubeOptions,
}

impl YouTubeMigration {
    pub fn new(options: YouTubeOptions) -> Self {
        Self { options }
    }

    fn api_url(&self, resource: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut pairs: Vec<(&str, &str)> = params.to_vec();
        pairs.push(("key", self.options.api_key.as_str()));
        let url = Url::parse_with_params(&format!("{API_BASE}/{resource}"), &pairs)
            .with_context(|| format!("invalid YouTube API url for {resource}"))?;
        Ok(url.to_string())
    }

    fn resolve_playlist(&self, ctx: &mut RunContext<'_>) -> Result<String> {
        let channel_id = match &self.options.source {
            PlaylistSource::Playlist(id) => return Ok(id.clone()),
            PlaylistSource::Channel(id) => id,
        };
        let url = self.api_url("channels", &[("part", "contentDetails"), ("id", channel_id)])?;
        let response = ctx.source.fetch_json(&url)?;
        match response
            .pointer("/items/0/contentDetails/relatedPlaylists/uploads")
            .and_then(Value::as_str)
        {
            Some(uploads) => Ok(uploads.to_string()),
            None => bail!("unable to resolve uploads playlist for channel {channel_id}"),
        }
    }

    fn playlist_items(
        &self,
        ctx: &mut RunContext<'_>,
        playlist_id: &str,
    ) -> Result<Vec<PlaylistItem>> {
        let page_size = PAGE_SIZE.to_string();
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist_id),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let url = self.api_url("playlistItems", &params)?;
            let page: PlaylistPage = serde_json::from_value(ctx.source.fetch_json(&url)?)
                .context("failed to decode playlistItems response")?;
            items.extend(page.items);
            page_token = page.next_page_token;
            if page_token.is_none() || items.len() >= self.options.max_results {
                break;
            }
        }
        items.truncate(self.options.max_results);
        Ok(items)
    }

    fn video_details(
        &self,
        ctx: &mut RunContext<'_>,
        video_ids: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        let mut details = BTreeMap::new();
        for chunk in video_ids.chunks(PAGE_SIZE) {
            let ids = chunk.join(",");
            let url = self.api_url(
                "videos",
                &[
                    ("part", "snippet,contentDetails,statistics,liveStreamingDetails"),
                    ("id", ids.as_str()),
                ],
            )?;
            let response = ctx.source.fetch_json(&url)?;
            for item in response
                .get("items")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(id) = item.get("id").and_then(Value::as_str) {
                    details.insert(id.to_string(), item.clone());
                }
            }
        }
        Ok(details)
    }

    fn thumbnail(
        &self,
        ctx: &mut RunContext<'_>,
        video_id: &str,
        snippet: &VideoSnippet,
        existing: Option<&Value>,
    ) -> Result<Option<Value>> {
        if self.options.download_thumbnails
            && let Some(url) = best_thumbnail(&snippet.thumbnails)
            && let Some(image) = upload_remote_image(ctx, &url, video_id)
        {
            return Ok(Some(serde_json::to_value(image)?));
        }
        Ok(existing
            .and_then(|existing| existing.pointer("/video/thumbnail"))
            .filter(|thumbnail| !thumbnail.is_null())
            .cloned())
    }
}

impl Migration for YouTubeMigration {
    type Item = YouTubeVideo;

    fn name(&self) -> &'static str {
        "youtube-vlogs"
    }

    fn fetch(&mut self, ctx: &mut RunContext<'_>) -> Result<Vec<YouTubeVideo>> {
        let playlist_id = self.resolve_playlist(ctx)?;
        info!("importing YouTube playlist {playlist_id}");
        let items = self.playlist_items(ctx, &playlist_id)?;

        let mut videos: Vec<YouTubeVideo> = Vec::new();
        for item in &items {
            let Some(id) = item.video_id() else {
                continue;
            };
            if videos.iter().any(|video| video.id == id) {
                continue;
            }
            videos.push(YouTubeVideo {
                id,
                playlist_published_at: item
                    .content_details
                    .as_ref()
                    .and_then(|details| details.video_published_at.clone()),
                detail: None,
            });
        }

        let ids: Vec<String> = videos.iter().map(|video| video.id.clone()).collect();
        let mut details = self.video_details(ctx, &ids)?;
        for video in &mut videos {
            video.detail = details.remove(&video.id);
        }
        Ok(videos)
    }

    fn item_id(&self, item: &YouTubeVideo) -> String {
        format!("vlog.youtube-{}", item.id)
    }

    fn plan(&mut self, ctx: &mut RunContext<'_>, item: &YouTubeVideo) -> Result<Plan> {
        let doc_id = self.item_id(item);
        let detail: VideoDetail = match &item.detail {
            Some(detail) => {
                serde_json::from_value(detail.clone()).map_err(|error| {
                    TransformError::InvalidField {
                        doc_id: doc_id.clone(),
                        field: "video",
                        reason: error.to_string(),
                    }
                })?
            }
            None => VideoDetail {
                id: item.id.clone(),
                ..VideoDetail::default()
            },
        };
        let video_id = detail.id.as_str();
        let snippet = &detail.snippet;
        let title = non_blank(snippet.title.as_deref())
            .unwrap_or_else(|| format!("YouTube Video {video_id}"));

        let format = classify(&detail);
        if format == VideoFormat::Short && !self.options.include_shorts {
            return Ok(Plan::Skip(format!("short {title:?} (YOUTUBE_INCLUDE_SHORTS=false)")));
        }
        if format == VideoFormat::Live && !self.options.include_live {
            return Ok(Plan::Skip(format!("live stream {title:?} (YOUTUBE_INCLUDE_LIVE=false)")));
        }

        let publish_raw = non_blank(snippet.published_at.as_deref())
            .or_else(|| non_blank(item.playlist_published_at.as_deref()));
        let published = match publish_raw {
            Some(raw) => Some(normalize_timestamp(&raw).ok_or_else(|| {
                TransformError::InvalidDate {
                    doc_id: doc_id.clone(),
                    field: "publishedAt",
                    value: raw.clone(),
                }
            })?),
            None => None,
        };

        let existing = ctx.store.get_document(&doc_id)?;
        let existing = existing.as_ref();
        let now = now_timestamp();
        let video_url = format!("https://www.youtube.com/watch?v={video_id}");
        let short_url = format!("https://youtu.be/{video_id}");
        let description = non_blank(snippet.description.as_deref())
            .or_else(|| text_field(existing, "description"))
            .unwrap_or_default();

        let mut derived = Vec::new();
        if format == VideoFormat::Short {
            derived.push("YouTube Shorts".to_string());
        }
        if format == VideoFormat::Live {
            derived.push("YouTube Live".to_string());
        }
        let combined = merge_unique(
            merge_unique(snippet.tags.iter().cloned(), self.options.forced_tags.iter().cloned()),
            derived,
        );
        let resolved = ctx.tags.resolve_all(&mut *ctx.store, &combined)?;
        let tags = merge_unique(
            string_list(field(existing, "tags")),
            resolved.iter().map(|tag| tag.label.clone()),
        );
        let mut tag_refs: Vec<Value> = field(existing, "tags_ref")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for tag in &resolved {
            let present = tag_refs.iter().any(|reference| {
                reference.get("_ref").and_then(Value::as_str)
                    == Some(tag.reference.target_id.as_str())
            });
            if !present {
                tag_refs.push(serde_json::to_value(&tag.reference)?);
            }
        }

        let thumbnail = self.thumbnail(ctx, video_id, snippet, existing)?;
        let media = youtube_media_block(video_id, &title, thumbnail);
        let channel_ref = match &self.options.channel_ref {
            Some(id) => serde_json::to_value(Reference::to(id.clone()))?,
            None => field_or(existing, "channelRef", Value::Null),
        };
        let distribution = merge_unique(
            string_list(field(existing, "distribution")),
            [video_url.clone(), short_url],
        );

        let document = into_document(json!({
            "_id": doc_id,
            "_type": "vlog",
            "title": title,
            "slug": SlugField::new(vlog_slug(&title, video_id)),
            "description": description,
            "language": text_field(existing, "language").unwrap_or_else(|| self.options.language.clone()),
            "channelType": text_field(existing, "channelType").unwrap_or_else(|| self.options.channel_type.clone()),
            "channelRef": channel_ref,
            "contentFormat": format.as_str(),
            "datePublished": published,
            "videoUrl": video_url,
            "video": media,
            "tags": tags,
            "tags_ref": tag_refs,
            "publish": field_or(existing, "publish", Value::Bool(true)),
            "order": field_or(existing, "order", json!(0)),
            "publishedAt": published
                .clone()
                .map(Value::from)
                .unwrap_or_else(|| field_or(existing, "publishedAt", Value::from(now.clone()))),
            "updatedAt": now,
            "ai_derivatives": field_or(existing, "ai_derivatives", default_ai_derivatives()),
            "distribution": distribution,
            "analytics": analytics(detail.statistics.as_ref(), existing),
            "gallery": field_or(existing, "gallery", json!([])),
            "narrative": field_or(existing, "narrative", Value::Null),
            "seo": field_or(existing, "seo", Value::Null),
        }))?;

        let summary = format!("{title} ({})", format.as_str());
        let mutations = vec![Mutation::CreateOrReplace(document)];
        if existing.is_some() {
            Ok(Plan::update(mutations, summary))
        } else {
            Ok(Plan::create(mutations, summary))
        }
    }
}

fn classify(detail: &VideoDetail) -> VideoFormat {
    let broadcast = detail.snippet.live_broadcast_content.as_deref();
    let streaming = detail.live_streaming_details.as_ref().is_some_and(|live| {
        non_blank(live.actual_start_time.as_deref()).is_some()
            && non_blank(live.actual_end_time.as_deref()).is_none()
    });
    if matches!(broadcast, Some("live") | Some("upcoming")) || streaming {
        return VideoFormat::Live;
    }
    match iso_duration_seconds(detail.content_details.duration.as_deref()) {
        Some(seconds) if seconds <= SHORT_MAX_SECONDS => VideoFormat::Short,
        _ => VideoFormat::Longform,
    }
}

/// Seconds in an ISO 8601 duration such as `PT1H2M3S` or `P1DT2H`. Zero and
/// unparseable durations are `None`.
fn iso_duration_seconds(duration: Option<&str>) -> Option<u64> {
    let duration = duration?.trim().to_ascii_uppercase();
    let rest = duration.strip_prefix('P')?;
    let mut total = 0u64;
    let mut digits = String::new();
    let mut in_time = false;
    for ch in rest.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            'T' => in_time = true,
            unit => {
                let value: u64 = digits.parse().ok()?;
                digits.clear();
                let scale = match (unit, in_time) {
                    ('D', false) => 86_400,
                    ('W', false) => 604_800,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                total = total.checked_add(value.checked_mul(scale)?)?;
            }
        }
    }
    (digits.is_empty() && total > 0).then_some(total)
}

fn best_thumbnail(thumbnails: &BTreeMap<String, Thumbnail>) -> Option<String> {
    THUMBNAIL_PRIORITY
        .iter()
        .find_map(|key| thumbnails.get(*key).and_then(|thumb| non_blank(thumb.url.as_deref())))
        .or_else(|| {
            thumbnails
                .values()
                .find_map(|thumb| non_blank(thumb.url.as_deref()))
        })
}

/// `<title slug>-<first six id chars>`, bounded like tag slugs.
fn vlog_slug(title: &str, video_id: &str) -> String {
    let base = slugify(title, SHORT_SLUG_MAX);
    let prefix: String = video_id.chars().take(6).collect();
    let joined = if base.is_empty() {
        prefix
    } else {
        format!("{base}-{prefix}")
    };
    slugify(&joined, TAG_SLUG_MAX)
}

fn analytics(statistics: Option<&VideoStatistics>, existing: Option<&Value>) -> Value {
    let previous = |name: &str| {
        existing
            .and_then(|existing| existing.pointer(&format!("/analytics/{name}")))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let count = |value: Option<&String>| value.and_then(|value| value.trim().parse::<u64>().ok());
    match statistics {
        Some(stats) if stats.view_count.is_some() || stats.like_count.is_some() => json!({
            "views": count(stats.view_count.as_ref()).unwrap_or_else(|| previous("views")),
            "likes": count(stats.like_count.as_ref()).unwrap_or_else(|| previous("likes")),
            "shares": previous("shares"),
            "source": "youtube",
        }),
        _ => field_or(
            existing,
            "analytics",
            json!({"views": 0, "likes": 0, "shares": 0, "source": "youtube"}),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{DocumentAction, RunReport, run_migration};
    use crate::testing::{MemoryStore, MockSource, env_map};

    fn options(extra: &[(&str, &str)]) -> YouTubeOptions {
        let mut pairs = vec![("YOUTUBE_API_KEY", "k"), ("YOUTUBE_PLAYLIST_ID", "PL1")];
        pairs.extend_from_slice(extra);
        YouTubeOptions::from_env(&EnvVars::from_map(&env_map(&pairs))).expect("options")
    }

    fn playlist_url(token: Option<&str>) -> String {
        let mut url = "https://www.googleapis.com/youtube/v3/playlistItems?part=snippet%2CcontentDetails&playlistId=PL1&maxResults=50".to_string();
        if let Some(token) = token {
            url.push_str(&format!("&pageToken={token}"));
        }
        url.push_str("&key=k");
        url
    }

    fn videos_url(ids: &str) -> String {
        format!(
            "https://www.googleapis.com/youtube/v3/videos?part=snippet%2CcontentDetails%2Cstatistics%2CliveStreamingDetails&id={}&key=k",
            ids.replace(',', "%2C")
        )
    }

    fn source() -> MockSource {
        MockSource::default()
            .with_json(
                &playlist_url(None),
                json!({
                    "nextPageToken": "P2",
                    "items": [
                        {"contentDetails": {"videoId": "abcdefgh1", "videoPublishedAt": "2024-01-01T00:00:00Z"}},
                        {"snippet": {"resourceId": {"videoId": "short0001"}}}
                    ]
                }),
            )
            .with_json(
                &playlist_url(Some("P2")),
                json!({"items": [
                    {"contentDetails": {"videoId": "live00001"}},
                    {"contentDetails": {"videoId": "abcdefgh1"}}
                ]}),
            )
            .with_json(
                &videos_url("abcdefgh1,short0001,live00001"),
                json!({"items": [
                    {
                        "id": "abcdefgh1",
                        "snippet": {
                            "title": "Big Talk",
                            "description": "About things",
                            "publishedAt": "2024-01-02T03:04:05Z",
                            "tags": ["Policy", "policy"],
                            "thumbnails": {
                                "high": {"url": "https://i.ytimg.com/vi/abcdefgh1/hq.jpg"},
                                "maxres": {"url": "https://i.ytimg.com/vi/abcdefgh1/max.jpg"}
                            }
                        },
                        "contentDetails": {"duration": "PT12M3S"},
                        "statistics": {"viewCount": "120", "likeCount": "7"}
                    },
                    {
                        "id": "short0001",
                        "snippet": {"title": "Quick one", "liveBroadcastContent": "none"},
                        "contentDetails": {"duration": "PT45S"}
                    },
                    {
                        "id": "live00001",
                        "snippet": {"title": "Live now", "liveBroadcastContent": "live"},
                        "contentDetails": {"duration": "P0D"}
                    }
                ]}),
            )
            .with_bytes("https://i.ytimg.com/vi/abcdefgh1/max.jpg", "image/jpeg", b"jpg")
    }

    fn run(store: &mut MemoryStore, options: YouTubeOptions, dry_run: bool) -> RunReport {
        let mut source = source();
        let mut ctx = RunContext::new(store, &mut source, dry_run);
        run_migration(&mut YouTubeMigration::new(options), &mut ctx).expect("run")
    }

    #[test]
    fn options_need_a_playlist_source() {
        let error = YouTubeOptions::from_env(&EnvVars::from_map(&env_map(&[(
            "YOUTUBE_API_KEY",
            "k",
        )])))
        .expect_err("no source");
        assert!(matches!(error, ConfigError::MissingOneOf { .. }));

        let channel = YouTubeOptions::from_env(&EnvVars::from_map(&env_map(&[
            ("YOUTUBE_API_KEY", "k"),
            ("YOUTUBE_CHANNEL_ID", "UC1"),
        ])))
        .expect("options");
        assert_eq!(channel.source, PlaylistSource::Channel("UC1".to_string()));
        assert_eq!(channel.max_results, 200);
        assert!(channel.include_shorts && channel.include_live);
    }

    #[test]
    fn imports_videos_with_formats_and_tags() {
        let mut store = MemoryStore::default();
        let report = run(&mut store, options(&[("VLOG_TAGS", "Aldia")]), false);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.created, 3);

        let vlog = store.get("vlog.youtube-abcdefgh1").expect("vlog");
        assert_eq!(vlog["title"], "Big Talk");
        assert_eq!(vlog["slug"]["current"], "big-talk-abcdef");
        assert_eq!(vlog["contentFormat"], "longform");
        assert_eq!(vlog["datePublished"], "2024-01-02T03:04:05.000Z");
        assert_eq!(vlog["channelType"], "personal");
        assert_eq!(vlog["video"]["platform"], "youtube");
        assert_eq!(vlog["video"]["playerColor"], "FF0000");
        assert_eq!(vlog["video"]["thumbnail"]["asset"]["_ref"], "image-upload-1");
        assert_eq!(vlog["tags"], json!(["Policy", "Aldia"]));
        assert_eq!(vlog["tags_ref"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            vlog["analytics"],
            json!({"views": 120, "likes": 7, "shares": 0, "source": "youtube"})
        );
        assert_eq!(
            vlog["distribution"],
            json!(["https://www.youtube.com/watch?v=abcdefgh1", "https://youtu.be/abcdefgh1"])
        );
        assert_eq!(store.uploads, vec!["abcdefgh1.jpg"]);

        let short = store.get("vlog.youtube-short0001").expect("short");
        assert_eq!(short["contentFormat"], "short");
        assert!(short["tags"].as_array().expect("tags").contains(&json!("YouTube Shorts")));

        let live = store.get("vlog.youtube-live00001").expect("live");
        assert_eq!(live["contentFormat"], "live");
        assert!(live["tags"].as_array().expect("tags").contains(&json!("YouTube Live")));
    }

    #[test]
    fn shorts_and_live_can_be_excluded() {
        let mut store = MemoryStore::default();
        let report = run(
            &mut store,
            options(&[("YOUTUBE_INCLUDE_SHORTS", "false"), ("YOUTUBE_INCLUDE_LIVE", "false")]),
            false,
        );
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 2);
        assert!(store.get("vlog.youtube-short0001").is_none());
    }

    #[test]
    fn rerun_merges_existing_tags_and_keeps_editorial_fields() {
        let mut store = MemoryStore::with_documents(vec![json!({
            "_id": "vlog.youtube-abcdefgh1",
            "_type": "vlog",
            "tags": ["Legacy"],
            "tags_ref": [{"_type": "reference", "_ref": "tag.legacy", "_key": "l"}],
            "publish": false,
            "channelType": "benext",
            "distribution": ["https://youtu.be/abcdefgh1", "https://example.com/cross-post"],
            "video": {"thumbnail": {"_type": "image", "asset": {"_type": "reference", "_ref": "image-old"}}}
        })]);
        let report = run(&mut store, options(&[("DOWNLOAD_THUMBNAILS", "false")]), false);
        assert_eq!(report.updated, 1);

        let vlog = store.get("vlog.youtube-abcdefgh1").expect("vlog");
        assert_eq!(vlog["publish"], false);
        assert_eq!(vlog["channelType"], "benext");
        assert_eq!(vlog["tags"], json!(["Legacy", "Policy"]));
        assert_eq!(vlog["tags_ref"][0]["_ref"], "tag.legacy");
        assert_eq!(vlog["tags_ref"][1]["_ref"], "tag.policy");
        assert_eq!(vlog["video"]["thumbnail"]["asset"]["_ref"], "image-old");
        assert_eq!(
            vlog["distribution"],
            json!([
                "https://youtu.be/abcdefgh1",
                "https://example.com/cross-post",
                "https://www.youtube.com/watch?v=abcdefgh1"
            ])
        );
        assert!(store.uploads.is_empty());
    }

    #[test]
    fn dry_run_skips_uploads_and_writes() {
        let mut store = MemoryStore::default();
        let report = run(&mut store, options(&[]), true);
        assert_eq!(store.write_count(), 0);
        assert!(
            report
                .documents
                .iter()
                .all(|result| result.action == DocumentAction::WouldCreate)
        );
    }

    #[test]
    fn channel_source_resolves_uploads_playlist() {
        let migration = YouTubeMigration::new(
            YouTubeOptions::from_env(&EnvVars::from_map(&env_map(&[
                ("YOUTUBE_API_KEY", "k"),
                ("YOUTUBE_CHANNEL_ID", "UC1"),
            ])))
            .expect("options"),
        );
        let mut store = MemoryStore::default();
        let mut source = MockSource::default().with_json(
            "https://www.googleapis.com/youtube/v3/channels?part=contentDetails&id=UC1&key=k",
            json!({"items": [{"contentDetails": {"relatedPlaylists": {"uploads": "UU1"}}}]}),
        );
        let mut ctx = RunContext::new(&mut store, &mut source, true);
        assert_eq!(migration.resolve_playlist(&mut ctx).expect("playlist"), "UU1");
    }

    #[test]
    fn durations_parse_to_seconds() {
        assert_eq!(iso_duration_seconds(Some("PT1H2M3S")), Some(3723));
        assert_eq!(iso_duration_seconds(Some("PT45S")), Some(45));
        assert_eq!(iso_duration_seconds(Some("P1DT1S")), Some(86_401));
        assert_eq!(iso_duration_seconds(Some("P0D")), None);
        assert_eq!(iso_duration_seconds(Some("garbage")), None);
        assert_eq!(iso_duration_seconds(None), None);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert_eq!(iso_duration_seconds(Some("P999999999999999999D")), None);
        assert_eq!(
            iso_duration_seconds(Some("PT18446744073709551615S")),
            Some(u64::MAX)
        );
        assert_eq!(iso_duration_seconds(Some("PT18446744073709551615S1S")), None);
    }

    #[test]
    fn slug_keeps_id_prefix_within_bounds() {
        let long_title = "word ".repeat(40);
        let slug = vlog_slug(&long_title, "abcdefgh1");
        assert!(slug.ends_with("-abcdef"));
        assert!(slug.len() <= TAG_SLUG_MAX);
        assert_eq!(vlog_slug("!!!", "xyz123456"), "xyz123");
    }
}
