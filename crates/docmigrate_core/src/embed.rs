use reqwest::Url;
use serde_json::Value;

use crate::document::MediaBlock;

pub const YOUTUBE_PLAYER_COLOR: &str = "FF0000";
pub const TIKTOK_PLAYER_COLOR: &str = "000000";
pub const AUDIO_PLAYER_COLOR: &str = "1B2A41";

const YOUTUBE_EMBED_BASE: &str = "https://www.youtube.com/embed/";
const TIKTOK_EMBED_BASE: &str = "https://www.tiktok.com/embed/v2/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPlatform {
    YouTube,
    TikTok,
}

/// Display platform name for a video URL, by host substring.
pub fn detect_platform_from_url(url: &str) -> Option<&'static str> {
    let lowered = url.to_ascii_lowercase();
    if lowered.contains("tiktok.com") {
        Some("TikTok")
    } else if lowered.contains("instagram.com") {
        Some("Instagram Reels")
    } else if lowered.contains("linkedin.com") {
        Some("LinkedIn")
    } else if lowered.contains("youtube.com") || lowered.contains("youtu.be") {
        Some("YouTube")
    } else {
        None
    }
}

/// Responsive iframe wrapper for a platform/id pair.
pub fn render_embed(platform: EmbedPlatform, platform_id: &str, title: &str) -> String {
    match platform {
        EmbedPlatform::YouTube => format!(
            "<div style=\"position:relative;padding-bottom:56.25%;height:0;overflow:hidden;\">\
<iframe src=\"{src}\" title=\"{title}\" \
allow=\"accelerometer; autoplay; clipboard-write; encrypted-media; gyroscope; picture-in-picture\" \
allowfullscreen style=\"position:absolute;top:0;left:0;width:100%;height:100%;border:0;\"></iframe></div>",
            src = embed_src(YOUTUBE_EMBED_BASE, platform_id),
            title = escape_attribute(title),
        ),
        EmbedPlatform::TikTok => format!(
            "<div style=\"position:relative;padding-bottom:177.78%;height:0;overflow:hidden;\">\
<iframe src=\"{src}\" allow=\"fullscreen; picture-in-picture\" \
style=\"position:absolute;top:0;left:0;width:100%;height:100%;border:0;\" title=\"TikTok video\"></iframe></div>",
            src = embed_src(TIKTOK_EMBED_BASE, platform_id),
        ),
    }
}

pub fn audio_embed(source_url: &str) -> String {
    format!(
        "<audio controls src=\"{}\" style=\"width:100%\"></audio>",
        escape_attribute(source_url)
    )
}

pub fn youtube_media_block(video_id: &str, title: &str, thumbnail: Option<Value>) -> MediaBlock {
    MediaBlock {
        kind: "mediaBlock".to_string(),
        title: title.to_string(),
        asset_type: "video".to_string(),
        platform: "youtube".to_string(),
        platform_id: video_id.to_string(),
        embed_code: Some(render_embed(EmbedPlatform::YouTube, video_id, title)),
        player_color: YOUTUBE_PLAYER_COLOR.to_string(),
        thumbnail,
    }
}

/// TikTok clips store the canonical video URL as `platformId`; the embed uses the numeric id.
pub fn tiktok_media_block(
    video_id: &str,
    video_url: &str,
    title: &str,
    thumbnail: Option<Value>,
) -> MediaBlock {
    MediaBlock {
        kind: "mediaBlock".to_string(),
        title: title.to_string(),
        asset_type: "video".to_string(),
        platform: "tiktok".to_string(),
        platform_id: video_url.to_string(),
        embed_code: Some(render_embed(EmbedPlatform::TikTok, video_id, title)),
        player_color: TIKTOK_PLAYER_COLOR.to_string(),
        thumbnail,
    }
}

/// Audio block for a podcast episode. `None` when there is no playable source.
pub fn audio_media_block(
    title: &str,
    source_url: Option<&str>,
    guid: Option<&str>,
) -> Option<MediaBlock> {
    let source_url = source_url.map(str::trim).filter(|url| !url.is_empty())?;
    let platform_id = guid
        .map(str::trim)
        .filter(|guid| !guid.is_empty())
        .unwrap_or(source_url);
    Some(MediaBlock {
        kind: "mediaBlock".to_string(),
        title: title.to_string(),
        asset_type: "audio".to_string(),
        platform: "other".to_string(),
        platform_id: platform_id.to_string(),
        embed_code: Some(audio_embed(source_url)),
        player_color: AUDIO_PLAYER_COLOR.to_string(),
        thumbnail: None,
    })
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Embed URL with `id` appended as one percent-encoded path segment.
fn embed_src(base: &str, id: &str) -> String {
    let Ok(mut url) = Url::parse(base) else {
        return format!("{base}{id}");
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(id);
    }
    url.into()
}
