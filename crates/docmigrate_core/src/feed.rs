use anyhow::{Context, Result, bail};
use roxmltree::{Document, Node, ParsingOptions};
use serde::Serialize;

use crate::document::normalize_timestamp;
use crate::html::strip_html;

const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content";
const DC_NS: &str = "http://purl.org/dc/elements/1.1";
const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";
const MEDIA_NS: &str = "http://search.yahoo.com/mrss";

#[derive(Debug, Clone, Default, Serialize)]
pub struct Feed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// One `<item>` of an RSS 2.0 channel. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    /// `content:encoded` when present, otherwise `description`.
    pub content: Option<String>,
    pub content_encoded: Option<String>,
    /// `content` flattened to plain text.
    pub content_snippet: Option<String>,
    pub pub_date: Option<String>,
    /// `pubDate` (or `dc:date`) normalized to RFC 3339 UTC.
    pub iso_date: Option<String>,
    pub categories: Vec<String>,
    pub enclosure_url: Option<String>,
    pub itunes_episode: Option<String>,
    pub itunes_season: Option<String>,
    pub itunes_duration: Option<String>,
    /// `media:content` urls followed by `media:thumbnail` urls.
    pub media_urls: Vec<String>,
}

pub fn parse_feed(xml: &str) -> Result<Feed> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, options).context("failed to parse feed XML")?;
    let rss = doc.root_element();
    if !rss.tag_name().name().eq_ignore_ascii_case("rss") {
        bail!("document is not an RSS feed (no <rss> root element)");
    }
    let Some(channel) = rss
        .children()
        .find(|node| element_key(*node).as_deref() == Some("channel"))
    else {
        bail!("RSS feed has no <channel> element");
    };

    let mut feed = Feed::default();
    for node in channel.children() {
        match element_key(node).as_deref() {
            Some("title") if feed.title.is_none() => feed.title = element_text(node),
            Some("item") => feed.items.push(parse_item(node)),
            _ => {}
        }
    }
    Ok(feed)
}

fn parse_item(item: Node<'_, '_>) -> FeedItem {
    let mut output = FeedItem::default();
    let mut description = None;
    let mut dc_date = None;
    let mut media_content = Vec::new();
    let mut media_thumbnails = Vec::new();

    for child in item.children() {
        let Some(key) = element_key(child) else {
            continue;
        };
        match key.as_str() {
            "title" => output.title = output.title.or_else(|| element_text(child)),
            "link" => output.link = output.link.or_else(|| element_text(child)),
            "guid" => output.guid = output.guid.or_else(|| element_text(child)),
            "description" => description = description.or_else(|| element_text(child)),
            "content:encoded" => {
                output.content_encoded = output.content_encoded.or_else(|| element_text(child));
            }
            "pubdate" => output.pub_date = output.pub_date.or_else(|| element_text(child)),
            "dc:date" => dc_date = dc_date.or_else(|| element_text(child)),
            "category" => {
                if let Some(category) = element_text(child)
                    && !output.categories.contains(&category)
                {
                    output.categories.push(category);
                }
            }
            "enclosure" => {
                if output.enclosure_url.is_none() {
                    output.enclosure_url = url_attribute(child);
                }
            }
            "itunes:episode" => output.itunes_episode = element_text(child),
            "itunes:season" => output.itunes_season = element_text(child),
            "itunes:duration" => output.itunes_duration = element_text(child),
            "media:content" => {
                media_content.extend(url_attribute(child));
                for nested in child.children() {
                    if element_key(nested).as_deref() == Some("media:thumbnail") {
                        media_thumbnails.extend(url_attribute(nested));
                    }
                }
            }
            "media:thumbnail" => media_thumbnails.extend(url_attribute(child)),
            _ => {}
        }
    }

    output.content = output.content_encoded.clone().or(description);
    output.content_snippet = output
        .content
        .as_deref()
        .map(strip_html)
        .filter(|snippet| !snippet.is_empty());
    output.iso_date = output
        .pub_date
        .as_deref()
        .or(dc_date.as_deref())
        .and_then(normalize_timestamp);
    for url in media_content.into_iter().chain(media_thumbnails) {
        if !output.media_urls.contains(&url) {
            output.media_urls.push(url);
        }
    }
    output
}

/// Lowercased element name, prefixed with `content:`, `dc:`, `itunes:` or `media:`
/// for the extension namespaces feeds use. `None` for non-elements and elements in
/// any other namespace.
fn element_key(node: Node<'_, '_>) -> Option<String> {
    if !node.is_element() {
        return None;
    }
    let name = node.tag_name();
    let local = name.name().to_ascii_lowercase();
    let Some(namespace) = name.namespace() else {
        return Some(local);
    };
    let namespace = namespace.trim_end_matches('/');
    let prefix = [
        ("content", CONTENT_NS),
        ("dc", DC_NS),
        ("itunes", ITUNES_NS),
        ("media", MEDIA_NS),
    ]
    .into_iter()
    .find(|(_, uri)| namespace.eq_ignore_ascii_case(uri))
    .map(|(prefix, _)| prefix)?;
    Some(format!("{prefix}:{local}"))
}

/// Text and CDATA beneath `node`, comments dropped, trimmed. `None` when blank.
fn element_text(node: Node<'_, '_>) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect();
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn url_attribute(node: Node<'_, '_>) -> Option<String> {
    node.attribute("url")
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}
