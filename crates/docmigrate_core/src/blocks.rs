use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::new_key;
use crate::html::{collapse_whitespace, split_paragraphs, strip_html};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[serde(rename = "_type")]
    pub kind: String,
    #[serde(rename = "_key")]
    pub key: String,
    pub text: String,
    #[serde(default)]
    pub marks: Vec<String>,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "span".to_string(),
            key: new_key(),
            text: text.into(),
            marks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(rename = "_type")]
    pub kind: String,
    #[serde(rename = "_key")]
    pub key: String,
    pub style: String,
    #[serde(default)]
    pub mark_defs: Vec<Value>,
    pub children: Vec<Span>,
}

impl Block {
    /// Normal-style paragraph with a single unmarked span.
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            kind: "block".to_string(),
            key: new_key(),
            style: "normal".to_string(),
            mark_defs: Vec::new(),
            children: vec![Span::plain(text)],
        }
    }

    pub fn text(&self) -> String {
        self.children
            .iter()
            .map(|span| span.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Paragraph blocks from raw markup: tags stripped, blank-line split, whitespace collapsed.
pub fn html_to_blocks(html: &str) -> Vec<Block> {
    text_to_blocks(&strip_html(html))
}

/// Paragraph blocks from plain text split on blank lines.
pub fn text_to_blocks(text: &str) -> Vec<Block> {
    split_paragraphs(text.trim())
        .iter()
        .map(|paragraph| collapse_whitespace(paragraph))
        .filter(|paragraph| !paragraph.is_empty())
        .map(Block::paragraph)
        .collect()
}

/// Repair an existing block array so every block and span carries a key and the
/// fields the editor expects. Non-object entries are dropped; a block without
/// children gets one empty span. Existing keys and unknown fields are kept, and
/// non-block items such as images only get a key.
pub fn ensure_block_keys(blocks: &[Value]) -> Vec<Value> {
    blocks
        .iter()
        .filter_map(Value::as_object)
        .map(|block| {
            if string_field(block, "_type").is_some_and(|kind| kind != "block") {
                return Value::Object(with_key(block));
            }
            let mut normalized = with_key(block);
            normalized.insert("_type".to_string(), Value::from("block"));
            normalized.insert(
                "style".to_string(),
                Value::from(string_field(block, "style").unwrap_or("normal")),
            );
            normalized.insert("markDefs".to_string(), array_or_empty(block.get("markDefs")));

            let mut children: Vec<Value> = block
                .get("children")
                .and_then(Value::as_array)
                .map(|children| children.iter().map(normalize_span).collect())
                .unwrap_or_default();
            if children.is_empty() {
                children.push(normalize_span(&Value::Null));
            }
            normalized.insert("children".to_string(), Value::Array(children));
            Value::Object(normalized)
        })
        .collect()
}

/// Give every object item in a keyed array a `_key`. Returns `None` when nothing changed.
pub fn ensure_array_item_keys(items: &[Value]) -> Option<Vec<Value>> {
    let mut changed = false;
    let keyed = items
        .iter()
        .map(|item| match item.as_object() {
            Some(object) if string_field(object, "_key").is_none() => {
                changed = true;
                Value::Object(with_key(object))
            }
            _ => item.clone(),
        })
        .collect();
    changed.then_some(keyed)
}

/// Trailing paragraph listing hashtags, e.g. `#ai #policy`.
pub fn hashtag_block(tags: &[String]) -> Option<Block> {
    let rendered = tags
        .iter()
        .map(|tag| tag.trim_start_matches('#').trim())
        .filter(|tag| !tag.is_empty())
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>();
    if rendered.is_empty() {
        None
    } else {
        Some(Block::paragraph(rendered.join(" ")))
    }
}

fn normalize_span(child: &Value) -> Value {
    let empty = Map::new();
    let object = child.as_object().unwrap_or(&empty);
    if string_field(object, "_type").is_some_and(|kind| kind != "span") {
        return Value::Object(with_key(object));
    }
    let mut span = with_key(object);
    span.insert("_type".to_string(), Value::from("span"));
    span.insert(
        "text".to_string(),
        Value::from(string_field(object, "text").unwrap_or("")),
    );
    span.insert("marks".to_string(), array_or_empty(object.get("marks")));
    Value::Object(span)
}

fn with_key(object: &Map<String, Value>) -> Map<String, Value> {
    let mut keyed = object.clone();
    if string_field(object, "_key").is_none() {
        keyed.insert("_key".to_string(), Value::from(new_key()));
    }
    keyed
}

fn array_or_empty(value: Option<&Value>) -> Value {
    value
        .filter(|value| value.is_array())
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()))
}

fn string_field<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str)
}
