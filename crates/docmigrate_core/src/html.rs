use std::collections::BTreeMap;

/// Tags whose boundaries become line breaks when flattening markup to text.
const BLOCK_TAGS: &[&str] = &[
    "div", "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "ul", "ol", "section",
    "article", "figure", "header", "footer",
];

/// Elements whose content is never text.
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// One lexical piece of an HTML fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Tag(Tag),
    /// Comments, doctypes and processing instructions.
    Markup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// Lowercased.
    pub name: String,
    pub closing: bool,
    /// Lowercased names, raw values. The first occurrence of a name wins.
    pub attrs: BTreeMap<String, String>,
}

/// Lazily split `html` into text runs and tags. `<script>` and `<style>` bodies are
/// consumed along with their opening tag.
pub fn tokenize(html: &str) -> Tokens<'_> {
    Tokens { html, pos: 0 }
}

pub struct Tokens<'a> {
    html: &'a str,
    pos: usize,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let rest = &self.html[self.pos..];
        if rest.is_empty() {
            return None;
        }
        let Some(lt) = rest.find('<') else {
            self.pos = self.html.len();
            return Some(Token::Text(rest));
        };
        if lt > 0 {
            self.pos += lt;
            return Some(Token::Text(&rest[..lt]));
        }

        if let Some(body) = rest.strip_prefix("<!--") {
            self.pos += 4 + body.find("-->").map_or(body.len(), |end| end + 3);
            return Some(Token::Markup);
        }
        let opens_markup = rest[1..]
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || matches!(ch, '/' | '!' | '?'));
        if !opens_markup {
            self.pos += 1;
            return Some(Token::Text("<"));
        }
        let Some(len) = tag_len(rest) else {
            self.pos = self.html.len();
            return Some(Token::Text(rest));
        };
        let raw = &rest[..len];
        self.pos += len;
        if raw.starts_with("<!") || raw.starts_with("<?") {
            return Some(Token::Markup);
        }
        let Some(tag) = parse_tag(raw) else {
            return Some(Token::Text(raw));
        };
        if !tag.closing && RAW_TEXT_TAGS.contains(&tag.name.as_str()) {
            self.skip_raw_text(&tag.name);
        }
        Some(Token::Tag(tag))
    }
}

impl Tokens<'_> {
    /// Move past the body and closing tag of a raw-text element.
    fn skip_raw_text(&mut self, name: &str) {
        let rest = &self.html[self.pos..];
        let close = format!("</{name}");
        self.pos += match rest.to_ascii_lowercase().find(&close) {
            Some(at) => at + tag_len(&rest[at..]).unwrap_or(rest.len() - at),
            None => rest.len(),
        };
    }
}

/// Byte length of the tag at the start of `text` through its `>`, skipping quoted values.
fn tag_len(text: &str) -> Option<usize> {
    let mut quote = None;
    for (offset, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return Some(offset + 1),
            (None, _) => {}
        }
    }
    None
}

fn parse_tag(raw: &str) -> Option<Tag> {
    let inner = raw.strip_prefix('<')?.strip_suffix('>')?;
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let name_len = inner
        .find(|ch: char| !ch.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    if name_len == 0 {
        return None;
    }
    Some(Tag {
        name: inner[..name_len].to_ascii_lowercase(),
        closing,
        attrs: parse_attrs(&inner[name_len..]),
    })
}

/// `name="value"`, `name='value'`, `name=value` and bare `name` pairs.
fn parse_attrs(text: &str) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let mut chars = text.chars().peekable();
    loop {
        while chars.next_if(|ch| ch.is_whitespace() || *ch == '/').is_some() {}
        let name: String = std::iter::from_fn(|| {
            chars.next_if(|ch| !ch.is_whitespace() && !matches!(*ch, '=' | '/'))
        })
        .collect();
        if name.is_empty() {
            if chars.next().is_none() {
                break;
            }
            continue;
        }

        while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
        let mut value = String::new();
        if chars.next_if_eq(&'=').is_some() {
            while chars.next_if(|ch| ch.is_whitespace()).is_some() {}
            value = match chars.next_if(|ch| matches!(*ch, '"' | '\'')) {
                Some(quote) => chars.by_ref().take_while(|ch| *ch != quote).collect(),
                None => std::iter::from_fn(|| chars.next_if(|ch| !ch.is_whitespace())).collect(),
            };
        }
        attrs.entry(name.to_ascii_lowercase()).or_insert(value);
    }
    attrs
}

/// Flatten markup into plain text with paragraph breaks preserved as blank lines.
///
/// `<br>` becomes a newline, block-level tags become line boundaries, closing `</p>`
/// becomes a blank line, `<script>`/`<style>` bodies and comments are dropped and
/// entities are decoded. Horizontal whitespace at line ends is trimmed and runs of
/// three or more newlines fold to two.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    for token in tokenize(html) {
        match token {
            Token::Text(chunk) => text.push_str(chunk),
            Token::Markup => {}
            Token::Tag(tag) => match tag.name.as_str() {
                "br" => text.push('\n'),
                "p" if tag.closing => text.push_str("\n\n"),
                name if BLOCK_TAGS.contains(&name) => text.push('\n'),
                _ => {}
            },
        }
    }
    tidy_newlines(&decode_entities(&text))
}

/// Decode the named and numeric entities feeds commonly carry.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let Some(semi) = candidate.bytes().take(12).position(|byte| byte == b';') else {
            out.push('&');
            rest = &candidate[1..];
            continue;
        };
        let entity = &candidate[1..semi];
        match decode_entity(entity) {
            Some(ch) => {
                out.push(ch);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "ndash" => Some('\u{2013}'),
        "mdash" => Some('\u{2014}'),
        "hellip" => Some('\u{2026}'),
        "rsquo" => Some('\u{2019}'),
        "lsquo" => Some('\u{2018}'),
        "rdquo" => Some('\u{201D}'),
        "ldquo" => Some('\u{201C}'),
        _ => {
            let numeric = entity.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Collapse every whitespace run (newlines included) into a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into paragraphs on blank lines, dropping empty ones.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

/// `src` values of every `<img>` in document order, de-duplicated.
pub fn image_sources(html: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for token in tokenize(html) {
        let Token::Tag(tag) = token else {
            continue;
        };
        if tag.closing || tag.name != "img" {
            continue;
        }
        if let Some(src) = tag.attrs.get("src") {
            let src = decode_entities(src.trim());
            if !src.is_empty() && !seen.contains(&src) {
                seen.push(src);
            }
        }
    }
    seen
}

fn tidy_newlines(text: &str) -> String {
    let mut lines = Vec::new();
    let mut blank_run = 0usize;
    for line in text.split('\n') {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                lines.push("");
            }
            continue;
        }
        blank_run = 0;
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}
