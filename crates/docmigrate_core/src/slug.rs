use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Upper bound for tag, document and episode slugs.
pub const TAG_SLUG_MAX: usize = 96;
/// Upper bound for slugs derived from video titles.
pub const SHORT_SLUG_MAX: usize = 64;

/// Normalize free text into a lowercase, accent-stripped, hyphen-delimited token.
///
/// Runs of anything outside `[a-z0-9]` collapse into one `-`. The result is cut to
/// `max_len` characters and never starts or ends with a hyphen, so applying it to
/// its own output is a no-op.
pub fn slugify(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_len));
    let mut pending_dash = false;

    for ch in input.trim().nfkd() {
        if is_combining_mark(ch) {
            continue;
        }
        let lc = ch.to_ascii_lowercase();
        if lc.is_ascii_lowercase() || lc.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(lc);
        } else {
            pending_dash = true;
        }
        if out.len() >= max_len {
            break;
        }
    }

    out.truncate(max_len);
    out.trim_matches('-').to_string()
}

/// `tag.<slug>` identifier used for tag documents created by this tool.
pub fn tag_document_id(slug: &str) -> String {
    format!("tag.{slug}")
}
