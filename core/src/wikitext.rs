//! Wikitext to plain text.
//!
//! Templates and file/image links are removed together with everything they
//! contain. All other constructs are rendered to their visible text: links to
//! their label, headings to their title, tags to their contents (except tags
//! whose contents are never displayed, like `<ref>`).

use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Link targets with one of these prefixes are media, not prose.
const MEDIA_PREFIXES: &[&str] = &["File:", "Image:"];

const INVISIBLE_TAGS: &[&str] = &[
    "ref", "references", "math", "gallery", "timeline", "score", "imagemap",
    "graph", "templatedata", "inputbox", "categorytree", "section",
];

lazy_static! {
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)<!--.*?(?:-->|$)").expect("valid regex");
    static ref INVISIBLE_RES: Vec<(Regex, Regex)> = INVISIBLE_TAGS
        .iter()
        .map(|tag| {
            let paired = Regex::new(&format!(r"(?is)<{tag}\b[^>]*?[^/]>.*?</{tag}\s*>|<{tag}>.*?</{tag}\s*>")).expect("valid regex");
            let single = Regex::new(&format!(r"(?i)<{tag}\b[^>]*/>")).expect("valid regex");
            (paired, single)
        })
        .collect();
    static ref TABLE_LINE_RE: Regex = Regex::new(r"(?m)^[ \t]*(?:\{\||\|\}|\|-|\|\+).*$").expect("valid regex");
    static ref TABLE_CELL_RE: Regex = Regex::new(r"(?m)^[ \t]*[|!]").expect("valid regex");
    static ref CELL_SEP_RE: Regex = Regex::new(r"\|\||!!").expect("valid regex");
    static ref PIPED_LINK_RE: Regex = Regex::new(r"\[\[[^\[\]|]*\|([^\[\]]*)\]\]").expect("valid regex");
    static ref PLAIN_LINK_RE: Regex = Regex::new(r"\[\[([^\[\]|]*)\]\]").expect("valid regex");
    static ref EXT_LINK_TEXT_RE: Regex = Regex::new(r"\[(?:https?:|ftp:)?//[^\s\]]+\s+([^\]]*)\]").expect("valid regex");
    static ref EXT_LINK_BARE_RE: Regex = Regex::new(r"\[(?:https?:|ftp:)?//[^\s\]]+\]").expect("valid regex");
    static ref HTML_TAG_RE: Regex = Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^>]*)?/?>").expect("valid regex");
    static ref HEADING_RE: Regex = Regex::new(r"(?m)^=+[ \t]*(.*?)[ \t]*=+[ \t]*$").expect("valid regex");
    static ref EMPHASIS_RE: Regex = Regex::new(r"'{2,}").expect("valid regex");
    static ref MAGIC_WORD_RE: Regex = Regex::new(r"__[A-Z]+__").expect("valid regex");
    static ref ENTITY_RE: Regex = Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex");
}

/// Render wikitext to plain text (case is preserved).
pub fn strip_markup(raw: &str) -> String {
    let text = COMMENT_RE.replace_all(raw, "");
    let text = remove_templates(&text);
    let text = remove_media_links(&text);

    let mut text = text;
    for (paired, single) in INVISIBLE_RES.iter() {
        text = paired.replace_all(&text, "").into_owned();
        text = single.replace_all(&text, "").into_owned();
    }

    let text = TABLE_LINE_RE.replace_all(&text, "");
    let text = TABLE_CELL_RE.replace_all(&text, "");
    let text = CELL_SEP_RE.replace_all(&text, " ");
    let text = PIPED_LINK_RE.replace_all(&text, "$1");
    let text = PLAIN_LINK_RE.replace_all(&text, "$1");
    let text = EXT_LINK_TEXT_RE.replace_all(&text, "$1");
    let text = EXT_LINK_BARE_RE.replace_all(&text, "");
    let text = HTML_TAG_RE.replace_all(&text, "");
    let text = HEADING_RE.replace_all(&text, "$1");
    let text = EMPHASIS_RE.replace_all(&text, "");
    let text = MAGIC_WORD_RE.replace_all(&text, "");
    decode_entities(&text)
}

/// Drop every `{{...}}`, nested ones included. An unclosed `{{` is kept as
/// text and scanning resumes right after it.
fn remove_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match matching_close(after, b'{', b'}') {
            Some(end) => rest = &after[end..],
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Drop `[[File:...]]` and `[[Image:...]]` links, captions and nested links
/// included. An unclosed media link is kept as text.
fn remove_media_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("[[") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let target = after.trim_start();
        let closed = if MEDIA_PREFIXES.iter().any(|p| target.starts_with(p)) {
            matching_close(after, b'[', b']')
        } else {
            None
        };
        match closed {
            Some(end) => rest = &after[end..],
            None => {
                out.push_str("[[");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte offset just past the doubled `close` that balances a doubled `open`
/// already consumed.
fn matching_close(text: &str, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] == open && bytes[i + 1] == open {
            depth += 1;
            i += 2;
        } else if bytes[i] == close && bytes[i + 1] == close {
            depth -= 1;
            i += 2;
            if depth == 0 { return Some(i); }
        } else {
            i += 1;
        }
    }
    None
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let decoded = match name {
                "nbsp" => Some(' '),
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "ndash" => Some('\u{2013}'),
                "mdash" => Some('\u{2014}'),
                _ => {
                    let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = name.strip_prefix('#') {
                        dec.parse().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_nested_templates() {
        let text = strip_markup("Before {{Infobox|name={{lang|fr|Paris}}}} after");
        assert_eq!(text, "Before  after");
    }

    #[test]
    fn removes_media_links_with_nested_captions() {
        let text = strip_markup("A [[File:Map.png|thumb|A [[map]] of [[France]]]] B [[ Image:x.jpg]] C");
        assert_eq!(text, "A  B  C");
    }

    #[test]
    fn renders_links_to_labels() {
        let text = strip_markup("See [[Paris|the capital]] and [[Lyon]] or [https://example.org Example].");
        assert_eq!(text, "See the capital and Lyon or Example.");
    }

    #[test]
    fn drops_references_and_comments() {
        let text = strip_markup("Fact.<ref name=\"a\">Source 1</ref> More<ref name=b /> text<!-- hidden -->.");
        assert_eq!(text, "Fact. More text.");
    }

    #[test]
    fn headings_emphasis_and_entities() {
        let text = strip_markup("== History ==\n'''Bold''' and ''it''&nbsp;&amp; more");
        assert_eq!(text, "History\nBold and it & more");
    }

    #[test]
    fn unclosed_template_is_kept_as_text() {
        assert_eq!(strip_markup("text {{broken"), "text {{broken");
        assert_eq!(strip_markup("a {{open {{inner}} tail"), "a {{open  tail");
    }

    #[test]
    fn unclosed_media_link_keeps_the_article() {
        let text = strip_markup("Intro [[File:x.jpg|thumb|caption] Paris is the capital of France. [[File:y.png|z]] End.");
        assert!(text.starts_with("Intro [[File:x.jpg|thumb|caption] Paris is the capital of France."));
        assert!(text.ends_with(" End."));
        assert!(!text.contains("y.png"));
    }
}
