use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Display budget for article descriptions, in characters.
pub const DESCRIPTION_BUDGET: usize = 100;
/// Display budget for article content, in characters.
pub const CONTENT_BUDGET: usize = 150;

const ELLIPSIS: &str = "...";

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"style\s*=\s*"[^"]*""#).expect("valid style pattern"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
/// The NewsAPI free tier cuts `content` and appends e.g. `[+212 chars]`.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\[\+\d+\s*(?:chars?|characters?)\]\s*").expect("valid marker pattern")
});

/// HTML entities decoded by [`sanitize`]. Anything else is left as-is.
const ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
    ("&copy;", "©"),
    ("&reg;", "®"),
    ("&trade;", "™"),
];

/// Display-ready article text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sanitized {
    pub text: String,
    /// More text exists than is shown: either the text was cut to the budget
    /// or the source itself was cut (it carried a `[+N chars]` marker).
    pub truncated: bool,
}

/// Cleans raw article text for display and cuts it to `max_len` characters.
///
/// Steps, in order:
/// 0. strip terminal control characters and escape sequences
/// 1. decode the common HTML entities (single pass, so `&amp;lt;` becomes `&lt;`)
/// 2. drop `<tag>`-shaped runs and `style="..."` fragments
/// 3. collapse whitespace and trim
/// 4. remove every `[+N chars]` marker, remembering whether one was present
/// 5. truncate to `max_len` characters with a trailing `...`
///
/// Text that already ends in `...` and fits the budget without it is taken
/// to be output of an earlier pass and returned unchanged, which makes
/// sanitizing sanitized text a no-op.
///
/// # Examples
///
/// ```
/// use newsreel::util::sanitize;
///
/// let out = sanitize(Some("A &amp; B <b>bold</b> [+212 chars]"), 100);
/// assert_eq!(out.text, "A & B bold");
/// assert!(out.truncated);
///
/// let out = sanitize(Some("Hello world, again"), 11);
/// assert_eq!(out.text, "Hello world...");
/// ```
pub fn sanitize(raw: Option<&str>, max_len: usize) -> Sanitized {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Sanitized::default();
    };

    let visible = strip_control_chars(raw);
    let decoded = decode_entities(&visible);
    let untagged = TAG_RE.replace_all(&decoded, "");
    let unstyled = STYLE_RE.replace_all(&untagged, "");
    let collapsed = WHITESPACE_RE.replace_all(&unstyled, " ");
    let cleaned = collapsed.trim();

    let had_marker = MARKER_RE.is_match(cleaned);
    let text = if had_marker {
        let unmarked = MARKER_RE.replace_all(cleaned, " ");
        // Adjacent markers leave a double space behind
        WHITESPACE_RE
            .replace_all(&unmarked, " ")
            .trim()
            .to_string()
    } else {
        cleaned.to_string()
    };

    let len = text.chars().count();
    if len <= max_len {
        return Sanitized {
            text,
            truncated: had_marker,
        };
    }

    if let Some(body) = text.strip_suffix(ELLIPSIS) {
        if body.chars().count() <= max_len {
            return Sanitized {
                text,
                truncated: true,
            };
        }
    }

    let mut cut: String = text.chars().take(max_len).collect();
    cut.truncate(cut.trim_end().len());
    if !cut.ends_with(ELLIPSIS) {
        cut.push_str(ELLIPSIS);
    }

    Sanitized {
        text: cut,
        truncated: true,
    }
}

fn is_stripped_control(c: char) -> bool {
    c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Removes terminal control characters and ANSI escape sequences from remote text.
///
/// CSI (`ESC [` up to a final byte in `0x40..=0x7E`) and OSC (`ESC ]` up to
/// BEL or `ESC \`) sequences are dropped whole. A lone ESC, the other C0
/// controls and DEL are dropped on their own. Tab, newline and carriage
/// return are kept.
///
/// Clean input comes back borrowed.
///
/// ```
/// use newsreel::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("\x1b[31mred\x1b[0m"), "red");
/// assert_eq!(strip_control_chars("plain"), "plain");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            let introducer = chars.peek().copied();
            match introducer {
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_stripped_control(c) {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Replaces known entities left to right. Unknown `&...;` sequences survive.
fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match ENTITIES
            .iter()
            .find(|(entity, _)| tail.starts_with(entity))
        {
            Some((entity, literal)) => {
                out.push_str(literal);
                rest = &tail[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Fits a single line into `max_width` terminal columns, appending `...`
/// when it has to cut. CJK and emoji count as two columns.
///
/// ```
/// use newsreel::util::fit_width;
///
/// assert_eq!(fit_width("Short", 10), "Short");
/// assert_eq!(fit_width("Hello World", 8), "Hello...");
/// ```
pub fn fit_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if UnicodeWidthStr::width(s) <= max_width {
        return Cow::Borrowed(s);
    }
    if max_width <= ELLIPSIS.len() {
        return Cow::Owned(take_columns(s, max_width).to_string());
    }

    let body = take_columns(s, max_width - ELLIPSIS.len());
    Cow::Owned(format!("{}{}", body.trim_end(), ELLIPSIS))
}

/// Longest prefix of `s` that fits in `columns`.
fn take_columns(s: &str, columns: usize) -> &str {
    let mut used = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > columns {
            return &s[..idx];
        }
        used += w;
    }
    s
}
