//! Plain-text article cards for the terminal.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::controller::{LoadState, Snapshot};
use crate::storage::Article;
use crate::util::{fit_width, sanitize, strip_control_chars};

const INDENT: &str = "    ";

/// Width and text budgets for a card.
#[derive(Debug, Clone, Copy)]
pub struct CardStyle {
    pub width: usize,
    pub description_budget: usize,
    pub content_budget: usize,
}

/// Format a publish time relative to `now`
pub fn format_relative_time(published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(published) = published else {
        return String::new();
    };

    let diff = (now - published).num_seconds();

    // Future dates (clock skew upstream)
    if diff < 60 {
        return "just now".to_string();
    }

    if diff < 3600 {
        return format!("{}m ago", diff / 60);
    }

    if diff < 86400 {
        return format!("{}h ago", diff / 3600);
    }

    if diff < 604800 {
        return format!("{}d ago", diff / 86400);
    }

    // Older than 7 days - show date
    published.format("%b %d, %Y").to_string()
}

/// One line of remote text, with control sequences and line breaks removed.
fn line_text(raw: Option<&str>) -> Option<String> {
    Some(sanitize(raw, usize::MAX).text).filter(|t| !t.is_empty())
}

/// One article as a block of lines: title, byline, description, content, link.
///
/// Every field comes from the remote API, so each is stripped of terminal
/// control sequences before printing.
pub fn render_card(index: usize, article: &Article, style: &CardStyle, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let prefix = format!("{:>3}. ", index + 1);
    let title_width = style.width.saturating_sub(prefix.len());
    let title = sanitize(Some(article.title.as_str()), usize::MAX).text;
    let _ = writeln!(out, "{}{}", prefix, fit_width(&title, title_width));

    let byline: Vec<String> = [
        line_text(article.source_name.as_deref()),
        line_text(article.author.as_deref()),
        Some(format_relative_time(article.published_at, now)).filter(|t| !t.is_empty()),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !byline.is_empty() {
        let line = byline.join(" · ");
        let _ = writeln!(out, "{}{}", INDENT, fit_width(&line, style.width.saturating_sub(INDENT.len())));
    }

    let description = sanitize(article.description.as_deref(), style.description_budget);
    if !description.text.is_empty() {
        let _ = writeln!(out, "{}{}", INDENT, description.text);
    }

    let content = sanitize(article.content.as_deref(), style.content_budget);
    if !content.text.is_empty() && content.text != description.text {
        let _ = writeln!(out, "{}{}", INDENT, content.text);
    }
    let url = strip_control_chars(&article.url);
    if content.truncated {
        let _ = writeln!(out, "{}Read more: {}", INDENT, url);
    } else {
        let _ = writeln!(out, "{}{}", INDENT, url);
    }

    out
}

/// Header line plus every card in `snapshot`.
pub fn render_snapshot(snapshot: &Snapshot, style: &CardStyle, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let status = match &snapshot.state {
        LoadState::Idle => String::new(),
        LoadState::LoadingFirst => " (loading)".to_string(),
        LoadState::LoadingMore => " (loading more)".to_string(),
        LoadState::Error(_) => " (error)".to_string(),
    };
    let _ = writeln!(
        out,
        "{} · {} article{}{}",
        snapshot.selector,
        snapshot.articles.len(),
        if snapshot.articles.len() == 1 { "" } else { "s" },
        status
    );
    let _ = writeln!(out, "{}", "─".repeat(style.width.min(80)));

    if snapshot.articles.is_empty() {
        let _ = writeln!(out, "No articles");
    }
    for (i, article) in snapshot.articles.iter().enumerate() {
        out.push_str(&render_card(i, article, style, now));
        out.push('\n');
    }

    if let Some(error) = &snapshot.error {
        // Decode errors carry the server's own message
        let _ = writeln!(out, "Error: {}", strip_control_chars(error));
    }
    if snapshot.has_more {
        let _ = writeln!(out, "More results available.");
    }
    out
}
