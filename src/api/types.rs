use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::storage::Article;

/// Top-level JSON body returned by both the search and headlines endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewsEnvelope {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub total_results: i64,
    #[serde(default)]
    pub articles: Vec<RawArticle>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawSource {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawArticle {
    #[serde(default)]
    pub source: Option<RawSource>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: Option<String>,
    pub content: Option<String>,
}

impl RawArticle {
    /// Convert to an untagged [`Article`] stamped with `now`.
    ///
    /// Returns `None` when the URL or title is missing, since neither can be
    /// cached or shown. An unparseable `publishedAt` becomes `None`.
    pub(crate) fn into_article(self, now: DateTime<Utc>) -> Option<Article> {
        let url = self.url.filter(|u| !u.trim().is_empty())?;
        let title = self.title?;
        let source = self.source.unwrap_or_default();

        let published_at = self.published_at.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|d| d.with_timezone(&Utc))
                .ok()
        });

        Some(Article {
            url,
            title,
            description: self.description,
            content: self.content,
            author: self.author,
            source_id: source.id,
            source_name: source.name,
            image_url: self.url_to_image,
            published_at,
            tag: None,
            inserted_at: now,
        })
    }
}
