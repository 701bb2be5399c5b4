use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the cache database
    #[error("Another instance of newsreel appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Category
// ============================================================================

/// Top-headline categories offered by the news API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Business,
    Entertainment,
    #[default]
    General,
    Health,
    Science,
    Sports,
    Technology,
}

#[derive(Debug, Error)]
#[error("Unknown category '{0}' (expected one of: business, entertainment, general, health, science, sports, technology)")]
pub struct UnknownCategory(pub String);

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Business,
        Category::Entertainment,
        Category::General,
        Category::Health,
        Category::Science,
        Category::Sports,
        Category::Technology,
    ];

    /// Lowercase name used by the API and stored in the cache.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Business => "business",
            Category::Entertainment => "entertainment",
            Category::General => "general",
            Category::Health => "health",
            Category::Science => "science",
            Category::Sports => "sports",
            Category::Technology => "technology",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Category::Business => "Business",
            Category::Entertainment => "Entertainment",
            Category::General => "General",
            Category::Health => "Health",
            Category::Science => "Science",
            Category::Sports => "Sports",
            Category::Technology => "Technology",
        }
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Articles
// ============================================================================

/// How an article entered the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleTag {
    Category(Category),
    Search(String),
}

/// A cached news article. Identity is `url`.
///
/// `tag` is `None` only between parsing and saving; every stored row carries
/// exactly one tag (enforced by a CHECK constraint).
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub tag: Option<ArticleTag>,
    /// Local capture time; the cache's ordering key.
    pub inserted_at: DateTime<Utc>,
}

impl Article {
    pub fn category(&self) -> Option<Category> {
        match &self.tag {
            Some(ArticleTag::Category(c)) => Some(*c),
            _ => None,
        }
    }

    pub fn search_keyword(&self) -> Option<&str> {
        match &self.tag {
            Some(ArticleTag::Search(k)) => Some(k),
            _ => None,
        }
    }
}

/// Internal row type for article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<i64>,
    pub category: Option<String>,
    pub search_keyword: Option<String>,
    pub inserted_at: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        let tag = match (self.category, self.search_keyword) {
            (Some(name), _) => match name.parse::<Category>() {
                Ok(category) => Some(ArticleTag::Category(category)),
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Cached article has unknown category");
                    None
                }
            },
            (None, Some(keyword)) => Some(ArticleTag::Search(keyword)),
            (None, None) => None,
        };

        Article {
            url: self.url,
            title: self.title,
            description: self.description,
            content: self.content,
            author: self.author,
            source_id: self.source_id,
            source_name: self.source_name,
            image_url: self.image_url,
            published_at: self.published_at.and_then(DateTime::from_timestamp_millis),
            tag,
            inserted_at: DateTime::from_timestamp_micros(self.inserted_at).unwrap_or_default(),
        }
    }
}

// ============================================================================
// Query Surface
// ============================================================================

/// Predicate for cache reads and bulk deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleFilter {
    All,
    /// Any article that came from a category headline fetch.
    AnyCategory,
    Category(Category),
    /// Any article that came from a keyword search.
    AnySearch,
    SearchKeyword(String),
}

/// Sort key for [`crate::storage::Database::query_articles_sorted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    InsertedAt,
    PublishedAt,
}
