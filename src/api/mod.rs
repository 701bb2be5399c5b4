//! Remote news API access.
//!
//! [`NewsSource`] is the seam between the repository and the network: the
//! production implementation is [`NewsApiClient`], tests drive the repository
//! and controller with in-process fakes.

mod client;
mod types;

pub use client::{ClientOptions, NewsApiClient};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::storage::{Article, ArticleFilter, ArticleTag, Category};

/// Errors that can occur while fetching a page of articles.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be built (page 0, bad endpoint, keyword too long)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// HTTP response with non-200 status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Body did not match the expected JSON envelope
    #[error("Unexpected response: {0}")]
    Decode(String),
    /// The operation was abandoned by its caller
    #[error("Cancelled")]
    Cancelled,
    /// Fetched page could not be written to or read from the local cache
    #[error("Cache error: {0}")]
    Storage(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// What a page request targets: a keyword search or a headline category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Search(String),
    Category(Category),
}

impl Selector {
    /// Cache scope cleared by a first load of this selector.
    ///
    /// All keyword searches share one scope: starting a new search drops every
    /// earlier search result, not just results for the same keyword.
    pub fn scope(&self) -> ArticleFilter {
        match self {
            Selector::Search(_) => ArticleFilter::AnySearch,
            Selector::Category(c) => ArticleFilter::Category(*c),
        }
    }

    /// Tag stamped on every article fetched for this selector.
    pub fn tag(&self) -> ArticleTag {
        match self {
            Selector::Search(keyword) => ArticleTag::Search(keyword.clone()),
            Selector::Category(c) => ArticleTag::Category(*c),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::Category(Category::default())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Search(keyword) => write!(f, "search \"{}\"", keyword),
            Selector::Category(c) => write!(f, "{}", c.display_name()),
        }
    }
}

/// One page of results, articles untagged, in API order.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub articles: Vec<Article>,
    /// Total matches reported by the API across all pages
    pub total_results: usize,
}

/// A paginated source of news articles.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Fetch one page (1-based) for `selector`.
    ///
    /// Must return [`FetchError::Cancelled`] promptly once `cancel` fires.
    async fn fetch_page(
        &self,
        selector: &Selector,
        page: u32,
        page_size: u32,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError>;
}
