//! Composes a [`NewsSource`] with the local cache, one selector at a time.

use crate::api::{FetchError, FetchedPage, NewsSource, Selector};
use crate::cancel::CancelToken;
use crate::storage::{Article, ArticleFilter, Category, Database};

pub struct NewsRepository<S> {
    source: S,
    db: Database,
    page_size: u32,
}

impl<S: NewsSource> NewsRepository<S> {
    pub fn new(source: S, db: Database, page_size: u32) -> Self {
        Self {
            source,
            db,
            page_size,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Clear the selector's cached scope, then fetch and cache page 1.
    ///
    /// The clear happens before the network call, so a failed first load
    /// leaves the scope empty rather than showing stale results.
    pub async fn first_load(
        &self,
        selector: &Selector,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        let removed = self
            .db
            .delete_articles(&selector.scope())
            .await
            .map_err(storage_error)?;
        tracing::debug!(selector = %selector, removed = removed, "Cleared cached scope for first load");

        self.fetch_and_save(selector, 1, cancel).await
    }

    /// Fetch and cache a later page without clearing anything.
    pub async fn load_more(
        &self,
        selector: &Selector,
        page: u32,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        self.fetch_and_save(selector, page, cancel).await
    }

    async fn fetch_and_save(
        &self,
        selector: &Selector,
        page: u32,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        let mut fetched = self
            .source
            .fetch_page(selector, page, self.page_size, cancel)
            .await?;

        // Nothing is written for an operation abandoned mid-flight
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let tag = selector.tag();
        for article in &mut fetched.articles {
            article.tag = Some(tag.clone());
        }

        self.db
            .upsert_articles(&fetched.articles)
            .await
            .map_err(storage_error)?;

        Ok(fetched)
    }

    /// Cached articles in the selector's scope, oldest insertion first.
    pub async fn fetch_cached(&self, selector: &Selector) -> Result<Vec<Article>, FetchError> {
        self.db
            .query_articles(&selector.scope())
            .await
            .map_err(storage_error)
    }

    pub async fn has_cached(&self, selector: &Selector) -> Result<bool, FetchError> {
        let count = self
            .db
            .count_articles(&selector.scope())
            .await
            .map_err(storage_error)?;
        Ok(count > 0)
    }

    /// Keyword of the most recently cached search result.
    pub async fn last_search_keyword(&self) -> Result<Option<String>, FetchError> {
        let newest = self
            .db
            .newest_article(&ArticleFilter::AnySearch)
            .await
            .map_err(storage_error)?;
        Ok(newest.and_then(|a| a.search_keyword().map(str::to_string)))
    }

    /// Category of the most recently cached headline.
    pub async fn last_category(&self) -> Result<Option<Category>, FetchError> {
        let newest = self
            .db
            .newest_article(&ArticleFilter::AnyCategory)
            .await
            .map_err(storage_error)?;
        Ok(newest.and_then(|a| a.category()))
    }
}

fn storage_error(err: anyhow::Error) -> FetchError {
    tracing::warn!(error = %err, "Article cache operation failed");
    FetchError::Storage(err.to_string())
}
