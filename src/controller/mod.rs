//! Pagination and refresh state machine for one news feature.
//!
//! A [`RefreshController`] owns the page counters for a single selector at a
//! time and drives the [`NewsRepository`] through four operations:
//!
//! - **first load**: clear the selector's cache scope and fetch page 1
//! - **load more**: fetch the next page after a short politeness delay
//! - **refresh**: pull-to-refresh with a settle delay and bounded retries
//! - **restore**: show what the cache already holds on a cold start
//!
//! Operations are serialized on an async mutex. Starting a first load, a
//! selector switch, or a forced refresh cancels whatever is in flight.
//! Observers follow state through a `tokio::sync::watch` channel of
//! [`Snapshot`]s.

mod state;

pub use state::{ControllerSettings, LoadState, Snapshot};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{FetchError, NewsSource, Selector};
use crate::cancel::CancelToken;
use crate::repository::NewsRepository;
use crate::storage::{Category, MAX_ARTICLES};
use state::Pagination;

const REFRESH_EXHAUSTED: &str = "Failed to refresh after multiple attempts";

/// Cheap to clone; clones drive the same state.
pub struct RefreshController<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for RefreshController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    repo: NewsRepository<S>,
    settings: ControllerSettings,
    /// `max_pages`, lowered so every loaded page fits in one cache read
    page_cap: u32,
    pagination: Mutex<Pagination>,
    /// Held for the whole of each operation
    op_lock: tokio::sync::Mutex<()>,
    /// Tokens of queued and running operations
    active: Mutex<Vec<CancelToken>>,
    /// Refresh still inside its settle delay
    pending_refresh: Mutex<Option<CancelToken>>,
    snapshots: watch::Sender<Snapshot>,
}

fn page_cap(settings: &ControllerSettings, page_size: u32) -> u32 {
    let fits = u32::try_from(MAX_ARTICLES / page_size.max(1) as usize).unwrap_or(u32::MAX);
    if settings.max_pages > fits {
        tracing::warn!(
            max_pages = settings.max_pages,
            page_size = page_size,
            page_cap = fits,
            "Page cap lowered to fit the cache read limit"
        );
    }
    settings.max_pages.min(fits).max(1)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: NewsSource + 'static> RefreshController<S> {
    /// Create an idle controller. Nothing is fetched until an operation runs.
    pub fn new(repo: NewsRepository<S>, settings: ControllerSettings, selector: Selector) -> Self {
        let pagination = Pagination {
            selector,
            ..Pagination::default()
        };
        let page_cap = page_cap(&settings, repo.page_size());
        let (snapshots, _) = watch::channel(pagination.snapshot(page_cap));

        Self {
            inner: Arc::new(Inner {
                repo,
                settings,
                page_cap,
                pagination: Mutex::new(pagination),
                op_lock: tokio::sync::Mutex::new(()),
                active: Mutex::new(Vec::new()),
                pending_refresh: Mutex::new(None),
                snapshots,
            }),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn state(&self) -> LoadState {
        lock(&self.inner.pagination).state.clone()
    }

    pub fn selector(&self) -> Selector {
        lock(&self.inner.pagination).selector.clone()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    pub fn has_more_pages(&self) -> bool {
        lock(&self.inner.pagination).has_more_pages(self.inner.page_cap)
    }

    /// Whether showing row `visible_index` should pull in the next page.
    pub fn should_trigger_load_more(&self, visible_index: usize) -> bool {
        let p = lock(&self.inner.pagination);
        visible_index.saturating_add(self.inner.settings.read_ahead) >= p.loaded
            && p.state == LoadState::Idle
            && p.has_more_pages(self.inner.page_cap)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// First load of `selector`. Ignored while another first load is running.
    pub async fn start_first_load(&self, selector: Selector) {
        if lock(&self.inner.pagination).state == LoadState::LoadingFirst {
            tracing::debug!(selector = %selector, "First load already running, ignoring");
            return;
        }
        self.inner.first_load(selector).await;
    }

    /// Switch to `selector`, cancelling whatever is in flight.
    ///
    /// No-op when `selector` is already current and has been loaded.
    pub async fn select_selector(&self, selector: Selector) {
        {
            let p = lock(&self.inner.pagination);
            if p.selector == selector && p.page > 0 {
                return;
            }
        }
        tracing::debug!(selector = %selector, "Selector changed");
        self.inner.first_load(selector).await;
    }

    pub async fn select_category(&self, category: Category) {
        self.select_selector(Selector::Category(category)).await;
    }

    /// Search for `keyword`. Blank keywords are ignored.
    pub async fn search(&self, keyword: &str) {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            tracing::debug!("Ignoring blank search keyword");
            return;
        }
        self.select_selector(Selector::Search(keyword.to_string()))
            .await;
    }

    /// Repeat the first load of the current selector (the error screen's retry action).
    pub async fn retry(&self) {
        let selector = self.selector();
        self.start_first_load(selector).await;
    }

    /// Fetch the next page. No-op unless idle with pages remaining.
    pub async fn load_more(&self) {
        self.inner.load_more().await;
    }

    /// Pull-to-refresh.
    ///
    /// Waits out the settle delay first; a newer `refresh` during that delay
    /// replaces this one. Past the delay the refresh runs to completion on
    /// its own task, retrying only attempts that report cancellation.
    pub fn refresh(&self) -> JoinHandle<()> {
        let token = CancelToken::new();
        if let Some(previous) = lock(&self.inner.pending_refresh).replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Refresh superseded during settle delay");
                    return;
                }
                _ = tokio::time::sleep(inner.settings.refresh_settle) => {}
            }

            {
                let mut pending = lock(&inner.pending_refresh);
                if pending.as_ref().is_some_and(|t| t.same_token(&token)) {
                    *pending = None;
                }
            }

            inner.force_refresh().await;
        })
    }

    /// Cold start: reopen the last used selector of `fallback`'s kind.
    ///
    /// Cached articles are shown without touching the network; with an empty
    /// cache this falls through to a first load.
    pub async fn restore(&self, fallback: Selector) {
        let selector = self.inner.last_used(fallback).await;
        if self.inner.show_cached(&selector).await {
            return;
        }
        self.inner.first_load(selector).await;
    }

    /// Cancel the pending refresh and every queued or running operation.
    pub fn cleanup(&self) {
        self.inner.cancel_pending_refresh();
        self.inner.cancel_active();
    }
}

impl<S: NewsSource + 'static> Inner<S> {
    /// Mutate pagination and publish the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut Pagination) -> R) -> R {
        let mut p = lock(&self.pagination);
        let result = f(&mut p);
        self.snapshots
            .send_replace(p.snapshot(self.page_cap));
        result
    }

    fn register(&self, token: &CancelToken) {
        lock(&self.active).push(token.clone());
    }

    fn unregister(&self, token: &CancelToken) {
        lock(&self.active).retain(|t| !t.same_token(token));
    }

    fn cancel_active(&self) {
        let tokens: Vec<_> = lock(&self.active).drain(..).collect();
        if !tokens.is_empty() {
            tracing::debug!(count = tokens.len(), "Cancelling in-flight operations");
        }
        for token in tokens {
            token.cancel();
        }
    }

    fn cancel_pending_refresh(&self) {
        if let Some(pending) = lock(&self.pending_refresh).take() {
            tracing::debug!("Cancelling pending refresh");
            pending.cancel();
        }
    }

    /// Runs `selector` from page 1. A refresh still settling is dropped too.
    async fn first_load(&self, selector: Selector) {
        self.cancel_pending_refresh();
        self.cancel_active();
        let token = CancelToken::new();
        self.register(&token);

        let _op = self.op_lock.lock().await;
        if token.is_cancelled() {
            tracing::debug!(selector = %selector, "First load superseded before it started");
            return;
        }

        lock(&self.pagination).selector = selector;
        let _ = self.load_first_page(&token, "Failed to load news").await;
        self.unregister(&token);
    }

    /// One first-load attempt for the current selector. Caller holds `op_lock`.
    ///
    /// Cancellation returns to `Idle` silently; any other failure moves to
    /// `Error` with `failure_prefix` and the error text.
    async fn load_first_page(
        &self,
        token: &CancelToken,
        failure_prefix: &str,
    ) -> Result<(), FetchError> {
        let selector = self.update(|p| {
            p.begin_first_load();
            p.selector.clone()
        });

        let result = match self.repo.first_load(&selector, token).await {
            Ok(fetched) => self
                .repo
                .fetch_cached(&selector)
                .await
                .map(|cached| (fetched.total_results, cached)),
            Err(e) => Err(e),
        };

        match result {
            Ok((total, cached)) => {
                tracing::info!(selector = %selector, loaded = cached.len(), total = total, "First page loaded");
                self.update(|p| {
                    p.loaded = cached.len();
                    p.total = total;
                    p.articles = Arc::new(cached);
                    p.state = LoadState::Idle;
                });
                Ok(())
            }
            Err(FetchError::Cancelled) => {
                tracing::debug!(selector = %selector, "First load cancelled");
                self.update(|p| p.state = LoadState::Idle);
                Err(FetchError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(selector = %selector, error = %e, "First load failed");
                let message = format!("{}: {}", failure_prefix, e);
                self.update(|p| p.fail(message));
                Err(e)
            }
        }
    }

    async fn load_more(&self) {
        let max_pages = self.page_cap;
        {
            let p = lock(&self.pagination);
            if p.state != LoadState::Idle || !p.has_more_pages(max_pages) {
                return;
            }
        }

        let token = CancelToken::new();
        self.register(&token);
        let _op = self.op_lock.lock().await;

        // Re-check under the operation lock; a first load may have run meanwhile
        let next = self.update(|p| {
            if token.is_cancelled() || p.state != LoadState::Idle || !p.has_more_pages(max_pages)
            {
                return None;
            }
            p.state = LoadState::LoadingMore;
            p.page += 1;
            p.error = None;
            Some((p.selector.clone(), p.page))
        });
        let Some((selector, page)) = next else {
            self.unregister(&token);
            return;
        };

        tracing::debug!(selector = %selector, page = page, "Loading more");

        let delayed = tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.settings.load_more_delay) => true,
        };
        let result = if delayed {
            match self.repo.load_more(&selector, page, &token).await {
                Ok(fetched) if fetched.articles.is_empty() => Ok(None),
                Ok(fetched) => self
                    .repo
                    .fetch_cached(&selector)
                    .await
                    .map(|cached| Some((fetched.total_results, cached))),
                Err(e) => Err(e),
            }
        } else {
            Err(FetchError::Cancelled)
        };

        self.update(|p| {
            match result {
                Ok(Some((total, cached))) => {
                    tracing::info!(selector = %selector, page = page, loaded = cached.len(), total = total, "Page loaded");
                    p.loaded = cached.len();
                    p.total = total;
                    p.articles = Arc::new(cached);
                }
                Ok(None) => {
                    // End of results: no page to advance to, nothing more to offer
                    tracing::debug!(selector = %selector, page = page, "Empty page, end of results");
                    p.page = p.page.saturating_sub(1);
                    p.total = p.loaded;
                }
                Err(FetchError::HttpStatus(status)) if status >= 400 => {
                    tracing::warn!(selector = %selector, page = page, status = status, "Load more rejected by server");
                    p.page = p.page.saturating_sub(1);
                }
                Err(FetchError::Cancelled) => {
                    tracing::debug!(selector = %selector, page = page, "Load more cancelled");
                    p.page = p.page.saturating_sub(1);
                }
                Err(e) => {
                    tracing::warn!(selector = %selector, page = page, error = %e, "Load more failed");
                    p.error = Some(format!("Failed to load more news: {}", e));
                }
            }
            p.state = LoadState::Idle;
        });
        self.unregister(&token);
    }

    async fn force_refresh(&self) {
        self.cancel_active();
        let _op = self.op_lock.lock().await;

        let attempts = self.settings.refresh_attempts.max(1);
        for attempt in 1..=attempts {
            // Unregistered token: past the settle delay nothing cancels a refresh
            match self
                .load_first_page(&CancelToken::new(), "Failed to refresh")
                .await
            {
                Ok(()) => return,
                Err(FetchError::Cancelled) => {
                    tracing::warn!(attempt = attempt, attempts = attempts, "Refresh attempt cancelled");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_backoff).await;
                    }
                }
                Err(_) => return,
            }
        }

        tracing::warn!(attempts = attempts, "Refresh gave up");
        self.update(|p| p.fail(REFRESH_EXHAUSTED.to_string()));
    }

    /// Most recently used selector of the same kind as `fallback`, from the cache.
    async fn last_used(&self, fallback: Selector) -> Selector {
        let last = match &fallback {
            Selector::Search(_) => self
                .repo
                .last_search_keyword()
                .await
                .map(|k| k.map(Selector::Search)),
            Selector::Category(_) => self
                .repo
                .last_category()
                .await
                .map(|c| c.map(Selector::Category)),
        };
        match last {
            Ok(Some(selector)) => selector,
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read last used selector, using default");
                fallback
            }
        }
    }

    /// Publish cached articles for `selector` as the current page set.
    ///
    /// Returns false when the cache has nothing for it. The API total is
    /// unknown offline, so it is taken to be what the cache holds.
    async fn show_cached(&self, selector: &Selector) -> bool {
        let _op = self.op_lock.lock().await;

        let cached = match self.repo.fetch_cached(selector).await {
            Ok(cached) if !cached.is_empty() => cached,
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!(selector = %selector, error = %e, "Could not read cache on restore");
                return false;
            }
        };

        let page_size = self.settings.page_size.max(1) as usize;
        let pages = u32::try_from(cached.len().div_ceil(page_size)).unwrap_or(u32::MAX);
        tracing::info!(selector = %selector, cached = cached.len(), "Restored from cache");

        self.update(|p| {
            p.selector = selector.clone();
            p.state = LoadState::Idle;
            p.page = pages;
            p.loaded = cached.len();
            p.total = cached.len();
            p.articles = Arc::new(cached);
            p.error = None;
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FetchedPage;
    use crate::storage::{Article, ArticleFilter, Database};
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Serves `available` numbered articles per selector, reporting `reported_total`.
    ///
    /// Scripted errors are returned, in order, before falling back to serving pages.
    struct PagedSource {
        reported_total: usize,
        available: usize,
        latency: Duration,
        script: Mutex<VecDeque<FetchError>>,
        calls: Mutex<Vec<(Selector, u32)>>,
    }

    impl PagedSource {
        fn new(total: usize) -> Self {
            Self {
                reported_total: total,
                available: total,
                latency: Duration::ZERO,
                script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_with(self, errors: Vec<FetchError>) -> Self {
            *self.script.lock().unwrap() = errors.into();
            self
        }

        fn slow(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }
    }

    fn slug(selector: &Selector) -> String {
        match selector {
            Selector::Search(k) => format!("search-{}", k),
            Selector::Category(c) => c.as_str().to_string(),
        }
    }

    #[async_trait]
    impl NewsSource for PagedSource {
        async fn fetch_page(
            &self,
            selector: &Selector,
            page: u32,
            page_size: u32,
            cancel: &CancelToken,
        ) -> Result<FetchedPage, FetchError> {
            self.calls.lock().unwrap().push((selector.clone(), page));
            if let Some(err) = self.script.lock().unwrap().pop_front() {
                return Err(err);
            }
            if !self.latency.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(self.latency) => {}
                }
            }

            let size = page_size as usize;
            let start = (page as usize - 1) * size;
            let end = (start + size).min(self.available);
            let articles = (start..end.max(start))
                .map(|i| Article {
                    url: format!("https://news.test/{}/{}", slug(selector), i),
                    title: format!("Story {}", i),
                    description: None,
                    content: None,
                    author: None,
                    source_id: None,
                    source_name: None,
                    image_url: None,
                    published_at: None,
                    tag: None,
                    inserted_at: Utc::now(),
                })
                .collect();
            Ok(FetchedPage {
                articles,
                total_results: self.reported_total,
            })
        }
    }

    fn fast_settings() -> ControllerSettings {
        ControllerSettings {
            load_more_delay: Duration::from_millis(1),
            refresh_settle: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(1),
            ..ControllerSettings::default()
        }
    }

    async fn controller_with(source: PagedSource) -> RefreshController<PagedSource> {
        let db = Database::open(":memory:").await.unwrap();
        controller_on(db, source, fast_settings())
    }

    fn controller_on(
        db: Database,
        source: PagedSource,
        settings: ControllerSettings,
    ) -> RefreshController<PagedSource> {
        RefreshController::new(
            NewsRepository::new(source, db, 20),
            settings,
            Selector::default(),
        )
    }

    fn calls(controller: &RefreshController<PagedSource>) -> Vec<(Selector, u32)> {
        controller.inner.repo.source().calls.lock().unwrap().clone()
    }

    const TECH: Selector = Selector::Category(Category::Technology);

    #[tokio::test]
    async fn test_first_load_populates_snapshot() {
        let controller = controller_with(PagedSource::new(45)).await;
        controller.start_first_load(TECH).await;

        let snap = controller.snapshot();
        assert_eq!(snap.state, LoadState::Idle);
        assert_eq!(snap.selector, TECH);
        assert_eq!(snap.articles.len(), 20);
        assert!(snap.has_more);
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn test_three_pages_exhaust_forty_five_results() {
        let controller = controller_with(PagedSource::new(45)).await;
        controller.start_first_load(TECH).await;
        controller.load_more().await;
        assert_eq!(controller.snapshot().articles.len(), 40);
        controller.load_more().await;

        let snap = controller.snapshot();
        assert_eq!(snap.articles.len(), 45);
        assert!(!snap.has_more);

        // Nothing left: no further request
        controller.load_more().await;
        assert_eq!(calls(&controller).len(), 3);
        assert_eq!(
            calls(&controller).iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_empty_page_ends_pagination() {
        let mut source = PagedSource::new(100);
        source.available = 20;
        let controller = controller_with(source).await;

        controller.start_first_load(TECH).await;
        assert!(controller.has_more_pages());

        controller.load_more().await;
        let snap = controller.snapshot();
        assert_eq!(snap.state, LoadState::Idle);
        assert!(snap.error.is_none());
        assert_eq!(snap.articles.len(), 20);
        assert!(!snap.has_more);
    }

    #[tokio::test]
    async fn test_client_error_on_load_more_is_silent_and_reverts_page() {
        let source = PagedSource::new(45);
        let controller = controller_with(source).await;
        controller.start_first_load(TECH).await;

        controller
            .inner
            .repo
            .source()
            .script
            .lock()
            .unwrap()
            .push_back(FetchError::HttpStatus(426));
        controller.load_more().await;

        let snap = controller.snapshot();
        assert_eq!(snap.state, LoadState::Idle);
        assert!(snap.error.is_none());
        assert_eq!(snap.articles.len(), 20);

        // Page 2 is requested again
        controller.load_more().await;
        assert_eq!(
            calls(&controller).iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![1, 2, 2]
        );
        assert_eq!(controller.snapshot().articles.len(), 40);
    }

    #[tokio::test]
    async fn test_other_load_more_failure_is_surfaced() {
        let controller = controller_with(PagedSource::new(45)).await;
        controller.start_first_load(TECH).await;

        controller
            .inner
            .repo
            .source()
            .script
            .lock()
            .unwrap()
            .push_back(FetchError::Decode("truncated json".into()));
        controller.load_more().await;

        let snap = controller.snapshot();
        assert_eq!(snap.state, LoadState::Idle);
        assert_eq!(
            snap.error.as_deref(),
            Some("Failed to load more news: Unexpected response: truncated json")
        );
        assert_eq!(snap.articles.len(), 20);
    }

    #[tokio::test]
    async fn test_first_load_failure_enters_error_state() {
        let source = PagedSource::new(45).failing_with(vec![FetchError::HttpStatus(500)]);
        let controller = controller_with(source).await;
        controller.start_first_load(TECH).await;

        let snap = controller.snapshot();
        assert_eq!(
            snap.state,
            LoadState::Error("Failed to load news: HTTP error: status 500".into())
        );
        assert!(snap.articles.is_empty());
        assert!(!snap.has_more);

        controller.retry().await;
        assert_eq!(controller.state(), LoadState::Idle);
        assert_eq!(controller.snapshot().articles.len(), 20);
    }

    #[tokio::test]
    async fn test_page_cap_stops_at_ten() {
        let controller = controller_with(PagedSource::new(1000)).await;
        controller.start_first_load(TECH).await;
        for _ in 0..12 {
            controller.load_more().await;
        }

        let snap = controller.snapshot();
        assert_eq!(snap.articles.len(), 200);
        assert!(!snap.has_more);
        assert_eq!(calls(&controller).len(), 10);
        assert_eq!(calls(&controller).last().map(|(_, p)| *p), Some(10));
    }

    #[tokio::test]
    async fn test_page_cap_lowered_to_cache_read_limit() {
        let db = Database::open(":memory:").await.unwrap();
        let settings = ControllerSettings {
            page_size: 100,
            max_pages: 30,
            ..fast_settings()
        };
        let controller = RefreshController::new(
            NewsRepository::new(PagedSource::new(5000), db.clone(), 100),
            settings,
            Selector::default(),
        );

        controller.start_first_load(TECH).await;
        for _ in 0..29 {
            controller.load_more().await;
        }

        let snap = controller.snapshot();
        let stored = db
            .count_articles(&ArticleFilter::Category(Category::Technology))
            .await
            .unwrap();
        assert_eq!(snap.articles.len(), MAX_ARTICLES);
        assert_eq!(stored, MAX_ARTICLES as i64);
        assert_eq!(
            snap.articles.last().map(|a| a.url.as_str()),
            Some("https://news.test/technology/1999")
        );
        assert!(!snap.has_more);
        assert_eq!(calls(&controller).last().map(|(_, p)| *p), Some(20));
    }

    #[tokio::test]
    async fn test_should_trigger_load_more_near_end() {
        let controller = controller_with(PagedSource::new(45)).await;
        assert!(!controller.should_trigger_load_more(0));

        controller.start_first_load(TECH).await;
        assert!(!controller.should_trigger_load_more(5));
        assert!(!controller.should_trigger_load_more(16));
        assert!(controller.should_trigger_load_more(17));
        assert!(controller.should_trigger_load_more(19));
    }

    #[tokio::test]
    async fn test_refresh_retries_cancelled_attempts() {
        let source = PagedSource::new(45)
            .failing_with(vec![FetchError::Cancelled, FetchError::Cancelled]);
        let controller = controller_with(source).await;

        controller.refresh().await.unwrap();

        let snap = controller.snapshot();
        assert_eq!(snap.state, LoadState::Idle);
        assert_eq!(snap.articles.len(), 20);
        assert_eq!(calls(&controller).len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_gives_up_after_three_cancellations() {
        let source = PagedSource::new(45).failing_with(vec![
            FetchError::Cancelled,
            FetchError::Cancelled,
            FetchError::Cancelled,
        ]);
        let controller = controller_with(source).await;

        controller.refresh().await.unwrap();

        assert_eq!(
            controller.state(),
            LoadState::Error(REFRESH_EXHAUSTED.into())
        );
        assert_eq!(calls(&controller).len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_fails_fast_on_other_errors() {
        let source = PagedSource::new(45).failing_with(vec![FetchError::HttpStatus(500)]);
        let controller = controller_with(source).await;

        controller.refresh().await.unwrap();

        assert_eq!(
            controller.state(),
            LoadState::Error("Failed to refresh: HTTP error: status 500".into())
        );
        assert_eq!(calls(&controller).len(), 1);
    }

    #[tokio::test]
    async fn test_second_refresh_replaces_pending_one() {
        let controller = controller_with(PagedSource::new(45)).await;

        let first = controller.refresh();
        let second = controller.refresh();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(calls(&controller).len(), 1);
        assert_eq!(controller.snapshot().articles.len(), 20);
    }

    #[tokio::test]
    async fn test_cleanup_cancels_pending_refresh() {
        let controller = controller_with(PagedSource::new(45)).await;
        let handle = controller.refresh();
        controller.cleanup();
        handle.await.unwrap();

        assert!(calls(&controller).is_empty());
        assert_eq!(controller.state(), LoadState::Idle);
    }

    #[tokio::test]
    async fn test_selector_switch_drops_settling_refresh() {
        let db = Database::open(":memory:").await.unwrap();
        let settings = ControllerSettings {
            refresh_settle: Duration::from_millis(300),
            ..fast_settings()
        };
        let controller = controller_on(db, PagedSource::new(45), settings);

        let handle = controller.refresh();
        controller.select_category(Category::Sports).await;
        handle.await.unwrap();

        assert_eq!(
            calls(&controller),
            vec![(Selector::Category(Category::Sports), 1)]
        );
        let snap = controller.snapshot();
        assert_eq!(snap.state, LoadState::Idle);
        assert_eq!(snap.articles.len(), 20);
    }

    #[tokio::test]
    async fn test_selector_switch_cancels_in_flight_load() {
        let source = PagedSource::new(45).slow(Duration::from_millis(300));
        let controller = controller_with(source).await;

        let first = controller.clone();
        let handle = tokio::spawn(async move {
            first
                .select_category(Category::Sports)
                .await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.select_category(Category::Health).await;
        handle.await.unwrap();

        let snap = controller.snapshot();
        assert_eq!(snap.selector, Selector::Category(Category::Health));
        assert_eq!(snap.state, LoadState::Idle);
        assert_eq!(snap.articles.len(), 20);
        assert!(snap
            .articles
            .iter()
            .all(|a| a.url.starts_with("https://news.test/health/")));
    }

    #[tokio::test]
    async fn test_start_first_load_ignored_while_loading() {
        let source = PagedSource::new(45).slow(Duration::from_millis(200));
        let controller = controller_with(source).await;
        let mut rx = controller.subscribe();

        let first = controller.clone();
        let handle = tokio::spawn(async move { first.start_first_load(TECH).await });
        rx.wait_for(|s| s.state == LoadState::LoadingFirst)
            .await
            .unwrap();

        controller
            .start_first_load(Selector::Category(Category::Science))
            .await;
        handle.await.unwrap();

        assert_eq!(calls(&controller), vec![(TECH, 1)]);
        assert_eq!(controller.selector(), TECH);
        assert_eq!(controller.state(), LoadState::Idle);
    }

    #[tokio::test]
    async fn test_cleanup_cancels_load_more_and_reverts_page() {
        let db = Database::open(":memory:").await.unwrap();
        let settings = ControllerSettings {
            load_more_delay: Duration::from_millis(300),
            ..fast_settings()
        };
        let controller = controller_on(db, PagedSource::new(45), settings);
        controller.start_first_load(TECH).await;

        let mut rx = controller.subscribe();
        let background = controller.clone();
        let handle = tokio::spawn(async move {
            background.load_more().await;
        });
        rx.wait_for(|s| s.state == LoadState::LoadingMore)
            .await
            .unwrap();
        controller.cleanup();
        handle.await.unwrap();

        // Cancelled inside the politeness delay: no request went out
        let snap = controller.snapshot();
        assert_eq!(snap.state, LoadState::Idle);
        assert!(snap.error.is_none());
        assert!(snap.has_more);
        assert_eq!(calls(&controller).len(), 1);

        controller.load_more().await;
        assert_eq!(calls(&controller).last().map(|(_, p)| *p), Some(2));
        assert_eq!(controller.snapshot().articles.len(), 40);
    }

    #[tokio::test]
    async fn test_search_ignores_blank_and_repeats() {
        let controller = controller_with(PagedSource::new(5)).await;
        controller.search("   ").await;
        assert!(calls(&controller).is_empty());

        controller.search(" climate ").await;
        assert_eq!(
            controller.selector(),
            Selector::Search("climate".to_string())
        );
        controller.search("climate").await;
        assert_eq!(calls(&controller).len(), 1);
        assert_eq!(controller.snapshot().articles.len(), 5);
        assert!(!controller.has_more_pages());
    }

    #[tokio::test]
    async fn test_restore_shows_cache_without_network() {
        let db = Database::open(":memory:").await.unwrap();
        let warm = controller_on(db.clone(), PagedSource::new(45), fast_settings());
        warm.start_first_load(TECH).await;
        warm.load_more().await;

        let cold = controller_on(db, PagedSource::new(45), fast_settings());
        cold.restore(Selector::default()).await;

        let snap = cold.snapshot();
        assert_eq!(snap.selector, TECH);
        assert_eq!(snap.articles.len(), 40);
        assert!(!snap.has_more);
        assert!(calls(&cold).is_empty());
    }

    #[tokio::test]
    async fn test_restore_with_empty_cache_loads_fallback() {
        let controller = controller_with(PagedSource::new(45)).await;
        controller
            .restore(Selector::Search("ukraine".into()))
            .await;

        assert_eq!(
            calls(&controller),
            vec![(Selector::Search("ukraine".into()), 1)]
        );
        assert_eq!(controller.snapshot().articles.len(), 20);
    }

    #[tokio::test]
    async fn test_subscribers_see_loading_then_idle() {
        let source = PagedSource::new(45).slow(Duration::from_millis(50));
        let controller = controller_with(source).await;
        let mut rx = controller.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let recorder = Arc::clone(&seen);
        let watcher = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let (state, loaded) = {
                    let snap = rx.borrow_and_update();
                    (snap.state.clone(), snap.articles.len())
                };
                recorder.lock().unwrap().push(state.clone());
                if state == LoadState::Idle && loaded > 0 {
                    break;
                }
            }
        });

        controller.start_first_load(TECH).await;
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&LoadState::LoadingFirst));
        assert_eq!(seen.last(), Some(&LoadState::Idle));
    }
}
