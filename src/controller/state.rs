use std::sync::Arc;
use std::time::Duration;

use crate::api::Selector;
use crate::storage::Article;

// ============================================================================
// Settings
// ============================================================================

/// Pagination and timing knobs for a [`super::RefreshController`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub page_size: u32,
    /// No page past this number is ever requested
    pub max_pages: u32,
    /// Politeness pause before each load-more request
    pub load_more_delay: Duration,
    /// Pull-to-refresh waits this long so a repeated pull replaces the first
    pub refresh_settle: Duration,
    pub retry_backoff: Duration,
    pub refresh_attempts: u32,
    /// Trigger a load-more when the visible index is this close to the end
    pub read_ahead: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 10,
            load_more_delay: Duration::from_millis(500),
            refresh_settle: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(500),
            refresh_attempts: 3,
            read_ahead: 3,
        }
    }
}

// ============================================================================
// Observable State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    LoadingFirst,
    LoadingMore,
    Error(String),
}

/// Point-in-time view of a controller, published on every state change.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub selector: Selector,
    pub state: LoadState,
    /// Cached articles for the selector, oldest insertion first
    pub articles: Arc<Vec<Article>>,
    pub has_more: bool,
    /// Last surfaced failure; cleared when the next operation starts
    pub error: Option<String>,
}

/// Mutable pagination bookkeeping behind the controller's lock.
#[derive(Debug, Default)]
pub(super) struct Pagination {
    pub selector: Selector,
    pub state: LoadState,
    /// Last page requested (1-based); 0 before the first load
    pub page: u32,
    pub loaded: usize,
    /// Total reported by the API
    pub total: usize,
    pub articles: Arc<Vec<Article>>,
    pub error: Option<String>,
}

impl Pagination {
    pub fn has_more_pages(&self, max_pages: u32) -> bool {
        self.loaded > 0
            && self.loaded < self.total
            && self.page < max_pages
            && self.state != LoadState::LoadingMore
    }

    pub fn snapshot(&self, max_pages: u32) -> Snapshot {
        Snapshot {
            selector: self.selector.clone(),
            state: self.state.clone(),
            articles: Arc::clone(&self.articles),
            has_more: self.has_more_pages(max_pages),
            error: self.error.clone(),
        }
    }

    /// Reset counters for a first load of the current selector.
    pub fn begin_first_load(&mut self) {
        self.state = LoadState::LoadingFirst;
        self.page = 1;
        self.loaded = 0;
        self.total = 0;
        self.articles = Arc::new(Vec::new());
        self.error = None;
    }

    pub fn fail(&mut self, message: String) {
        self.state = LoadState::Error(message.clone());
        self.error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pagination(page: u32, loaded: usize, total: usize) -> Pagination {
        Pagination {
            page,
            loaded,
            total,
            ..Pagination::default()
        }
    }

    #[test]
    fn test_has_more_requires_loaded_below_total() {
        assert!(pagination(1, 20, 45).has_more_pages(10));
        assert!(!pagination(3, 45, 45).has_more_pages(10));
        assert!(!pagination(1, 0, 45).has_more_pages(10));
    }

    #[test]
    fn test_has_more_respects_page_cap() {
        assert!(pagination(9, 180, 1000).has_more_pages(10));
        assert!(!pagination(10, 200, 1000).has_more_pages(10));
    }

    #[test]
    fn test_no_more_while_loading_more() {
        let mut p = pagination(1, 20, 45);
        p.state = LoadState::LoadingMore;
        assert!(!p.has_more_pages(10));
    }

    #[test]
    fn test_begin_first_load_resets_counters() {
        let mut p = pagination(4, 80, 100);
        p.error = Some("old".into());
        p.begin_first_load();
        assert_eq!(p.page, 1);
        assert_eq!(p.loaded, 0);
        assert_eq!(p.state, LoadState::LoadingFirst);
        assert!(p.error.is_none());
    }

    #[test]
    fn test_fail_surfaces_message() {
        let mut p = Pagination::default();
        p.fail("boom".into());
        let snap = p.snapshot(10);
        assert_eq!(snap.state, LoadState::Error("boom".into()));
        assert_eq!(snap.error.as_deref(), Some("boom"));
    }
}
