//! Cooperative cancellation for fetch and cache operations.
//!
//! A [`CancelToken`] is handed down from the controller through the
//! repository into the fetch client. Every suspension point (request send,
//! body read, politeness delay) races against [`CancelToken::cancelled`], so
//! an abandoned operation unwinds with [`crate::api::FetchError::Cancelled`]
//! instead of finishing in the background.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Signal cancellation to every clone. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// True when both handles are clones of the same token.
    pub fn same_token(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so wait_for cannot observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
