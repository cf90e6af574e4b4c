//! Last-write-wins debouncing for usage recalculation.
//!
//! Each `enqueue` bumps a shared token and spawns a delayed task holding the
//! new value. When the delay expires the task runs its action only if no later
//! `enqueue` has bumped the token since. A burst of triggers therefore runs the
//! action once, `delay` after the last trigger.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Coalesces bursts of recalculation requests.
#[derive(Debug, Clone)]
pub struct CacheRecalculationDebouncer {
    token: Arc<AtomicU64>,
    runtime: Handle,
}

impl CacheRecalculationDebouncer {
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            token: Arc::new(AtomicU64::new(0)),
            runtime,
        }
    }

    /// Schedule `action` to run on the blocking pool after `delay`, superseding
    /// any pending request.
    ///
    /// The handle resolves to `true` if this request's action ran.
    pub fn enqueue<F>(&self, delay: Duration, action: F) -> JoinHandle<bool>
    where
        F: FnOnce() + Send + 'static,
    {
        let mine = self.token.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let token = Arc::clone(&self.token);

        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            if token.load(Ordering::SeqCst) != mine {
                tracing::trace!(token = mine, "Debounced request superseded");
                return false;
            }

            match tokio::task::spawn_blocking(action).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Debounced action failed");
                    false
                }
            }
        })
    }

    /// Drop whatever is pending without running it.
    pub fn cancel_pending(&self) {
        self.token.fetch_add(1, Ordering::SeqCst);
    }
}
