//! Run-scoped context
//!
//! Everything a scan shares across modules lives here and is passed
//! explicitly: the cached API, the availability provider, the engine
//! settings and the cancellation token. Two contexts never share state
//! unless they were given the same cache.

use super::availability::ServiceAvailability;
use crate::api::{CachedApi, ListCache, RemoteApi};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Maximum number of fetch phases in flight
    pub concurrency: usize,
    /// Capacity of the record channel between workers and the aggregator
    pub channel_capacity: usize,
    pub progress_interval: Duration,
    /// Suppress the progress line
    pub quiet: bool,
    /// Deadline applied to each remote call; `None` waits forever
    pub call_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            channel_capacity: 64,
            progress_interval: Duration::from_millis(250),
            quiet: false,
            call_timeout: None,
        }
    }
}

/// Shared state for one scan
#[derive(Clone)]
pub struct RunContext {
    pub api: CachedApi,
    pub availability: Arc<dyn ServiceAvailability>,
    pub settings: EngineSettings,
    /// Tags every log line of this scan
    pub run_id: Uuid,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("api", &self.api)
            .field("run_id", &self.run_id)
            .field("settings", &self.settings)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunContext {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        cache: Arc<ListCache>,
        availability: Arc<dyn ServiceAvailability>,
        account: &str,
        settings: EngineSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let api = CachedApi::new(api, cache, account, settings.call_timeout, cancel.clone());
        Self {
            api,
            availability,
            settings,
            run_id: Uuid::new_v4(),
            cancel,
        }
    }

    pub fn account(&self) -> &str {
        self.api.account()
    }

    /// Token that aborts every outstanding remote call of this run
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the scan once `limit` has elapsed
    pub fn cancel_after(&self, limit: Duration) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!("Scan deadline of {:?} reached, cancelling outstanding calls", limit);
                    cancel.cancel();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ListRequest, Page};
    use crate::engine::availability::StaticServiceMap;
    use crate::error::ApiError;
    use async_trait::async_trait;

    struct Empty;

    #[async_trait]
    impl RemoteApi for Empty {
        async fn list(&self, _request: &ListRequest, _token: Option<&str>) -> Result<Page, ApiError> {
            Ok(Page::default())
        }
    }

    fn context() -> RunContext {
        RunContext::new(
            Arc::new(Empty),
            Arc::new(ListCache::new()),
            Arc::new(StaticServiceMap::default()),
            "acct",
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_cancel_after_cancels() {
        let ctx = context();
        ctx.cancel_after(Duration::from_millis(10)).await.unwrap();
        assert!(ctx.cancel_token().is_cancelled());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = context();
        let b = context();
        assert_ne!(a.run_id, b.run_id);
        a.cancel_token().cancel();
        assert!(!b.cancel_token().is_cancelled());
        assert_eq!(a.account(), "acct");
    }
}
