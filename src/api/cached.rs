//! Cached, auto-paginating list calls
//!
//! Every module fetches through [`CachedApi::list_all`], which follows
//! pagination tokens to the last page and memoizes the concatenated items
//! per `(account, region, resource, operation)`.

use super::{ListRequest, RemoteApi};
use crate::engine::cache::Memo;
use crate::error::ApiError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identity of one expensive call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub account: String,
    pub region: String,
    /// Parent resource the call is scoped to, empty for region-wide lists
    pub resource: String,
    pub operation: String,
}

impl CacheKey {
    pub fn for_request(account: &str, request: &ListRequest) -> Self {
        Self {
            account: account.to_string(),
            region: request.region.clone(),
            resource: request.parent.clone().unwrap_or_default(),
            operation: format!("list:{}", request.resource),
        }
    }
}

/// Process-wide memo of list results
pub type ListCache = Memo<CacheKey, Arc<Vec<Value>>, ApiError>;

/// Fetch every page of `request`, applying `call_timeout` to each page
pub async fn fetch_all_pages(
    api: &dyn RemoteApi,
    request: &ListRequest,
    call_timeout: Option<Duration>,
) -> Result<Vec<Value>, ApiError> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let call = api.list(request, page_token.as_deref());
        let page = match call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ApiError::Timeout(limit))??,
            None => call.await?,
        };
        all_items.extend(page.items);

        match page.next_token {
            None => break,
            Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                return Err(ApiError::Decode(format!(
                    "pagination token {} repeated for {}",
                    next, request.resource
                )));
            }
            Some(next) => page_token = Some(next),
        }
    }

    tracing::debug!(
        "Fetched {} {} in {}",
        all_items.len(),
        request.resource,
        request.region
    );
    Ok(all_items)
}

/// [`RemoteApi`] bound to an account, a shared cache and the run's
/// cancellation token
#[derive(Clone)]
pub struct CachedApi {
    api: Arc<dyn RemoteApi>,
    cache: Arc<ListCache>,
    account: String,
    call_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CachedApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedApi")
            .field("account", &self.account)
            .field("call_timeout", &self.call_timeout)
            .field("cache", &self.cache)
            .finish()
    }
}

impl CachedApi {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        cache: Arc<ListCache>,
        account: &str,
        call_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            cache,
            account: account.to_string(),
            call_timeout,
            cancel,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn cache(&self) -> &Arc<ListCache> {
        &self.cache
    }

    /// All items of `request`, from the cache when this exact call was
    /// already made during the run
    pub async fn list_all(&self, request: &ListRequest) -> Result<Arc<Vec<Value>>, ApiError> {
        let key = CacheKey::for_request(&self.account, request);
        let api = self.api.as_ref();
        let call_timeout = self.call_timeout;

        self.cache
            .get_or_fetch(key, &self.cancel, || async move {
                fetch_all_pages(api, request, call_timeout)
                    .await
                    .map(Arc::new)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Page;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `pages` pages of two items each and counts calls
    struct Paged {
        pages: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteApi for Paged {
        async fn list(&self, request: &ListRequest, token: Option<&str>) -> Result<Page, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let items = vec![
                json!({"page": index, "region": request.region}),
                json!({"page": index, "region": request.region}),
            ];
            let next_token = (index + 1 < self.pages).then(|| (index + 1).to_string());
            Ok(Page { items, next_token })
        }
    }

    struct Stuck;

    #[async_trait]
    impl RemoteApi for Stuck {
        async fn list(&self, _request: &ListRequest, _token: Option<&str>) -> Result<Page, ApiError> {
            std::future::pending().await
        }
    }

    struct Looping;

    #[async_trait]
    impl RemoteApi for Looping {
        async fn list(&self, _request: &ListRequest, _token: Option<&str>) -> Result<Page, ApiError> {
            Ok(Page {
                items: vec![json!(1)],
                next_token: Some("same".to_string()),
            })
        }
    }

    fn cached(api: Arc<dyn RemoteApi>, timeout: Option<Duration>) -> CachedApi {
        CachedApi::new(
            api,
            Arc::new(ListCache::new()),
            "123456789012",
            timeout,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_follows_pagination_until_token_absent() {
        let api = Arc::new(Paged {
            pages: 3,
            calls: AtomicUsize::new(0),
        });
        let client = cached(api.clone(), None);

        let items = client
            .list_all(&ListRequest::new("us-east-1", "repositories"))
            .await
            .unwrap();
        assert_eq!(items.len(), 6);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_repeat_calls_hit_cache() {
        let api = Arc::new(Paged {
            pages: 2,
            calls: AtomicUsize::new(0),
        });
        let client = cached(api.clone(), None);
        let request = ListRequest::new("us-east-1", "images").with_parent("web");

        let first = client.list_all(&request).await.unwrap();
        let second = client.list_all(&request).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);

        // Same resource, other parent: new key.
        client
            .list_all(&ListRequest::new("us-east-1", "images").with_parent("api"))
            .await
            .unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 4);
        assert_eq!(client.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_call_deadline() {
        let client = cached(Arc::new(Stuck), Some(Duration::from_millis(10)));
        let err = client
            .list_all(&ListRequest::new("us-east-1", "repositories"))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Timeout(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_repeated_token_is_an_error() {
        let client = cached(Arc::new(Looping), None);
        let err = client
            .list_all(&ListRequest::new("us-east-1", "zones"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_cache_key_shape() {
        let key = CacheKey::for_request(
            "acct",
            &ListRequest::new("eu-west-1", "images").with_parent("web"),
        );
        assert_eq!(key.account, "acct");
        assert_eq!(key.region, "eu-west-1");
        assert_eq!(key.resource, "web");
        assert_eq!(key.operation, "list:images");
    }
}
