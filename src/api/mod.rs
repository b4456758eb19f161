//! Remote API layer
//!
//! The engine only needs one capability from the remote side: list a
//! resource kind in a region, one page at a time.
//!
//! # Module Structure
//!
//! - [`http`] - HTTP utilities for REST calls
//! - [`client`] - [`HttpApiClient`], the REST implementation of [`RemoteApi`]
//! - [`cached`] - [`CachedApi`], pagination plus memoization over any [`RemoteApi`]

pub mod cached;
pub mod client;
pub mod http;

pub use cached::{CacheKey, CachedApi, ListCache};
pub use client::HttpApiClient;

use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;

/// One list call: a resource kind in a region, optionally scoped to a parent
/// resource (e.g. the images of one repository).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListRequest {
    pub region: String,
    pub resource: String,
    pub parent: Option<String>,
}

impl ListRequest {
    pub fn new(region: &str, resource: &str) -> Self {
        Self {
            region: region.to_string(),
            resource: resource.to_string(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }
}

/// Result of one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Absent on the final page
    pub next_token: Option<String>,
}

/// Paginated list capability of the remote API
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list(&self, request: &ListRequest, page_token: Option<&str>) -> Result<Page, ApiError>;
}
