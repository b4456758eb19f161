//! REST client
//!
//! `GET {endpoint}/v1/regions/{region}/{resource}?parent=..&pageToken=..`
//! returning `{ "items": [...], "nextPageToken": "..." }`.

use super::http::HttpClient;
use super::{ListRequest, Page, RemoteApi};
use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

/// REST implementation of [`RemoteApi`]
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    pub http: HttpClient,
    endpoint: Url,
    token: Option<String>,
}

impl HttpApiClient {
    /// Create a new client for `endpoint`
    pub fn new(endpoint: &str, token: Option<String>) -> anyhow::Result<Self> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid endpoint {}: {}", endpoint, e))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let http = HttpClient::new()?;
        Ok(Self {
            http,
            endpoint,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Build the list URL for one page
    pub fn list_url(&self, request: &ListRequest, page_token: Option<&str>) -> String {
        let relative = format!(
            "v1/regions/{}/{}",
            urlencoding::encode(&request.region),
            urlencoding::encode(&request.resource)
        );
        let mut url = match self.endpoint.join(&relative) {
            Ok(url) => url,
            Err(_) => self.endpoint.clone(),
        };

        {
            let mut query = url.query_pairs_mut();
            if let Some(parent) = &request.parent {
                query.append_pair("parent", parent);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        let mut url = url.to_string();
        if url.ends_with('?') {
            url.pop();
        }
        url
    }
}

/// Split a list response into items and the continuation token
pub fn parse_page(response: Value) -> Result<Page, ApiError> {
    let Value::Object(mut map) = response else {
        return Err(ApiError::Decode("expected a JSON object".to_string()));
    };

    let items = match map.remove("items") {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(ApiError::Decode("`items` is not an array".to_string())),
    };

    let next_token = map
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(Page { items, next_token })
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    async fn list(&self, request: &ListRequest, page_token: Option<&str>) -> Result<Page, ApiError> {
        let url = self.list_url(request, page_token);
        let response = self.http.get(&url, self.token.as_deref()).await?;
        parse_page(response)
    }
}
