//! HTTP query client for the search backends
//!
//! Issues parameterized GET requests against a configured base URL and returns
//! one decoded JSON payload or a [`QueryError`]. The network itself sits behind
//! the [`SearchTransport`] trait so the pipeline can be driven by canned
//! responses in tests.

use crate::error::{QueryError, QueryResult};
use crate::query::Query;
use async_trait::async_trait;
use outbreak_common::time::CacheBucket;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("outbreak-data/", env!("CARGO_PKG_VERSION"));

/// Upper bound on scroll continuations for one `fetch_all` query
const MAX_SCROLL_PAGES: usize = 1000;

/// One GET request returning decoded JSON
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn get_json(&self, url: &str, params: &[(String, String)]) -> QueryResult<Value>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> QueryResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl SearchTransport for HttpTransport {
    async fn get_json(&self, url: &str, params: &[(String, String)]) -> QueryResult<Value> {
        // Content-Type on a bodiless GET: the backends have always been sent it
        let response = self
            .http_client
            .get(url)
            .header(header::CONTENT_TYPE, "application/json")
            .query(params)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| QueryError::Decode(e.to_string()))
    }
}

/// Ordered query-string parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.pairs.push((key.into(), value.to_string()));
        self
    }

    /// Add `key=value` only when a value is present
    pub fn param_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn q(self, query: &Query) -> Self {
        self.param("q", query)
    }

    pub fn fields(self, fields: &[&str]) -> Self {
        self.param("fields", fields.join(","))
    }

    pub fn sort(self, sort: &str) -> Self {
        self.param("sort", sort)
    }

    pub fn size(self, size: usize) -> Self {
        self.param("size", size)
    }

    /// Result offset (`from=`)
    pub fn offset(self, offset: usize) -> Self {
        self.param("from", offset)
    }

    /// Cache-busting `timestamp` for the current bucket
    pub fn timestamp(self, bucket: CacheBucket) -> Self {
        self.param("timestamp", bucket.current())
    }

    /// Append every pair of another parameter set
    pub fn extend(mut self, other: &QueryParams) -> Self {
        self.pairs.extend(other.pairs.iter().cloned());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Look up a JSON pointer (`/results`, `/data/hits`) or fail with a shape error
pub fn pluck<'a>(value: &'a Value, pointer: &str) -> QueryResult<&'a Value> {
    if pointer.is_empty() {
        return Ok(value);
    }
    value
        .pointer(pointer)
        .ok_or_else(|| QueryError::Shape(format!("response has no `{}`", pointer)))
}

/// Query client bound to one backend base URL
#[derive(Clone)]
pub struct QueryClient {
    base_url: String,
    transport: Arc<dyn SearchTransport>,
}

impl QueryClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn SearchTransport>) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path (absolute `http(s)://` paths pass through)
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Issue one GET and return the decoded payload
    pub async fn query(&self, path: &str, params: &QueryParams) -> QueryResult<Value> {
        let url = self.url(path);
        debug!(url = %url, params = ?params.pairs(), "Querying search API");
        self.transport.get_json(&url, params.pairs()).await
    }

    /// Issue one GET, pluck `pointer` and deserialize it
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &QueryParams,
        pointer: &str,
    ) -> QueryResult<T> {
        let payload = self.query(path, params).await?;
        let value = pluck(&payload, pointer)?;
        T::deserialize(value).map_err(|e| QueryError::Decode(e.to_string()))
    }

    /// Fetch every hit of a `query` search by following scroll continuations
    pub async fn query_all(&self, params: &QueryParams) -> QueryResult<Vec<Value>> {
        let first = params.clone().param("fetch_all", "true");
        let mut page = self.query("query", &first).await?;
        let mut hits = match pluck(&page, "/hits")? {
            Value::Array(items) => items.clone(),
            _ => return Err(QueryError::Shape("`hits` is not an array".to_string())),
        };

        for _ in 0..MAX_SCROLL_PAGES {
            let scroll_id = match page.get("_scroll_id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => break,
            };
            let next = QueryParams::new()
                .param("scroll_id", scroll_id)
                .param("fetch_all", "true");
            page = self.query("query", &next).await?;

            if page.get("success").and_then(Value::as_bool) == Some(false) {
                break;
            }
            match page.get("hits").and_then(Value::as_array) {
                Some(items) if !items.is_empty() => hits.extend(items.iter().cloned()),
                _ => break,
            }
        }

        debug!(count = hits.len(), "Fetched all hits");
        Ok(hits)
    }
}
