//! Canned-response transport
//!
//! Routes match on the URL suffix plus any number of `param contains text`
//! conditions. The first matching route wins, so register specific routes
//! before general ones.

use async_trait::async_trait;
use outbreak_data::{QueryError, QueryResult, SearchTransport};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

/// One request seen by the transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
enum Reply {
    Json(Value),
    Error(QueryError),
}

struct Route {
    suffix: String,
    conditions: Vec<(String, String)>,
    delay: Option<Duration>,
    reply: Reply,
}

impl Route {
    fn matches(&self, url: &str, params: &[(String, String)]) -> bool {
        url.ends_with(&self.suffix)
            && self.conditions.iter().all(|(key, needle)| {
                params
                    .iter()
                    .any(|(k, v)| k == key && v.contains(needle.as_str()))
            })
    }
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a route for URLs ending in `suffix`
    pub fn route(&self, suffix: &str) -> RouteBuilder<'_> {
        RouteBuilder {
            transport: self,
            suffix: suffix.to_string(),
            conditions: Vec::new(),
            delay: None,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL ends in `suffix`
    pub fn requests_to(&self, suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with(suffix))
            .collect()
    }
}

#[async_trait]
impl SearchTransport for MockTransport {
    async fn get_json(&self, url: &str, params: &[(String, String)]) -> QueryResult<Value> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            params: params.to_vec(),
        });

        let found = {
            let routes = self.routes.lock().unwrap();
            routes
                .iter()
                .find(|route| route.matches(url, params))
                .map(|route| (route.delay, route.reply.clone()))
        };

        let (delay, reply) = match found {
            Some(found) => found,
            None => {
                return Err(QueryError::Status {
                    status: 404,
                    body: format!("no route for {}", url),
                })
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Json(value) => Ok(value),
            Reply::Error(e) => Err(e),
        }
    }
}

pub struct RouteBuilder<'a> {
    transport: &'a MockTransport,
    suffix: String,
    conditions: Vec<(String, String)>,
    delay: Option<Duration>,
}

impl RouteBuilder<'_> {
    /// Require parameter `key` to contain `needle`
    pub fn when(mut self, key: &str, needle: &str) -> Self {
        self.conditions.push((key.to_string(), needle.to_string()));
        self
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn reply(self, value: Value) {
        self.install(Reply::Json(value));
    }

    pub fn fail(self, error: QueryError) {
        self.install(Reply::Error(error));
    }

    fn install(self, reply: Reply) {
        self.transport.routes.lock().unwrap().push(Route {
            suffix: self.suffix,
            conditions: self.conditions,
            delay: self.delay,
            reply,
        });
    }
}
