//! External task source.
//!
//! [`TaskSource`] is the read-only seam the sync engine depends on;
//! [`NotionClient`] implements it against the Notion database query API:
//! - `POST /v1/databases/{id}/query` returns one page of rows
//! - only the first page is read; `has_more` marks the snapshot truncated

pub mod schema;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Notion API base URL
pub const NOTION_API_BASE: &str = "https://api.notion.com";

/// API version header value
pub const NOTION_VERSION: &str = "2022-06-28";

/// Largest page the query endpoint returns.
const PAGE_SIZE: u32 = 100;

/// Errors that can occur while reading the external source.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Key is invalid or the integration has no access (401/403)
    #[error("Notion rejected the integration key: HTTP {0}")]
    Unauthorized(u16),

    /// Rate limit hit (429)
    #[error("Notion rate limit exceeded")]
    RateLimited,

    /// The request did not complete within the configured timeout
    #[error("Notion request timed out")]
    Timeout,

    /// Network or other HTTP error
    #[error("Notion request failed: {0}")]
    Http(String),

    /// Failed to parse response
    #[error("Failed to parse Notion response: {0}")]
    Parse(String),
}

impl FetchError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(e.to_string())
        }
    }
}

/// One external row, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTask {
    /// Page identity; becomes the task's `external_id`
    pub id: String,
    /// Plain text of the first title fragment, if any
    pub title: Option<String>,
    /// Status label, if any
    pub status: Option<String>,
    /// Priority label, if any
    pub priority: Option<String>,
}

/// The full external task set as read in one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub tasks: Vec<ExternalTask>,
    /// More rows exist beyond the page that was read
    pub truncated: bool,
}

/// Read-only access to the external task list.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch the current task set.
    async fn fetch_tasks(&self) -> Result<SourceSnapshot, FetchError>;

    /// Where tasks come from (for logs).
    fn describe(&self) -> String;
}

/// Names of the database properties deckhand reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyNames {
    pub title: String,
    pub status: String,
    pub priority: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            title: "Name".to_string(),
            status: "Status".to_string(),
            priority: "Priority".to_string(),
        }
    }
}

/// Client for one Notion database.
#[derive(Clone)]
pub struct NotionClient {
    client: Client,
    api_base: String,
    api_key: String,
    database_id: String,
    properties: PropertyNames,
}

impl NotionClient {
    /// Create a client with a per-request timeout.
    pub fn new(
        api_key: impl Into<String>,
        database_id: impl Into<String>,
        properties: PropertyNames,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: NOTION_API_BASE.to_string(),
            api_key: api_key.into(),
            database_id: database_id.into(),
            properties,
        })
    }

    /// Point the client at a different API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn query_url(&self) -> String {
        format!(
            "{}/v1/databases/{}/query",
            self.api_base, self.database_id
        )
    }
}

#[async_trait]
impl TaskSource for NotionClient {
    async fn fetch_tasks(&self) -> Result<SourceSnapshot, FetchError> {
        let response = self
            .client
            .post(self.query_url())
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .json(&serde_json::json!({ "page_size": PAGE_SIZE }))
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(FetchError::from_reqwest)?;

        match status {
            s if s.is_success() => schema::parse_query_response(&body, &self.properties),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FetchError::Unauthorized(status.as_u16()))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
            s => Err(FetchError::Http(format!("HTTP {}: {}", s.as_u16(), body))),
        }
    }

    fn describe(&self) -> String {
        format!("notion database {}", self.database_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::HeaderMap, routing::post};

    /// Serve a canned query response on an ephemeral port.
    async fn spawn_notion(status: u16, body: &'static str) -> String {
        let app = Router::new().route(
            "/v1/databases/:id/query",
            post(move |headers: HeaderMap| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer secret");
                let versioned = headers
                    .get("notion-version")
                    .and_then(|v| v.to_str().ok())
                    == Some(NOTION_VERSION);
                if !authorized || !versioned {
                    return (axum::http::StatusCode::UNAUTHORIZED, "{}".to_string());
                }
                (
                    axum::http::StatusCode::from_u16(status).unwrap(),
                    body.to_string(),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str, key: &str) -> NotionClient {
        NotionClient::new(key, "db1", PropertyNames::default(), Duration::from_secs(5))
            .unwrap()
            .with_api_base(base)
    }

    #[tokio::test]
    async fn test_fetch_tasks_parses_results() {
        let base = spawn_notion(
            200,
            r#"{"results": [{"id": "a", "properties": {
                "Name": {"type": "title", "title": [{"plain_text": "Write spec"}]},
                "Status": {"type": "select", "select": {"name": "In Progress"}}
            }}], "has_more": false}"#,
        )
        .await;

        let snapshot = client(&base, "secret").fetch_tasks().await.unwrap();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].title.as_deref(), Some("Write spec"));
        assert!(!snapshot.truncated);
    }

    #[tokio::test]
    async fn test_bad_key_is_unauthorized() {
        let base = spawn_notion(200, r#"{"results": []}"#).await;
        let result = client(&base, "wrong").fetch_tasks().await;
        assert!(matches!(result, Err(FetchError::Unauthorized(401))));
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_rate_limited() {
        let base = spawn_notion(429, r#"{"object": "error"}"#).await;
        let result = client(&base, "secret").fetch_tasks().await;
        assert!(matches!(result, Err(FetchError::RateLimited)));
    }

    #[tokio::test]
    async fn test_server_error_keeps_body() {
        let base = spawn_notion(502, "bad gateway").await;
        match client(&base, "secret").fetch_tasks().await {
            Err(FetchError::Http(msg)) => {
                assert!(msg.contains("502"));
                assert!(msg.contains("bad gateway"));
            }
            other => panic!("Expected Http error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        // Nothing listens on port 9 of localhost in test environments
        let result = client("http://127.0.0.1:9", "secret").fetch_tasks().await;
        assert!(matches!(
            result,
            Err(FetchError::Http(_)) | Err(FetchError::Timeout)
        ));
    }

    #[test]
    fn test_query_url_trims_trailing_slash() {
        let client = client("http://localhost:1234/", "k");
        assert_eq!(
            client.query_url(),
            "http://localhost:1234/v1/databases/db1/query"
        );
    }

    #[test]
    fn test_unauthorized_error_display() {
        let err = FetchError::Unauthorized(401);
        assert!(err.to_string().contains("401"));
    }
}
