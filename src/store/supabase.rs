//! Supabase store backend.
//!
//! Rows are read and written through PostgREST (`/rest/v1/{table}`); change
//! notifications come from Realtime, see [`super::RealtimeClient`].

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

use super::{Filter, RealtimeClient, Store, Table};
use crate::feed::{ChangeFeed, FeedConnection};
use crate::models::{ActivityLogEntry, NewActivity, Session, Task, TaskRecord};
use crate::{Error, Result};

/// Store backed by a Supabase project.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    key: String,
}

impl SupabaseStore {
    /// Create a store for the project at `base_url`, authenticating with `key`.
    pub fn new(base_url: &str, key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(key)
            .map_err(|_| Error::Config("Supabase key contains invalid characters".to_string()))?;
        headers.insert("apikey", value);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.as_str())
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.key)
    }

    async fn get_rows<T>(&self, table: Table, query: &[(&str, String)]) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .authorized(self.client.get(self.table_url(table)))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::StoreRead(e.to_string()))?;
        let response = check(response, Error::StoreRead).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| Error::StoreRead(format!("{}: {}", table, e)))
    }
}

/// Turn a non-2xx response into the given error kind, keeping the body.
async fn check(response: Response, kind: fn(String) -> Error) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(kind(format!("HTTP {}: {}", status.as_u16(), body)))
}

/// Total row count from a PostgREST `Content-Range` header.
///
/// `0-9/42` and `*/0` carry a total; `0-9/*` does not.
pub fn parse_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.parse().ok()
}

#[async_trait]
impl Store for SupabaseStore {
    async fn upsert_task(&self, record: &TaskRecord) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.table_url(Table::Tasks)))
            .query(&[("on_conflict", "notion_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record)
            .send()
            .await
            .map_err(|e| Error::StoreWrite(e.to_string()))?;
        check(response, Error::StoreWrite).await?;
        Ok(())
    }

    async fn record_session(&self, session: &Session) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.table_url(Table::Sessions)))
            .query(&[("on_conflict", "session_key")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(session)
            .send()
            .await
            .map_err(|e| Error::StoreWrite(e.to_string()))?;
        check(response, Error::StoreWrite).await?;
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.get_rows(
            Table::Tasks,
            &[("select", "*".to_string()), ("order", "created_at.desc".to_string())],
        )
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.get_rows(
            Table::Sessions,
            &[("select", "*".to_string()), ("order", "started_at.desc".to_string())],
        )
        .await
    }

    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityLogEntry>> {
        self.get_rows(
            Table::ActivityLog,
            &[
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry> {
        let response = self
            .authorized(self.client.post(self.table_url(Table::ActivityLog)))
            .header("Prefer", "return=representation")
            .json(entry)
            .send()
            .await
            .map_err(|e| Error::StoreWrite(e.to_string()))?;
        let response = check(response, Error::StoreWrite).await?;
        let mut rows: Vec<ActivityLogEntry> = response
            .json()
            .await
            .map_err(|e| Error::StoreWrite(format!("activity_log: {}", e)))?;
        rows.pop()
            .ok_or_else(|| Error::StoreWrite("activity_log insert returned no row".to_string()))
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64> {
        let mut query = vec![("select", "*".to_string())];
        if let Filter::StatusEq(status) = filter {
            query.push(("status", format!("eq.{}", status)));
        }

        let response = self
            .authorized(self.client.head(self.table_url(table)))
            .query(&query)
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(|e| Error::StoreRead(format!("count {}: {}", table, e)))?;
        let response = check(response, Error::StoreRead).await?;

        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| Error::StoreRead(format!("count {}: no total in Content-Range", table)))
    }

    fn connect_feed(&self, feed: &ChangeFeed) -> Result<FeedConnection> {
        let client = RealtimeClient::new(&self.base_url, &self.key)?;
        let description = format!("supabase realtime at {}", client.endpoint_host());
        Ok(FeedConnection::spawned(description, client.spawn(feed.clone())))
    }

    fn backend(&self) -> &'static str {
        "supabase"
    }

    fn location(&self) -> String {
        self.base_url.clone()
    }
}
