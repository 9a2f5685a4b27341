//! Apache Drill REST adapter.
//!
//! Drill federates the platform's relational tables, document collections
//! and CSV files behind one SQL endpoint. Each configured store points at a
//! Drill workspace (`postgres.public`, `mongo.environmental_db`,
//! `dfs.data`); the adapter renders a [`StoreQuery`] as SQL under that
//! prefix and posts it to `/query.json`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sql::{build_select, quote_ident};
use super::traits::{RawRow, StoreAdapter, StoreQuery};
use crate::config::StoreConfig;
use crate::error::StorageError;

/// Drill query request body.
#[derive(Debug, Serialize)]
struct DrillRequest<'a> {
    #[serde(rename = "queryType")]
    query_type: &'a str,
    query: &'a str,
}

/// Drill query response body.
#[derive(Debug, Deserialize)]
struct DrillResponse {
    #[serde(default)]
    #[allow(dead_code)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<RawRow>,
    #[serde(default, rename = "queryState")]
    query_state: Option<String>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

/// Drill error body for non-2xx replies.
#[derive(Debug, Deserialize)]
struct DrillError {
    #[serde(rename = "errorMessage")]
    error_message: String,
}

pub struct DrillStore {
    name: String,
    client: Client,
    ping_client: Client,
    base_url: String,
    workspace: Option<String>,
    timeout_ms: u64,
}

impl DrillStore {
    /// Create an adapter from store configuration. `timeout_ms` bounds each
    /// query request.
    pub fn from_config(config: &StoreConfig, timeout_ms: u64) -> Result<Self, StorageError> {
        if config.url.is_empty() {
            return Err(StorageError::Connection(format!(
                "store {} has no Drill URL",
                config.name
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| StorageError::Connection(format!("Failed to create HTTP client: {}", e)))?;
        let ping_client = Client::builder()
            .timeout(Duration::from_millis(config.ping_timeout_ms))
            .build()
            .map_err(|e| StorageError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            client,
            ping_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            workspace: config.workspace.clone().filter(|w| !w.is_empty()),
            timeout_ms,
        })
    }

    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }

    /// SQL text for a sub-query.
    pub fn render(&self, query: &StoreQuery) -> String {
        build_select(query, self.workspace())
    }

    fn ping_sql(&self) -> String {
        match self.workspace() {
            Some(ws) => {
                let quoted: Vec<String> = ws.split('.').map(quote_ident).collect();
                format!("SHOW TABLES IN {}", quoted.join("."))
            }
            None => "SELECT 1".to_string(),
        }
    }

    async fn submit(&self, client: &Client, sql: &str) -> Result<Vec<RawRow>, StorageError> {
        let url = format!("{}/query.json", self.base_url);
        let request = DrillRequest {
            query_type: "SQL",
            query: sql,
        };

        let response = client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StorageError::Timeout(self.timeout_ms)
                } else if e.is_connect() {
                    StorageError::Connection(format!("Failed to connect to {}: {}", url, e))
                } else {
                    StorageError::Query(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<DrillError>(&body)
                .map(|e| e.error_message)
                .unwrap_or(body);
            return Err(StorageError::Query(format!("Drill returned {}: {}", status, message)));
        }

        let body: DrillResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Protocol(format!("Failed to parse Drill response: {}", e)))?;

        if let Some(message) = body.error_message {
            return Err(StorageError::Query(message));
        }
        if body.query_state.as_deref() == Some("FAILED") {
            return Err(StorageError::Query("Drill reported a failed query".to_string()));
        }

        Ok(body.rows)
    }
}

#[async_trait]
impl StoreAdapter for DrillStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: StoreQuery) -> Result<Vec<RawRow>, StorageError> {
        let sql = self.render(&query);
        tracing::debug!(store = %self.name, %sql, "Submitting Drill query");
        let mut rows = self.submit(&self.client, &sql).await?;
        rows.iter_mut().for_each(blank_to_null);
        Ok(rows)
    }

    fn native_query(&self, query: &StoreQuery) -> Option<String> {
        Some(self.render(query))
    }

    async fn ping(&self) -> bool {
        match self.submit(&self.ping_client, &self.ping_sql()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(store = %self.name, "Ping failed: {}", e);
                false
            }
        }
    }
}

/// Drill returns every value as a string; empty strings stand for missing.
fn blank_to_null(row: &mut RawRow) {
    for value in row.values_mut() {
        if value.as_str().is_some_and(|s| s.is_empty()) {
            *value = Value::Null;
        }
    }
}
