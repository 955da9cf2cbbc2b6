//! HTTP client for a `rollcalld` record service.

use crate::error::StoreError;
use crate::filter::Filter;
use crate::protocol::{
    ChangeAck, ErrorBody, HealthStatus, InsertAck, InsertData, InsertRequest, QueryRequest,
    ServerInfo, UpdateRequest, COUNT_PATH, DELETE_PATH, HEALTH_PATH, INFO_PATH, INSERT_PATH,
    SELECT_PATH, SELECT_SINGLE_PATH, UPDATE_PATH,
};
use crate::RecordStore;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use rollcall_core::{Record, Table};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Timeout for health probes; shorter than the per-request timeout so a dead
/// endpoint is detected quickly when choosing a mode.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RemoteStore {
    client: Client,
    base_url: String,
}

impl RemoteStore {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `true` only for a 2xx health response whose status is `ok`.
    pub async fn check_health(&self) -> bool {
        let response = self
            .client
            .get(self.url(HEALTH_PATH))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthStatus>().await {
                Ok(health) => health.status.eq_ignore_ascii_case("ok"),
                Err(e) => {
                    tracing::debug!(url = %self.base_url, error = %e, "health body unreadable");
                    false
                }
            },
            Ok(resp) => {
                tracing::debug!(
                    url = %self.base_url,
                    status = %resp.status(),
                    "health check failed"
                );
                false
            }
            Err(e) => {
                tracing::debug!(url = %self.base_url, error = %e, "health check unreachable");
                false
            }
        }
    }

    pub async fn server_info(&self) -> Result<ServerInfo, StoreError> {
        let resp = self.client.get(self.url(INFO_PATH)).send().await?;
        decode(None, resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        table: Table,
        path: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        decode(Some(table), resp).await
    }
}

/// Map a response to a value or to the matching `StoreError`.
async fn decode<T: DeserializeOwned>(
    table: Option<Table>,
    resp: Response,
) -> Result<T, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or_else(|_| {
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        });

    match (status, table) {
        (StatusCode::CONFLICT, Some(table)) => Err(StoreError::Conflict {
            table,
            detail: message,
        }),
        _ => Err(StoreError::Service {
            status: status.as_u16(),
            message,
        }),
    }
}

fn query(table: Table, filter: &Filter) -> QueryRequest {
    QueryRequest {
        table,
        filters: Some(filter.clone()),
    }
}

#[async_trait]
impl RecordStore for RemoteStore {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        self.post(table, SELECT_PATH, &query(table, filter)).await
    }

    async fn select_single(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Option<Record>, StoreError> {
        self.post(table, SELECT_SINGLE_PATH, &query(table, filter))
            .await
    }

    async fn insert(&self, table: Table, records: Vec<Record>) -> Result<Vec<String>, StoreError> {
        let ids = records
            .iter()
            .map(|r| {
                r.get("id")
                    .and_then(|v| v.as_str())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .ok_or(StoreError::MissingId { table })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let body = InsertRequest {
            table,
            data: InsertData::Many(records),
        };
        let ack: InsertAck = self.post(table, INSERT_PATH, &body).await?;
        if ack.count != ids.len() {
            tracing::warn!(
                table = %table,
                sent = ids.len(),
                acked = ack.count,
                "insert count mismatch"
            );
        }
        Ok(ids)
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        updates: &Record,
    ) -> Result<usize, StoreError> {
        let body = UpdateRequest {
            table,
            filters: Some(filter.clone()),
            updates: updates.clone(),
        };
        let ack: ChangeAck = self.post(table, UPDATE_PATH, &body).await?;
        Ok(ack.changes)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        let ack: ChangeAck = self.post(table, DELETE_PATH, &query(table, filter)).await?;
        Ok(ack.changes)
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        self.post(table, COUNT_PATH, &query(table, &filter.constraints_only()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = RemoteStore::new("http://10.0.0.5:3001/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(store.base_url(), "http://10.0.0.5:3001");
        assert_eq!(store.url(SELECT_PATH), "http://10.0.0.5:3001/api/select");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error_not_empty() {
        let store = RemoteStore::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        assert!(!store.check_health().await);
        let err = store.select(Table::Students, &Filter::all()).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_insert_requires_ids_before_sending() {
        let store = RemoteStore::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let mut record = Record::new();
        record.insert("name".into(), "x".into());
        let err = store.insert(Table::Students, vec![record]).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingId { .. }));
    }
}
