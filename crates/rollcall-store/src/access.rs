//! Dual-mode record access: remote first when configured, local otherwise.

use crate::error::StoreError;
use crate::filter::Filter;
use crate::local::LocalStore;
use crate::protocol::ServerInfo;
use crate::remote::{RemoteStore, DEFAULT_REQUEST_TIMEOUT};
use crate::{assign_ids, RecordStore};
use async_trait::async_trait;
use rollcall_core::{Record, Table};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Which store produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Remote,
    Local,
}

/// A result tagged with the store that served it.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub value: T,
    pub via: Via,
}

impl<T> Served<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Run `primary` when present; on failure re-run the same operation as
/// `secondary`. A remote conflict is returned as-is.
pub async fn with_fallback<T, P, S>(
    op: &'static str,
    primary: Option<P>,
    secondary: S,
) -> Result<Served<T>, StoreError>
where
    P: Future<Output = Result<T, StoreError>>,
    S: Future<Output = Result<T, StoreError>>,
{
    let Some(primary) = primary else {
        let value = secondary.await?;
        return Ok(Served {
            value,
            via: Via::Local,
        });
    };

    let remote = match primary.await {
        Ok(value) => {
            return Ok(Served {
                value,
                via: Via::Remote,
            })
        }
        Err(e) if e.is_conflict() => return Err(e),
        Err(e) => e,
    };

    tracing::warn!(op, error = %remote, "remote store failed, using local store");
    match secondary.await {
        Ok(value) => Ok(Served {
            value,
            via: Via::Local,
        }),
        Err(local) => {
            tracing::error!(op, remote = %remote, local = %local, "both stores failed");
            Err(StoreError::Fallback {
                remote: Box::new(remote),
                local: Box::new(local),
            })
        }
    }
}

/// The application's only way to touch records.
pub struct RecordAccess {
    local: Arc<LocalStore>,
    remote: RwLock<Option<Arc<RemoteStore>>>,
    request_timeout: Duration,
}

impl RecordAccess {
    /// Local-only access.
    pub fn local(local: Arc<LocalStore>) -> Self {
        Self {
            local,
            remote: RwLock::new(None),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Pick the initial mode by probing `endpoint`: remote when healthy,
    /// otherwise local with a warning.
    pub async fn connect(
        local: Arc<LocalStore>,
        endpoint: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let access = Self::local(local).with_request_timeout(request_timeout);
        let Some(url) = endpoint else {
            tracing::info!("no record service configured, local mode");
            return Ok(access);
        };

        let remote = RemoteStore::new(url, request_timeout)?;
        if remote.check_health().await {
            tracing::info!(url, "record service healthy, remote mode");
            access.install(Some(Arc::new(remote)));
        } else {
            tracing::warn!(url, "record service unreachable, starting in local mode");
        }
        Ok(access)
    }

    /// Switch to remote mode for `endpoint`, or back to local with `None`.
    pub fn set_endpoint(&self, endpoint: Option<&str>) -> Result<(), StoreError> {
        let remote = match endpoint {
            Some(url) => Some(Arc::new(RemoteStore::new(url, self.request_timeout)?)),
            None => None,
        };
        tracing::info!(endpoint = ?endpoint, "record endpoint changed");
        self.install(remote);
        Ok(())
    }

    fn install(&self, remote: Option<Arc<RemoteStore>>) {
        *self.remote.write().unwrap_or_else(|e| e.into_inner()) = remote;
    }

    fn remote(&self) -> Option<Arc<RemoteStore>> {
        self.remote
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_remote_mode(&self) -> bool {
        self.remote().is_some()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.remote().map(|r| r.base_url().to_string())
    }

    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// `false` in local mode.
    pub async fn check_health(&self) -> bool {
        match self.remote() {
            Some(remote) => remote.check_health().await,
            None => false,
        }
    }

    /// `None` in local mode or when the service cannot describe itself.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        let remote = self.remote()?;
        match remote.server_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "server info unavailable");
                None
            }
        }
    }

    pub async fn select(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Served<Vec<Record>>, StoreError> {
        let remote = self.remote();
        with_fallback(
            "select",
            remote.as_ref().map(|r| r.select(table, filter)),
            self.local.select(table, filter),
        )
        .await
    }

    pub async fn select_single(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Served<Option<Record>>, StoreError> {
        let remote = self.remote();
        with_fallback(
            "select_single",
            remote.as_ref().map(|r| r.select_single(table, filter)),
            self.local.select_single(table, filter),
        )
        .await
    }

    /// Assigns ids to records that lack one, in both modes.
    pub async fn insert(
        &self,
        table: Table,
        mut records: Vec<Record>,
    ) -> Result<Served<Vec<String>>, StoreError> {
        assign_ids(&mut records);
        let remote = self.remote();
        with_fallback(
            "insert",
            remote.as_ref().map(|r| r.insert(table, records.clone())),
            self.local.insert(table, records.clone()),
        )
        .await
    }

    pub async fn update(
        &self,
        table: Table,
        filter: &Filter,
        updates: &Record,
    ) -> Result<Served<usize>, StoreError> {
        let remote = self.remote();
        with_fallback(
            "update",
            remote.as_ref().map(|r| r.update(table, filter, updates)),
            self.local.update(table, filter, updates),
        )
        .await
    }

    pub async fn delete(&self, table: Table, filter: &Filter) -> Result<Served<usize>, StoreError> {
        let remote = self.remote();
        with_fallback(
            "delete",
            remote.as_ref().map(|r| r.delete(table, filter)),
            self.local.delete(table, filter),
        )
        .await
    }

    pub async fn count(&self, table: Table, filter: &Filter) -> Result<Served<usize>, StoreError> {
        let remote = self.remote();
        with_fallback(
            "count",
            remote.as_ref().map(|r| r.count(table, filter)),
            self.local.count(table, filter),
        )
        .await
    }
}

#[async_trait]
impl RecordStore for RecordAccess {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(RecordAccess::select(self, table, filter).await?.into_inner())
    }

    async fn select_single(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Option<Record>, StoreError> {
        Ok(RecordAccess::select_single(self, table, filter)
            .await?
            .into_inner())
    }

    async fn insert(&self, table: Table, records: Vec<Record>) -> Result<Vec<String>, StoreError> {
        Ok(RecordAccess::insert(self, table, records).await?.into_inner())
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        updates: &Record,
    ) -> Result<usize, StoreError> {
        Ok(RecordAccess::update(self, table, filter, updates)
            .await?
            .into_inner())
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        Ok(RecordAccess::delete(self, table, filter).await?.into_inner())
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        Ok(RecordAccess::count(self, table, filter).await?.into_inner())
    }
}
