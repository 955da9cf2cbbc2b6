//! Record storage for rollcall.
//!
//! Every store speaks the same six operations over the shared [`Filter`]:
//! [`LocalStore`] keeps records on this device, [`RemoteStore`] talks to a
//! `rollcalld` record service, and [`RecordAccess`] routes each call to one or
//! the other, falling back to the local store when the remote one fails.

pub mod access;
pub mod error;
pub mod filter;
pub mod local;
pub mod protocol;
pub mod remote;

pub use access::{RecordAccess, Served, Via};
pub use error::StoreError;
pub use filter::{compare_values, values_equal, Filter, OrderBy};
pub use local::LocalStore;
pub use remote::RemoteStore;

use async_trait::async_trait;
use rollcall_core::{from_record, new_id, to_record, Record, Table};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// The six record operations shared by every backend.
///
/// `insert` is an upsert keyed by `id`; records without an id are rejected by
/// the backends, callers that want ids generated go through [`assign_ids`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    async fn select_single(&self, table: Table, filter: &Filter)
        -> Result<Option<Record>, StoreError>;

    /// Returns the ids of the written records, in input order.
    async fn insert(&self, table: Table, records: Vec<Record>) -> Result<Vec<String>, StoreError>;

    /// Merge `updates` into every matching record. Returns the number changed.
    async fn update(&self, table: Table, filter: &Filter, updates: &Record)
        -> Result<usize, StoreError>;

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError>;

    /// Ordering and limit on the filter are ignored.
    async fn count(&self, table: Table, filter: &Filter) -> Result<usize, StoreError>;
}

/// Give every record without a non-empty string id a fresh one.
pub fn assign_ids(records: &mut [Record]) {
    for record in records {
        let has_id = matches!(record.get("id"), Some(Value::String(id)) if !id.is_empty());
        if !has_id {
            record.insert("id".into(), Value::String(new_id()));
        }
    }
}

/// Typed `select`.
pub async fn select_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    filter: &Filter,
) -> Result<Vec<T>, StoreError> {
    store
        .select(table, filter)
        .await?
        .into_iter()
        .map(|record| from_record(record).map_err(StoreError::from))
        .collect()
}

/// Typed `select_single`.
pub async fn select_one_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    filter: &Filter,
) -> Result<Option<T>, StoreError> {
    match store.select_single(table, filter).await? {
        Some(record) => Ok(Some(from_record(record)?)),
        None => Ok(None),
    }
}

/// Serialize and insert one typed record, generating an id if it has none.
pub async fn insert_one<T: Serialize>(
    store: &dyn RecordStore,
    table: Table,
    value: &T,
) -> Result<String, StoreError> {
    let mut records = vec![to_record(value)?];
    assign_ids(&mut records);
    store
        .insert(table, records)
        .await?
        .into_iter()
        .next()
        .ok_or(StoreError::MissingId { table })
}
