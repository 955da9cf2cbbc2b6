use rollcall_core::{RecordError, Table};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record in {table} has no id")]
    MissingId { table: Table },
    #[error("uniqueness violated in {table}: {detail}")]
    Conflict { table: Table, detail: String },
    #[error("sqlite: {0}")]
    Sqlite(String),
    #[error("remote endpoint not configured")]
    NotConfigured,
    #[error("transport: {0}")]
    Transport(String),
    #[error("record service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("record: {0}")]
    Record(#[from] RecordError),
    #[error("remote failed ({remote}); local fallback failed ({local})")]
    Fallback {
        remote: Box<StoreError>,
        local: Box<StoreError>,
    },
}

impl StoreError {
    /// A definitive rejection rather than an outage; never retried elsewhere.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}
