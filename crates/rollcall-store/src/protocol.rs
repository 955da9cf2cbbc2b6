//! JSON bodies exchanged with the record service.
//!
//! Paths live under `/api`; reads of service metadata are GETs, every record
//! operation is a POST carrying the table and filter.

use crate::filter::Filter;
use rollcall_core::{Record, Table};
use serde::{Deserialize, Serialize};

pub const HEALTH_PATH: &str = "/api/health";
pub const INFO_PATH: &str = "/api/info";
pub const SELECT_PATH: &str = "/api/select";
pub const SELECT_SINGLE_PATH: &str = "/api/selectSingle";
pub const INSERT_PATH: &str = "/api/insert";
pub const UPDATE_PATH: &str = "/api/update";
pub const DELETE_PATH: &str = "/api/delete";
pub const COUNT_PATH: &str = "/api/count";

/// Body of `select`, `selectSingle`, `delete` and `count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub table: Table,
    #[serde(default)]
    pub filters: Option<Filter>,
}

/// One record or a batch; the service accepts both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsertData {
    Many(Vec<Record>),
    One(Record),
}

impl InsertData {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            InsertData::Many(records) => records,
            InsertData::One(record) => vec![record],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertRequest {
    pub table: Table,
    pub data: InsertData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub table: Table,
    #[serde(default)]
    pub filters: Option<Filter>,
    pub updates: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertAck {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeAck {
    pub success: bool,
    pub changes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub port: u16,
    pub network_addresses: Vec<String>,
    pub access_url: String,
}

/// Error body returned with every non-success status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_data_accepts_one_or_many() {
        let one: InsertRequest =
            serde_json::from_value(json!({"table": "students", "data": {"id": "a"}})).unwrap();
        assert_eq!(one.data.into_records().len(), 1);

        let many: InsertRequest = serde_json::from_value(
            json!({"table": "students", "data": [{"id": "a"}, {"id": "b"}]}),
        )
        .unwrap();
        assert_eq!(many.data.into_records().len(), 2);
    }

    #[test]
    fn test_query_request_rejects_unknown_table() {
        let err = serde_json::from_value::<QueryRequest>(json!({"table": "studnets"}));
        assert!(err.is_err());
    }

    #[test]
    fn test_server_info_camel_case() {
        let info = ServerInfo {
            port: 3001,
            network_addresses: vec!["10.0.0.2".into()],
            access_url: "http://10.0.0.2:3001".into(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["networkAddresses"][0], "10.0.0.2");
        assert_eq!(json["accessUrl"], "http://10.0.0.2:3001");
    }
}
