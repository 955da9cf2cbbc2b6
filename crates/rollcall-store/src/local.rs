//! On-device record store backed by SQLite.
//!
//! Each table keeps JSON documents keyed by id. Declared fields get an
//! expression index over `json_extract(doc, '$.field')`; equality lookups on
//! any other field degrade to a table scan.

use crate::error::StoreError;
use crate::filter::Filter;
use crate::RecordStore;
use async_trait::async_trait;
use rollcall_core::{Record, Table};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, ErrorCode};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// SQLite-backed record store. Cheap to share behind an `Arc`.
pub struct LocalStore {
    conn: tokio_rusqlite::Connection,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open (or create) a store file, creating parent directories as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Sqlite(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path.clone())
            .await
            .map_err(|e| StoreError::Sqlite(format!("{}: {e}", path.display())))?;
        let store = Self::init(conn, Some(path)).await?;
        tracing::info!(path = ?store.path, "opened local record store");
        Ok(store)
    }

    /// Transient store, mainly for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Sqlite(e.to_string()))?;
        Self::init(conn, None).await
    }

    async fn init(
        conn: tokio_rusqlite::Connection,
        path: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        let ddl = schema_sql();
        conn.call(move |conn| {
            conn.execute_batch(&ddl)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Sqlite(format!("schema: {e}")))?;
        Ok(Self { conn, path })
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let filter = filter.clone();
        self.conn
            .call(move |conn| Ok(query(conn, table, &filter)?))
            .await
            .map_err(|e| store_err(table, e))
    }

    async fn select_single(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Option<Record>, StoreError> {
        let mut filter = filter.clone();
        filter.limit = Some(1);
        Ok(self.select(table, &filter).await?.into_iter().next())
    }

    async fn insert(&self, table: Table, records: Vec<Record>) -> Result<Vec<String>, StoreError> {
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let id = record_id(record).ok_or(StoreError::MissingId { table })?;
            rows.push((id.to_string(), serde_json::to_string(record)?));
        }
        let ids: Vec<String> = rows.iter().map(|(id, _)| id.clone()).collect();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let sql = format!(
                        "INSERT INTO {} (id, doc) VALUES (?1, ?2) \
                         ON CONFLICT(id) DO UPDATE SET doc = excluded.doc",
                        table.sql_name()
                    );
                    let mut stmt = tx.prepare(&sql)?;
                    for (id, doc) in &rows {
                        stmt.execute(params![id, doc])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| store_err(table, e))?;

        tracing::debug!(table = %table, count = ids.len(), "local insert");
        Ok(ids)
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        updates: &Record,
    ) -> Result<usize, StoreError> {
        let filter = filter.clone();
        let mut updates = updates.clone();
        if updates.remove("id").is_some() {
            tracing::debug!(table = %table, "ignoring id in update fields");
        }

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let matched = query(&tx, table, &filter)?;
                {
                    let sql = format!("UPDATE {} SET doc = ?2 WHERE id = ?1", table.sql_name());
                    let mut stmt = tx.prepare(&sql)?;
                    for mut record in matched.iter().cloned() {
                        let Some(id) = record_id(&record).map(str::to_string) else {
                            continue;
                        };
                        for (field, value) in &updates {
                            record.insert(field.clone(), value.clone());
                        }
                        let doc = serde_json::to_string(&record).map_err(json_err)?;
                        stmt.execute(params![id, doc])?;
                    }
                }
                tx.commit()?;
                Ok(matched.len())
            })
            .await
            .map_err(|e| store_err(table, e))
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        let filter = filter.clone();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let matched = query(&tx, table, &filter)?;
                let mut removed = 0;
                {
                    let sql = format!("DELETE FROM {} WHERE id = ?1", table.sql_name());
                    let mut stmt = tx.prepare(&sql)?;
                    for id in matched.iter().filter_map(record_id) {
                        removed += stmt.execute(params![id])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(|e| store_err(table, e))
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        let filter = filter.constraints_only();
        self.conn
            .call(move |conn| Ok(query(conn, table, &filter)?.len()))
            .await
            .map_err(|e| store_err(table, e))
    }
}

fn record_id(record: &Record) -> Option<&str> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

fn json_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn store_err(table: Table, e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, msg))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict {
                table,
                detail: msg.unwrap_or_else(|| err.to_string()),
            }
        }
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::ToSqlConversionFailure(inner)) => {
            StoreError::Decode(inner.to_string())
        }
        other => StoreError::Sqlite(other.to_string()),
    }
}

fn schema_sql() -> String {
    let mut ddl = String::new();
    for table in Table::ALL {
        let name = table.sql_name();
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (\
             id TEXT PRIMARY KEY NOT NULL, \
             doc TEXT NOT NULL CHECK (json_valid(doc)));\n"
        ));
        for field in table.indexed_fields() {
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{name}_{field} \
                 ON {name} (json_extract(doc, '$.{field}'));\n"
            ));
        }
        for key in table.unique_keys() {
            let columns: Vec<String> = key
                .iter()
                .map(|field| format!("json_extract(doc, '$.{field}')"))
                .collect();
            ddl.push_str(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS uniq_{name}_{} ON {name} ({});\n",
                key.join("_"),
                columns.join(", ")
            ));
        }
    }
    ddl
}

/// Index-backed lookup for the first indexed, scalar equality constraint.
enum Lookup {
    Id(SqlValue),
    Field(&'static str, Option<SqlValue>),
    Scan,
}

fn to_sql_value(value: &Value) -> Option<Option<SqlValue>> {
    match value {
        Value::Null => Some(None),
        Value::Bool(b) => Some(Some(SqlValue::Integer(i64::from(*b)))),
        Value::Number(n) => Some(Some(match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64()?),
        })),
        Value::String(s) => Some(Some(SqlValue::Text(s.clone()))),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn plan(table: Table, filter: &Filter) -> Lookup {
    for (field, value) in &filter.eq {
        let Some(bound) = to_sql_value(value) else {
            continue;
        };
        if field == "id" {
            if let Some(v) = bound {
                return Lookup::Id(v);
            }
            continue;
        }
        if let Some(indexed) = table.indexed_fields().iter().find(|f| **f == field.as_str()) {
            return Lookup::Field(*indexed, bound);
        }
    }

    if !filter.eq.is_empty() {
        tracing::warn!(
            table = %table,
            fields = ?filter.eq.keys().collect::<Vec<_>>(),
            "no index for equality fields; scanning table"
        );
    }
    Lookup::Scan
}

/// Index lookup, then remaining equality constraints, then ordering, then limit.
fn query(
    conn: &rusqlite::Connection,
    table: Table,
    filter: &Filter,
) -> rusqlite::Result<Vec<Record>> {
    let name = table.sql_name();
    let (sql, args): (String, Vec<SqlValue>) = match plan(table, filter) {
        Lookup::Id(v) => (
            format!("SELECT doc FROM {name} WHERE id = ?1 ORDER BY rowid"),
            vec![v],
        ),
        Lookup::Field(field, Some(v)) => (
            format!(
                "SELECT doc FROM {name} \
                 WHERE json_extract(doc, '$.{field}') = ?1 ORDER BY rowid"
            ),
            vec![v],
        ),
        Lookup::Field(field, None) => (
            format!(
                "SELECT doc FROM {name} \
                 WHERE json_extract(doc, '$.{field}') IS NULL ORDER BY rowid"
            ),
            vec![],
        ),
        Lookup::Scan => (format!("SELECT doc FROM {name} ORDER BY rowid"), vec![]),
    };

    let mut stmt = conn.prepare_cached(&sql)?;
    let docs = stmt
        .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    let mut records = Vec::with_capacity(docs.len());
    for doc in docs {
        let record: Record = serde_json::from_str(&doc).map_err(json_err)?;
        if filter.matches(&record) {
            records.push(record);
        }
    }
    Ok(filter.order_and_limit(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn seeded() -> LocalStore {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .insert(
                Table::Students,
                vec![
                    rec(json!({
                        "id": "s1", "name": "Chandra", "usn": "U1", "semester": 5, "branch": "CSE"
                    })),
                    rec(json!({
                        "id": "s2", "name": "Anil", "usn": "U2", "semester": 3, "branch": "CSE"
                    })),
                    rec(json!({
                        "id": "s3", "name": "Bhavna", "usn": "U3", "semester": 5, "branch": "ECE"
                    })),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_select_all_in_insertion_order() {
        let store = seeded().await;
        let rows = store.select(Table::Students, &Filter::all()).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn test_indexed_lookup_plus_linear_constraints() {
        let store = seeded().await;
        let filter = Filter::by("usn", "U3").and("branch", "ECE");
        let rows = store.select(Table::Students, &filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Bhavna");

        let none = Filter::by("usn", "U3").and("branch", "CSE");
        assert!(store.select(Table::Students, &none).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unindexed_field_scans_instead_of_failing() {
        let store = seeded().await;
        let rows = store
            .select(Table::Students, &Filter::by("semester", 5).order_by("name", true))
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Bhavna", "Chandra"]);
    }

    #[tokio::test]
    async fn test_order_and_limit() {
        let store = seeded().await;
        let rows = store
            .select(Table::Students, &Filter::all().order_by("name", true).limit(2))
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Anil", "Bhavna"]);
    }

    #[tokio::test]
    async fn test_insert_is_full_replacement() {
        let store = seeded().await;
        store
            .insert(Table::Students, vec![rec(json!({"id": "s1", "name": "Chandra K"}))])
            .await
            .unwrap();
        let row = store
            .select_single(Table::Students, &Filter::by("id", "s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["name"], "Chandra K");
        assert!(row.get("usn").is_none());
        assert_eq!(store.count(Table::Students, &Filter::all()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insert_without_id_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let err = store
            .insert(Table::Students, vec![rec(json!({"name": "nobody"}))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingId { table: Table::Students }));
    }

    #[tokio::test]
    async fn test_update_merges_fields_on_every_match() {
        let store = seeded().await;
        let changed = store
            .update(
                Table::Students,
                &Filter::by("branch", "CSE"),
                &rec(json!({"semester": 6, "id": "ignored"})),
            )
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(store.count(Table::Students, &Filter::by("semester", 6)).await.unwrap(), 2);
        assert!(store
            .select_single(Table::Students, &Filter::by("id", "ignored"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_does_not_stamp_fields() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .insert(Table::Sessions, vec![rec(json!({"id": "x", "status": "live"}))])
            .await
            .unwrap();
        store
            .update(Table::Sessions, &Filter::by("id", "x"), &rec(json!({"status": "ended"})))
            .await
            .unwrap();
        let row = store
            .select_single(Table::Sessions, &Filter::by("id", "x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["status"], "ended");
        assert!(row.get("ended_at").is_none());
    }

    #[tokio::test]
    async fn test_delete_and_count() {
        let store = seeded().await;
        let removed = store.delete(Table::Students, &Filter::by("semester", 5)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(Table::Students, &Filter::all()).await.unwrap(), 1);
        assert_eq!(store.delete(Table::Students, &Filter::by("id", "nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_null_constraint_uses_index() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .insert(
                Table::Students,
                vec![
                    rec(json!({"id": "a", "user_id": "u1"})),
                    rec(json!({"id": "b"})),
                ],
            )
            .await
            .unwrap();
        let rows = store
            .select(Table::Students, &Filter::by("user_id", Value::Null))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "b");
    }

    #[tokio::test]
    async fn test_attendance_pair_is_unique() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .insert(
                Table::Attendance,
                vec![rec(json!({"id": "a1", "session_id": "x", "student_id": "s"}))],
            )
            .await
            .unwrap();
        let err = store
            .insert(
                Table::Attendance,
                vec![rec(json!({"id": "a2", "session_id": "x", "student_id": "s"}))],
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err}");

        // Re-upserting the same identity is not a conflict.
        store
            .insert(
                Table::Attendance,
                vec![rec(json!({"id": "a1", "session_id": "x", "student_id": "s", "marks": 80}))],
            )
            .await
            .unwrap();
        assert_eq!(store.count(Table::Attendance, &Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_student_usn_is_unique() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .insert(Table::Students, vec![rec(json!({"id": "s1", "usn": "U1"}))])
            .await
            .unwrap();
        let err = store
            .insert(Table::Students, vec![rec(json!({"id": "s2", "usn": "U1"}))])
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err}");

        // Students without a USN don't collide with each other.
        store
            .insert(
                Table::Students,
                vec![rec(json!({"id": "s3"})), rec(json!({"id": "s4"}))],
            )
            .await
            .unwrap();
        assert_eq!(store.count(Table::Students, &Filter::all()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_user_role_pair_is_unique() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let role = |id: &str, role: &str| rec(json!({"id": id, "user_id": "u1", "role": role}));
        store
            .insert(Table::UserRoles, vec![role("r1", "admin"), role("r2", "teacher")])
            .await
            .unwrap();
        let err = store
            .insert(Table::UserRoles, vec![role("r3", "admin")])
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err}");
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let result = store
            .insert(
                Table::ClassStudents,
                vec![
                    rec(json!({"id": "1", "class_id": "c", "student_id": "s"})),
                    rec(json!({"id": "2", "class_id": "c", "student_id": "s"})),
                ],
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.count(Table::ClassStudents, &Filter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/rollcall.db");
        {
            let store = LocalStore::open(&path).await.unwrap();
            store
                .insert(Table::Classes, vec![rec(json!({"id": "c1", "section_name": "A"}))])
                .await
                .unwrap();
        }
        let store = LocalStore::open(&path).await.unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let row = store
            .select_single(Table::Classes, &Filter::by("id", "c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["section_name"], "A");
    }
}
