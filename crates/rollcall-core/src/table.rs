//! The closed set of record tables shared by every store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A record table. Wire names match the record service protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    #[serde(rename = "users")]
    Users,
    #[serde(rename = "userRoles")]
    UserRoles,
    #[serde(rename = "students")]
    Students,
    #[serde(rename = "classes")]
    Classes,
    #[serde(rename = "sessions")]
    Sessions,
    #[serde(rename = "attendance")]
    Attendance,
    #[serde(rename = "classStudents")]
    ClassStudents,
}

#[derive(Debug, Error)]
#[error("unknown table: {0}")]
pub struct UnknownTable(pub String);

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Users,
        Table::UserRoles,
        Table::Students,
        Table::Classes,
        Table::Sessions,
        Table::Attendance,
        Table::ClassStudents,
    ];

    /// Name used on the wire and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::UserRoles => "userRoles",
            Table::Students => "students",
            Table::Classes => "classes",
            Table::Sessions => "sessions",
            Table::Attendance => "attendance",
            Table::ClassStudents => "classStudents",
        }
    }

    /// Name of the backing SQL table.
    pub fn sql_name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::UserRoles => "user_roles",
            Table::Students => "students",
            Table::Classes => "classes",
            Table::Sessions => "sessions",
            Table::Attendance => "attendance",
            Table::ClassStudents => "class_students",
        }
    }

    /// Fields with a secondary index, besides `id`.
    pub fn indexed_fields(&self) -> &'static [&'static str] {
        match self {
            Table::Users => &["email"],
            Table::UserRoles => &["user_id", "role"],
            Table::Students => &["user_id", "usn", "email"],
            Table::Classes => &["created_by"],
            Table::Sessions => &["class_id", "created_by", "start_at", "status"],
            Table::Attendance => &["session_id", "student_id", "timestamp"],
            Table::ClassStudents => &["class_id", "student_id"],
        }
    }

    /// Field combinations that must be unique across the table.
    pub fn unique_keys(&self) -> &'static [&'static [&'static str]] {
        match self {
            Table::Students => &[&["usn"]],
            Table::UserRoles => &[&["user_id", "role"]],
            Table::Attendance => &[&["session_id", "student_id"]],
            Table::ClassStudents => &[&["class_id", "student_id"]],
            _ => &[],
        }
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        field == "id" || self.indexed_fields().contains(&field)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.sql_name() == s)
            .ok_or_else(|| UnknownTable(s.to_string()))
    }
}
