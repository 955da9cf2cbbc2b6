use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::Descriptor;

/// A stored document: field name → JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Serialize a typed entity into a store record.
pub fn to_record<T: Serialize>(value: &T) -> Result<Record, RecordError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(RecordError::NotAnObject),
    }
}

/// Deserialize a store record into a typed entity.
pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, RecordError> {
    Ok(serde_json::from_value(serde_json::Value::Object(record))?)
}

/// Generate a fresh record identity.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Teacher,
    Student,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleRecord {
    pub id: String,
    pub user_id: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub name: String,
    /// University seat number, unique per student.
    pub usn: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub branch: String,
    pub semester: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Face descriptor computed from `photo_url`; `None` until computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_computed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn new(name: &str, usn: &str, email: &str, branch: &str, semester: u32) -> Self {
        Self {
            id: new_id(),
            user_id: None,
            name: name.to_string(),
            usn: usn.to_string(),
            email: email.to_string(),
            phone: None,
            branch: branch.to_string(),
            semester,
            photo_url: None,
            descriptor: None,
            descriptor_computed_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub id: String,
    pub branch_name: String,
    pub section_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Class {
    pub fn new(branch_name: &str, section_name: &str, created_by: &str) -> Self {
        Self {
            id: new_id(),
            branch_name: branch_name.to_string(),
            section_name: section_name.to_string(),
            academic_year: None,
            description: None,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        }
    }
}

/// Session lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Upcoming,
    Live,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Upcoming => "upcoming",
            SessionStatus::Live => "live",
            SessionStatus::Ended => "ended",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Upcoming => 0,
            SessionStatus::Live => 1,
            SessionStatus::Ended => 2,
        }
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub class_id: String,
    pub start_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Set only when the session transitions to `ended`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        title: &str,
        class_id: &str,
        start_at: DateTime<Utc>,
        duration_minutes: u32,
        created_by: &str,
    ) -> Self {
        Self {
            id: new_id(),
            title: title.to_string(),
            class_id: class_id.to_string(),
            start_at,
            duration_minutes,
            status: SessionStatus::Upcoming,
            notes: None,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMethod {
    Face,
    Manual,
}

impl AttendanceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceMethod::Face => "face",
            AttendanceMethod::Manual => "manual",
        }
    }
}

/// One student present at one session. At most one per (session_id, student_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendance {
    pub id: String,
    pub session_id: String,
    pub student_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: AttendanceMethod,
    /// Match similarity; present only for `face`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub marked_by: String,
    /// Marks out of 100, assigned after the fact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Attendance {
    pub fn new(
        session_id: &str,
        student_id: &str,
        method: AttendanceMethod,
        confidence: Option<f32>,
        marked_by: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            timestamp: now,
            method,
            confidence: match method {
                AttendanceMethod::Face => confidence,
                AttendanceMethod::Manual => None,
            },
            device_id: None,
            marked_by: marked_by.to_string(),
            marks: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassStudent {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub created_at: DateTime<Utc>,
}

impl ClassStudent {
    pub fn new(class_id: &str, student_id: &str) -> Self {
        Self {
            id: new_id(),
            class_id: class_id.to_string(),
            student_id: student_id.to_string(),
            created_at: Utc::now(),
        }
    }
}
