//! Session lifecycle, class membership and marks.

use crate::detect::DetectorError;
use chrono::Utc;
use rollcall_core::{ClassStudent, Record, Session, SessionStatus, Table};
use rollcall_store::{insert_one, select_one_as, Filter, RecordStore, StoreError};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{table} record not found: {id}")]
    NotFound { table: Table, id: String },
    #[error("session cannot move from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("marks must be between 0 and 100, got {0}")]
    InvalidMark(u32),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DetectorError),
}

async fn load_session(
    store: &dyn RecordStore,
    session_id: &str,
) -> Result<Session, LifecycleError> {
    select_one_as(store, Table::Sessions, &Filter::by("id", session_id))
        .await?
        .ok_or_else(|| LifecycleError::NotFound {
            table: Table::Sessions,
            id: session_id.to_string(),
        })
}

/// Move a session forward. The write is conditional on the status read
/// here, so a session moved concurrently is never dragged back.
async fn transition(
    store: &dyn RecordStore,
    session_id: &str,
    allowed_from: &[SessionStatus],
    next: SessionStatus,
) -> Result<Session, LifecycleError> {
    let mut session = load_session(store, session_id).await?;
    let from = session.status;
    if !allowed_from.contains(&from) || !from.can_transition_to(next) {
        return Err(LifecycleError::InvalidTransition {
            from: from.as_str(),
            to: next.as_str(),
        });
    }

    let mut updates = Record::new();
    updates.insert("status".into(), next.as_str().into());
    let ended_at = (next == SessionStatus::Ended).then(Utc::now);
    if let Some(now) = ended_at {
        updates.insert("ended_at".into(), Value::String(now.to_rfc3339()));
    }
    let expected = Filter::by("id", session_id).and("status", from.as_str());
    let changed = store.update(Table::Sessions, &expected, &updates).await?;
    if changed == 0 {
        let current = load_session(store, session_id).await?;
        tracing::warn!(
            session = %session_id,
            expected = from.as_str(),
            found = current.status.as_str(),
            "session changed during transition"
        );
        return Err(LifecycleError::InvalidTransition {
            from: current.status.as_str(),
            to: next.as_str(),
        });
    }

    tracing::info!(
        session = %session_id,
        from = from.as_str(),
        to = next.as_str(),
        "session transition"
    );
    session.status = next;
    if ended_at.is_some() {
        session.ended_at = ended_at;
    }
    Ok(session)
}

/// `upcoming → live`.
pub async fn start_session(
    store: &dyn RecordStore,
    session_id: &str,
) -> Result<Session, LifecycleError> {
    transition(store, session_id, &[SessionStatus::Upcoming], SessionStatus::Live).await
}

/// `upcoming | live → ended`, stamping `ended_at`.
pub async fn end_session(
    store: &dyn RecordStore,
    session_id: &str,
) -> Result<Session, LifecycleError> {
    transition(
        store,
        session_id,
        &[SessionStatus::Upcoming, SessionStatus::Live],
        SessionStatus::Ended,
    )
    .await
}

/// Add a student to a class; returns the existing association if present.
pub async fn add_to_class(
    store: &dyn RecordStore,
    class_id: &str,
    student_id: &str,
) -> Result<ClassStudent, LifecycleError> {
    let pair = Filter::by("class_id", class_id).and("student_id", student_id);
    let existing: Option<ClassStudent> =
        select_one_as(store, Table::ClassStudents, &pair).await?;
    if let Some(existing) = existing {
        return Ok(existing);
    }

    let link = ClassStudent::new(class_id, student_id);
    match insert_one(store, Table::ClassStudents, &link).await {
        Ok(_) => {
            tracing::info!(class = %class_id, student = %student_id, "student added to class");
            Ok(link)
        }
        Err(e) if e.is_conflict() => select_one_as(store, Table::ClassStudents, &pair)
            .await?
            .ok_or(LifecycleError::Store(e)),
        Err(e) => Err(e.into()),
    }
}

/// Returns the number of associations removed (0 or 1).
pub async fn remove_from_class(
    store: &dyn RecordStore,
    class_id: &str,
    student_id: &str,
) -> Result<usize, LifecycleError> {
    let pair = Filter::by("class_id", class_id).and("student_id", student_id);
    let removed = store.delete(Table::ClassStudents, &pair).await?;
    tracing::info!(
        class = %class_id,
        student = %student_id,
        removed,
        "student removed from class"
    );
    Ok(removed)
}

/// Record marks (0–100) on an attendance row.
pub async fn set_mark(
    store: &dyn RecordStore,
    attendance_id: &str,
    marks: u32,
) -> Result<(), LifecycleError> {
    if marks > 100 {
        return Err(LifecycleError::InvalidMark(marks));
    }
    let mut updates = Record::new();
    updates.insert("marks".into(), marks.into());
    let changed = store
        .update(Table::Attendance, &Filter::by("id", attendance_id), &updates)
        .await?;
    if changed == 0 {
        return Err(LifecycleError::NotFound {
            table: Table::Attendance,
            id: attendance_id.to_string(),
        });
    }
    Ok(())
}
