//! Face descriptor enrollment from stored student photos.

use crate::detect::{DescriptorSource, DetectorError};
use crate::session::LifecycleError;
use chrono::Utc;
use rollcall_core::{Descriptor, Record, Student, Table};
use rollcall_store::{select_as, Filter, RecordStore};
use serde_json::Value;

fn descriptor_updates(descriptor: Option<&Descriptor>) -> Result<Record, LifecycleError> {
    let mut updates = Record::new();
    match descriptor {
        Some(d) => {
            let values = serde_json::to_value(d).map_err(rollcall_store::StoreError::from)?;
            updates.insert("descriptor".into(), values);
            updates.insert(
                "descriptor_computed_at".into(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        None => {
            updates.insert("descriptor".into(), Value::Null);
            updates.insert("descriptor_computed_at".into(), Value::Null);
        }
    }
    Ok(updates)
}

/// Compute descriptors for students that have a photo but no descriptor.
///
/// Stops early when recognition is unavailable; a photo that fails or has no
/// face is skipped. Returns the number of students updated.
pub async fn refresh_missing_descriptors(
    store: &dyn RecordStore,
    source: &dyn DescriptorSource,
) -> Result<usize, LifecycleError> {
    let students: Vec<Student> = select_as(store, Table::Students, &Filter::all()).await?;
    let pending: Vec<&Student> = students
        .iter()
        .filter(|s| s.descriptor.is_none() && s.photo_url.is_some())
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }
    tracing::info!(count = pending.len(), "computing missing descriptors");

    let mut updated = 0;
    for student in pending {
        let Some(photo) = student.photo_url.as_deref() else {
            continue;
        };
        match source.compute(photo).await {
            Ok(Some(descriptor)) => {
                let updates = descriptor_updates(Some(&descriptor))?;
                store
                    .update(Table::Students, &Filter::by("id", student.id.as_str()), &updates)
                    .await?;
                tracing::debug!(
                    student = %student.id,
                    len = descriptor.len(),
                    "descriptor computed"
                );
                updated += 1;
            }
            Ok(None) => {
                tracing::warn!(student = %student.id, "no face found in photo");
            }
            Err(DetectorError::Unavailable(reason)) => {
                tracing::warn!(%reason, "recognition unavailable; skipping descriptor computation");
                break;
            }
            Err(e) => {
                tracing::warn!(student = %student.id, error = %e, "could not compute descriptor");
            }
        }
    }
    Ok(updated)
}

/// Store a new photo for a student and recompute its descriptor. Passing
/// `None` removes the photo. The descriptor is cleared when no face can be
/// extracted, so a stale descriptor never outlives its photo.
pub async fn update_student_photo(
    store: &dyn RecordStore,
    source: &dyn DescriptorSource,
    student_id: &str,
    photo_url: Option<&str>,
) -> Result<Option<Descriptor>, LifecycleError> {
    let descriptor = match photo_url {
        Some(url) => source.compute(url).await?,
        None => None,
    };

    let mut updates = descriptor_updates(descriptor.as_ref())?;
    updates.insert(
        "photo_url".into(),
        photo_url.map_or(Value::Null, |u| Value::String(u.to_string())),
    );
    let changed = store
        .update(Table::Students, &Filter::by("id", student_id), &updates)
        .await?;
    if changed == 0 {
        return Err(LifecycleError::NotFound {
            table: Table::Students,
            id: student_id.to_string(),
        });
    }
    tracing::info!(
        student = %student_id,
        has_descriptor = descriptor.is_some(),
        "student photo updated"
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rollcall_store::{insert_one, select_one_as, LocalStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Photos named `face:*` yield a descriptor; `blank:*` have no face.
    struct FakeSource {
        available: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DescriptorSource for FakeSource {
        async fn compute(&self, photo_url: &str) -> Result<Option<Descriptor>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.available {
                return Err(DetectorError::Unavailable("models not loaded".into()));
            }
            if photo_url.starts_with("face:") {
                Ok(Some(Descriptor::new(vec![0.25, 0.5, 0.75])))
            } else if photo_url.starts_with("blank:") {
                Ok(None)
            } else {
                Err(DetectorError::Photo(photo_url.to_string()))
            }
        }
    }

    fn source(available: bool) -> FakeSource {
        FakeSource {
            available,
            calls: AtomicUsize::new(0),
        }
    }

    async fn student(store: &LocalStore, usn: &str, photo: Option<&str>) -> Student {
        let mut s = Student::new(usn, usn, "x@example.edu", "CSE", 1);
        s.photo_url = photo.map(str::to_string);
        insert_one(store, Table::Students, &s).await.unwrap();
        s
    }

    async fn reload(store: &LocalStore, id: &str) -> Student {
        select_one_as(store, Table::Students, &Filter::by("id", id))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_fills_only_missing_with_photo() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let a = student(&store, "A", Some("face:a")).await;
        let b = student(&store, "B", None).await;
        let c = student(&store, "C", Some("blank:c")).await;
        let d = student(&store, "D", Some("broken")).await;

        let src = source(true);
        assert_eq!(refresh_missing_descriptors(&store, &src).await.unwrap(), 1);
        assert_eq!(src.calls.load(Ordering::SeqCst), 3);

        let a = reload(&store, &a.id).await;
        assert_eq!(a.descriptor.unwrap().len(), 3);
        assert!(a.descriptor_computed_at.is_some());
        assert!(reload(&store, &b.id).await.descriptor.is_none());
        assert!(reload(&store, &c.id).await.descriptor.is_none());
        assert!(reload(&store, &d.id).await.descriptor.is_none());

        // Second pass skips the student that now has one.
        let src = source(true);
        refresh_missing_descriptors(&store, &src).await.unwrap();
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_stops_when_recognition_unavailable() {
        let store = LocalStore::open_in_memory().await.unwrap();
        student(&store, "A", Some("face:a")).await;
        student(&store, "B", Some("face:b")).await;

        let src = source(false);
        assert_eq!(refresh_missing_descriptors(&store, &src).await.unwrap(), 0);
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_photo_update_recomputes_and_clears() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let s = student(&store, "A", None).await;
        let src = source(true);

        let d = update_student_photo(&store, &src, &s.id, Some("face:new")).await.unwrap();
        assert!(d.is_some());
        let stored = reload(&store, &s.id).await;
        assert_eq!(stored.photo_url.as_deref(), Some("face:new"));
        assert!(stored.descriptor.is_some());

        let d = update_student_photo(&store, &src, &s.id, Some("blank:new")).await.unwrap();
        assert!(d.is_none());
        let stored = reload(&store, &s.id).await;
        assert!(stored.descriptor.is_none());
        assert!(stored.descriptor_computed_at.is_none());

        update_student_photo(&store, &src, &s.id, None).await.unwrap();
        assert!(reload(&store, &s.id).await.photo_url.is_none());
    }

    #[tokio::test]
    async fn test_photo_update_unknown_student() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let err = update_student_photo(&store, &source(true), "ghost", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }
}
