//! Per-session attendance capture.
//!
//! Each student moves `unmarked → marked` at most once per session. A mark is
//! guarded twice: an in-memory set updated optimistically under a lock, then
//! a fresh read through the store. The store's unique index on
//! (session_id, student_id) backs both, so a lost race surfaces as a conflict
//! and is reported as "already marked".

use crate::detect::{CameraError, DetectedFace};
use crate::notice::{Notice, NoticeKey, NoticeLimiter};
use crate::policy::CapturePolicy;
use rollcall_core::{
    Attendance, AttendanceMethod, ClassStudent, EnrolledDescriptor, EuclideanMatcher, Matcher,
    Record, Session, SessionStatus, Student, Table,
};
use rollcall_store::{insert_one, select_as, select_one_as, Filter, RecordStore, StoreError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
}

/// An outcome plus the notice to show for it, if any survived rate limiting.
#[derive(Debug, Clone, PartialEq)]
pub struct Reported<T> {
    pub outcome: T,
    pub notice: Option<Notice>,
}

impl<T> Reported<T> {
    fn quiet(outcome: T) -> Self {
        Self {
            outcome,
            notice: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Marked { attendance_id: String },
    AlreadyMarked,
    /// Nothing was written; the student can be marked again.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    NoFace,
    /// A face without a descriptor; recognition is not available.
    NoDescriptor,
    LowDetectionConfidence { confidence: f32 },
    /// Nobody on the roster has a descriptor.
    NoEnrolledFaces,
    NotRecognized { best_similarity: f32 },
    Recognized {
        student_id: String,
        similarity: f32,
        mark: MarkOutcome,
    },
}

/// The student currently in front of the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognized {
    pub student_id: String,
    pub name: String,
    pub similarity: f32,
}

struct CaptureState {
    session: Session,
    roster: Vec<Student>,
    gallery: Vec<EnrolledDescriptor>,
    /// Students with attendance for this session, as far as we know.
    marked: HashSet<String>,
    recognized: Option<Recognized>,
    limiter: NoticeLimiter,
}

impl CaptureState {
    fn name_of(&self, student_id: &str) -> String {
        self.roster
            .iter()
            .find(|s| s.id == student_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| "Student".to_string())
    }
}

pub struct AttendanceCapture {
    store: Arc<dyn RecordStore>,
    session_id: String,
    marked_by: String,
    policy: CapturePolicy,
    state: Mutex<CaptureState>,
}

impl AttendanceCapture {
    /// Load the session, its roster and existing attendance.
    ///
    /// The roster is the class membership; a class with no members falls back
    /// to every student, ordered by name.
    pub async fn load(
        store: Arc<dyn RecordStore>,
        session_id: &str,
        marked_by: &str,
        policy: CapturePolicy,
    ) -> Result<Self, CaptureError> {
        let session: Session =
            select_one_as(&*store, Table::Sessions, &Filter::by("id", session_id))
                .await?
                .ok_or_else(|| CaptureError::SessionNotFound(session_id.to_string()))?;

        let roster = load_roster(&*store, &session.class_id).await?;
        let gallery = gallery_of(&roster);
        let attendance: Vec<Attendance> = select_as(
            &*store,
            Table::Attendance,
            &Filter::by("session_id", session_id),
        )
        .await?;
        let marked: HashSet<String> = attendance.into_iter().map(|a| a.student_id).collect();

        tracing::info!(
            session = %session_id,
            status = session.status.as_str(),
            roster = roster.len(),
            enrolled = gallery.len(),
            already_marked = marked.len(),
            "capture loaded"
        );
        if gallery.is_empty() {
            tracing::warn!(
                session = %session_id,
                "no student has a face descriptor; recognition cannot match"
            );
        }

        Ok(Self {
            store,
            session_id: session_id.to_string(),
            marked_by: marked_by.to_string(),
            policy,
            state: Mutex::new(CaptureState {
                session,
                roster,
                gallery,
                marked,
                recognized: None,
                limiter: NoticeLimiter::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn policy(&self) -> &CapturePolicy {
        &self.policy
    }

    pub fn session_status(&self) -> SessionStatus {
        self.lock().session.status
    }

    pub fn roster(&self) -> Vec<Student> {
        self.lock().roster.clone()
    }

    pub fn currently_recognized(&self) -> Option<Recognized> {
        self.lock().recognized.clone()
    }

    /// Students known to be marked, sorted.
    pub fn marked_students(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().marked.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Process one detection result. Only the first (best) face is used.
    pub async fn handle_frame(
        &self,
        faces: &[DetectedFace],
        now: Instant,
    ) -> Reported<CaptureOutcome> {
        let Some(face) = faces.first() else {
            self.lock().recognized = None;
            return Reported::quiet(CaptureOutcome::NoFace);
        };
        let Some(descriptor) = face.descriptor.as_ref() else {
            tracing::debug!("face detected without descriptor; recognition unavailable");
            return Reported::quiet(CaptureOutcome::NoDescriptor);
        };

        if face.confidence < self.policy.min_detection_confidence {
            tracing::debug!(confidence = face.confidence, "detection score too low");
            let notice = self.not_recognized(now);
            return Reported {
                outcome: CaptureOutcome::LowDetectionConfidence {
                    confidence: face.confidence,
                },
                notice,
            };
        }

        let (student_id, similarity) = {
            let mut st = self.lock();
            if st.gallery.is_empty() {
                st.recognized = None;
                let notice = st
                    .limiter
                    .allow(NoticeKey::NoMatch, self.policy.no_match_cooldown, now)
                    .then_some(Notice::NoMatchingStudent);
                return Reported {
                    outcome: CaptureOutcome::NoEnrolledFaces,
                    notice,
                };
            }

            let result =
                EuclideanMatcher.compare(descriptor, &st.gallery, self.policy.min_similarity);
            let Some(student_id) = result.student_id else {
                tracing::debug!(best = result.similarity, "no match above threshold");
                st.recognized = None;
                let notice = st
                    .limiter
                    .allow(NoticeKey::NotRecognized, self.policy.not_recognized_cooldown, now)
                    .then_some(Notice::NotRecognized);
                return Reported {
                    outcome: CaptureOutcome::NotRecognized {
                        best_similarity: result.similarity,
                    },
                    notice,
                };
            };

            st.recognized = Some(Recognized {
                student_id: student_id.clone(),
                name: st.name_of(&student_id),
                similarity: result.similarity,
            });
            (student_id, result.similarity)
        };

        tracing::debug!(student = %student_id, similarity, "face recognized");
        let mark = self
            .mark(&student_id, AttendanceMethod::Face, Some(similarity), now)
            .await;
        Reported {
            outcome: CaptureOutcome::Recognized {
                student_id,
                similarity,
                mark: mark.outcome,
            },
            notice: mark.notice,
        }
    }

    /// Mark without face checks; same guards as a face mark.
    pub async fn mark_manual(&self, student_id: &str) -> Reported<MarkOutcome> {
        self.mark(student_id, AttendanceMethod::Manual, None, Instant::now())
            .await
    }

    pub async fn mark(
        &self,
        student_id: &str,
        method: AttendanceMethod,
        confidence: Option<f32>,
        now: Instant,
    ) -> Reported<MarkOutcome> {
        let name = {
            let mut st = self.lock();
            let name = st.name_of(student_id);
            if !st.marked.insert(student_id.to_string()) {
                let notice = self.already_marked(&mut st, student_id, &name, now);
                return Reported {
                    outcome: MarkOutcome::AlreadyMarked,
                    notice,
                };
            }
            name
        };

        let existing =
            Filter::by("session_id", self.session_id.as_str()).and("student_id", student_id);
        match self.store.select_single(Table::Attendance, &existing).await {
            Ok(Some(_)) => {
                tracing::debug!(student = %student_id, "attendance already stored");
                let mut st = self.lock();
                let notice = self.already_marked(&mut st, student_id, &name, now);
                return Reported {
                    outcome: MarkOutcome::AlreadyMarked,
                    notice,
                };
            }
            Ok(None) => {}
            Err(e) => return self.mark_failed(student_id, e),
        }

        let attendance = Attendance::new(
            &self.session_id,
            student_id,
            method,
            confidence,
            &self.marked_by,
        );
        let attendance_id = match insert_one(&*self.store, Table::Attendance, &attendance).await {
            Ok(id) => id,
            Err(e) if e.is_conflict() => {
                tracing::debug!(student = %student_id, "lost insert race; already marked");
                let mut st = self.lock();
                let notice = self.already_marked(&mut st, student_id, &name, now);
                return Reported {
                    outcome: MarkOutcome::AlreadyMarked,
                    notice,
                };
            }
            Err(e) => return self.mark_failed(student_id, e),
        };

        tracing::info!(
            session = %self.session_id,
            student = %student_id,
            method = method.as_str(),
            confidence = ?attendance.confidence,
            "attendance marked"
        );
        self.ensure_live().await;

        Reported {
            outcome: MarkOutcome::Marked { attendance_id },
            notice: Some(Notice::Marked {
                student_id: student_id.to_string(),
                name,
            }),
        }
    }

    /// Reload attendance from the store and reset the guard set to match.
    pub async fn refresh(&self) -> Result<Vec<Attendance>, CaptureError> {
        let attendance: Vec<Attendance> = select_as(
            &*self.store,
            Table::Attendance,
            &Filter::by("session_id", self.session_id.as_str()),
        )
        .await?;
        self.lock().marked = attendance.iter().map(|a| a.student_id.clone()).collect();
        tracing::info!(
            session = %self.session_id,
            count = attendance.len(),
            "attendance refreshed"
        );
        Ok(attendance)
    }

    fn not_recognized(&self, now: Instant) -> Option<Notice> {
        let mut st = self.lock();
        st.recognized = None;
        st.limiter
            .allow(NoticeKey::NotRecognized, self.policy.not_recognized_cooldown, now)
            .then_some(Notice::NotRecognized)
    }

    fn already_marked(
        &self,
        st: &mut CaptureState,
        student_id: &str,
        name: &str,
        now: Instant,
    ) -> Option<Notice> {
        st.limiter
            .allow(
                NoticeKey::AlreadyMarked(student_id.to_string()),
                self.policy.already_marked_cooldown,
                now,
            )
            .then(|| Notice::AlreadyMarked {
                student_id: student_id.to_string(),
                name: name.to_string(),
            })
    }

    fn mark_failed(&self, student_id: &str, error: StoreError) -> Reported<MarkOutcome> {
        self.lock().marked.remove(student_id);
        tracing::warn!(
            session = %self.session_id,
            student = %student_id,
            error = %error,
            "failed to mark attendance"
        );
        let reason = error.to_string();
        Reported {
            outcome: MarkOutcome::Failed {
                error: reason.clone(),
            },
            notice: Some(Notice::MarkFailed {
                student_id: student_id.to_string(),
                reason,
            }),
        }
    }

    /// Move an upcoming session to live. Ended sessions stay ended.
    ///
    /// The write only applies while the stored status is still `upcoming`;
    /// when it matches nothing the session was moved elsewhere and the cached
    /// status is reloaded.
    async fn ensure_live(&self) {
        if self.lock().session.status != SessionStatus::Upcoming {
            return;
        }

        let mut updates = Record::new();
        updates.insert("status".into(), SessionStatus::Live.as_str().into());
        let filter = Filter::by("id", self.session_id.as_str())
            .and("status", SessionStatus::Upcoming.as_str());
        match self.store.update(Table::Sessions, &filter, &updates).await {
            Ok(0) => self.reload_status().await,
            Ok(_) => {
                let mut st = self.lock();
                if st.session.status.can_transition_to(SessionStatus::Live) {
                    st.session.status = SessionStatus::Live;
                    tracing::info!(session = %self.session_id, "session is live");
                }
            }
            Err(e) => {
                tracing::warn!(
                    session = %self.session_id,
                    error = %e,
                    "failed to set session live"
                );
            }
        }
    }

    async fn reload_status(&self) {
        let filter = Filter::by("id", self.session_id.as_str());
        match select_one_as::<Session>(&*self.store, Table::Sessions, &filter).await {
            Ok(Some(session)) => {
                let mut st = self.lock();
                if st.session.status.can_transition_to(session.status) {
                    tracing::info!(
                        session = %self.session_id,
                        status = session.status.as_str(),
                        "session status changed elsewhere"
                    );
                    st.session.status = session.status;
                }
            }
            Ok(None) => tracing::warn!(session = %self.session_id, "session record disappeared"),
            Err(e) => {
                tracing::warn!(
                    session = %self.session_id,
                    error = %e,
                    "failed to reload session status"
                );
            }
        }
    }
}

async fn load_roster(store: &dyn RecordStore, class_id: &str) -> Result<Vec<Student>, StoreError> {
    let members: Vec<ClassStudent> =
        select_as(store, Table::ClassStudents, &Filter::by("class_id", class_id)).await?;

    if members.is_empty() {
        tracing::debug!(class = %class_id, "class has no members; using all students");
        return select_as(store, Table::Students, &Filter::all().order_by("name", true)).await;
    }

    let mut roster = Vec::with_capacity(members.len());
    for member in &members {
        let by_id = Filter::by("id", member.student_id.as_str());
        match select_one_as::<Student>(store, Table::Students, &by_id).await? {
            Some(student) => roster.push(student),
            None => tracing::warn!(
                class = %class_id,
                student = %member.student_id,
                "class member has no student record"
            ),
        }
    }
    Ok(roster)
}

fn gallery_of(roster: &[Student]) -> Vec<EnrolledDescriptor> {
    roster
        .iter()
        .filter_map(|s| {
            let descriptor = s.descriptor.as_ref()?;
            (!descriptor.is_empty()).then(|| EnrolledDescriptor {
                student_id: s.id.clone(),
                descriptor: descriptor.clone(),
            })
        })
        .collect()
}
