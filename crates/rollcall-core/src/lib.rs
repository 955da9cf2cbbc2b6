//! rollcall-core — Record model and face descriptor matching.
//!
//! Defines the closed set of record tables, the typed entities stored in
//! them, and the Euclidean descriptor matcher used by live capture.

pub mod matcher;
pub mod table;
pub mod types;

pub use matcher::{
    find_best_match, similarity, Descriptor, EnrolledDescriptor, EuclideanMatcher, MatchResult,
    Matcher, DEFAULT_MIN_SIMILARITY, REFERENCE_DISTANCE,
};
pub use table::{Table, UnknownTable};
pub use types::{
    from_record, new_id, to_record, Attendance, AttendanceMethod, Class, ClassStudent, Record,
    RecordError, Session, SessionStatus, Student, User, UserRole, UserRoleRecord,
};
