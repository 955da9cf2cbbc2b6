//! rollcall-engine — Live attendance capture.
//!
//! Turns camera frames into attendance rows: frames are screened, faces are
//! detected and matched against the session's roster, and each student is
//! marked at most once per session. Also hosts the session lifecycle and
//! descriptor enrollment operations that feed the matcher.

pub mod capture;
pub mod detect;
pub mod enroll;
pub mod frame;
pub mod notice;
pub mod policy;
pub mod runner;
pub mod session;

pub use capture::{
    AttendanceCapture, CaptureError, CaptureOutcome, MarkOutcome, Recognized, Reported,
};
pub use detect::{
    BoundingBox, CameraError, DescriptorSource, DetectedFace, DetectorError, FaceDetector,
    FrameSource,
};
pub use enroll::{refresh_missing_descriptors, update_student_photo};
pub use frame::{is_dark_frame, Frame, DARK_FRAME_THRESHOLD};
pub use notice::{Notice, NoticeKey, NoticeLimiter, Severity};
pub use policy::CapturePolicy;
pub use runner::CaptureRunner;
pub use session::{
    add_to_class, end_session, remove_from_class, set_mark, start_session, LifecycleError,
};
