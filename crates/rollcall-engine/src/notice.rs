//! User-visible notices and their rate limiting.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Marked { student_id: String, name: String },
    AlreadyMarked { student_id: String, name: String },
    /// A face was seen but could not be matched confidently.
    NotRecognized,
    /// Nobody on the roster has a descriptor to match against.
    NoMatchingStudent,
    MarkFailed { student_id: String, reason: String },
}

impl Notice {
    pub fn severity(&self) -> Severity {
        match self {
            Notice::Marked { .. } => Severity::Success,
            Notice::AlreadyMarked { .. } => Severity::Info,
            Notice::NotRecognized | Notice::NoMatchingStudent => Severity::Warning,
            Notice::MarkFailed { .. } => Severity::Error,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Marked { name, .. } => write!(f, "Attendance marked for {name}"),
            Notice::AlreadyMarked { name, .. } => write!(f, "{name} - Already marked"),
            Notice::NotRecognized => f.write_str(
                "Face not recognized clearly. Please come closer or ensure good lighting.",
            ),
            Notice::NoMatchingStudent => {
                f.write_str("No matching student found. Please ensure you are registered.")
            }
            Notice::MarkFailed { reason, .. } => write!(f, "Error marking attendance: {reason}"),
        }
    }
}

/// Rate-limit bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NoticeKey {
    NotRecognized,
    NoMatch,
    AlreadyMarked(String),
}

/// Remembers when each kind of notice was last let through.
#[derive(Debug, Default)]
pub struct NoticeLimiter {
    last: HashMap<NoticeKey, Instant>,
}

impl NoticeLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True, and records `now`, when more than `cooldown` has passed since the
    /// last notice for `key` (or there was none).
    pub fn allow(&mut self, key: NoticeKey, cooldown: Duration, now: Instant) -> bool {
        match self.last.get(&key) {
            Some(&prev) if now.saturating_duration_since(prev) <= cooldown => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }
}
