use rollcall_core::DEFAULT_MIN_SIMILARITY;
use std::time::Duration;

/// Thresholds and timings for live capture.
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    /// Detector score below which a face is ignored.
    pub min_detection_confidence: f32,
    /// Match similarity a student must exceed to be marked.
    pub min_similarity: f32,
    /// Interval between detection ticks.
    pub cadence: Duration,
    pub not_recognized_cooldown: Duration,
    pub already_marked_cooldown: Duration,
    pub no_match_cooldown: Duration,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            cadence: Duration::from_millis(500),
            not_recognized_cooldown: Duration::from_secs(3),
            already_marked_cooldown: Duration::from_secs(5),
            no_match_cooldown: Duration::from_secs(5),
        }
    }
}

impl CapturePolicy {
    /// Defaults overridden by `ROLLCALL_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_detection_confidence: env_f32(
                "ROLLCALL_MIN_DETECTION_CONFIDENCE",
                defaults.min_detection_confidence,
            ),
            min_similarity: env_f32("ROLLCALL_MIN_SIMILARITY", defaults.min_similarity),
            cadence: Duration::from_millis(env_u64("ROLLCALL_CADENCE_MS", 500)),
            ..defaults
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = CapturePolicy::default();
        assert_eq!(p.min_detection_confidence, 0.5);
        assert_eq!(p.min_similarity, 0.65);
        assert_eq!(p.cadence, Duration::from_millis(500));
        assert_eq!(p.not_recognized_cooldown, Duration::from_secs(3));
        assert_eq!(p.already_marked_cooldown, Duration::from_secs(5));
    }
}
