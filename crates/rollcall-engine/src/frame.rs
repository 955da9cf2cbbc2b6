//! Frame type and pre-detection screening.

use std::time::Instant;

/// Fraction of near-black pixels at or above which a frame is dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// Pixels below this value count as near-black.
const DARK_PIXEL: u8 = 32;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.data, DARK_FRAME_THRESHOLD)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// True when at least `threshold_pct` of pixels are near-black. Empty frames
/// are dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < DARK_PIXEL).count();
    (dark_count as f32 / gray.len() as f32) >= threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dark_frame_all_black() {
        let gray = vec![0u8; 1000];
        assert!(is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_normal() {
        let gray = vec![128u8; 1000];
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_exactly_at_threshold() {
        // 95% dark → dark
        let mut gray = vec![10u8; 950];
        gray.extend(vec![128u8; 50]);
        assert!(is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_frame_is_dark_uses_pixel_share() {
        // Half the pixels near-black.
        let frame = Frame::new(vec![0, 0, 40, 40], 2, 2, 0);
        assert!(!frame.is_dark());
        let frame = Frame::new(vec![0; 20], 5, 4, 1);
        assert!(frame.is_dark());
    }
}
