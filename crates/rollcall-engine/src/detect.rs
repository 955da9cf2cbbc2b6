//! Capabilities the capture loop consumes: a camera, a face detector, and a
//! photo-to-descriptor extractor. Implementations live with the host.

use crate::frame::Frame;
use async_trait::async_trait;
use rollcall_core::Descriptor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera not found: {0}")]
    DeviceNotFound(String),
    #[error("camera is in use by another application")]
    DeviceBusy,
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Error, Debug)]
pub enum DetectorError {
    /// Models are not loaded; recognition cannot run at all.
    #[error("face recognition unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("photo could not be loaded: {0}")]
    Photo(String),
}

/// Face bounding box in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One detected face.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Detector score (0.0–1.0).
    pub confidence: f32,
    /// `None` when only detection ran (no recognition model).
    pub descriptor: Option<Descriptor>,
}

/// Source of live frames.
pub trait FrameSource: Send + Sync {
    /// Claim the device. Failure here is fatal to a capture run.
    fn acquire(&self) -> Result<(), CameraError>;

    /// Most recent frame, or `None` if the stream has nothing yet.
    fn latest_frame(&self) -> Result<Option<Frame>, CameraError>;

    fn release(&self);
}

#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Faces in the frame, best first.
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError>;
}

#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Descriptor of the single face in a stored photo; `None` when no face
    /// is found.
    async fn compute(&self, photo_url: &str) -> Result<Option<Descriptor>, DetectorError>;
}
