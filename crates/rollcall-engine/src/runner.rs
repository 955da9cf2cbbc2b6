//! Timer-driven detection loop.
//!
//! Every tick grabs the latest frame and, if no detection is in flight, runs
//! detection and capture on a spawned task. A single-permit semaphore is the
//! in-flight token: a tick that cannot take it is skipped, never queued.

use crate::capture::{AttendanceCapture, CaptureError};
use crate::detect::{FaceDetector, FrameSource};
use crate::notice::Notice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running capture loop.
pub struct CaptureRunner {
    active: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    camera: Arc<dyn FrameSource>,
}

impl CaptureRunner {
    /// Acquire the camera and start ticking at the capture policy's cadence.
    /// Notices that survive rate limiting are sent on `notices`.
    pub fn start(
        capture: Arc<AttendanceCapture>,
        detector: Arc<dyn FaceDetector>,
        camera: Arc<dyn FrameSource>,
        notices: mpsc::Sender<Notice>,
    ) -> Result<Self, CaptureError> {
        camera.acquire()?;

        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            capture,
            detector,
            camera.clone(),
            notices,
            active.clone(),
            stop_rx,
        ));

        Ok(Self {
            active,
            stop_tx: Some(stop_tx),
            task: Some(task),
            camera,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop ticking and release the camera. Detection already in flight runs
    /// to completion but its notices are dropped.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "capture loop ended abnormally");
            }
        }
        tracing::info!("capture stopped");
    }

    fn shutdown(&mut self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.camera.release();
    }
}

impl Drop for CaptureRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_loop(
    capture: Arc<AttendanceCapture>,
    detector: Arc<dyn FaceDetector>,
    camera: Arc<dyn FrameSource>,
    notices: mpsc::Sender<Notice>,
    active: Arc<AtomicBool>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(capture.policy().cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let in_flight = Arc::new(Semaphore::new(1));

    tracing::info!(
        session = %capture.session_id(),
        cadence_ms = capture.policy().cadence.as_millis() as u64,
        "capture started"
    );

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {}
        }
        if !active.load(Ordering::SeqCst) {
            break;
        }

        let Ok(permit) = in_flight.clone().try_acquire_owned() else {
            tracing::debug!("detection still in flight; skipping tick");
            continue;
        };

        let frame = match camera.latest_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                continue;
            }
        };
        if frame.is_dark() {
            tracing::debug!(sequence = frame.sequence, "dark frame skipped");
            continue;
        }

        let capture = capture.clone();
        let detector = detector.clone();
        let notices = notices.clone();
        let active = active.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let faces = match detector.detect(&frame).await {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(error = %e, "face detection failed");
                    return;
                }
            };
            let reported = capture.handle_frame(&faces, Instant::now()).await;
            if !active.load(Ordering::SeqCst) {
                tracing::debug!(outcome = ?reported.outcome, "capture stopped; discarding result");
                return;
            }
            if let Some(notice) = reported.notice {
                let _ = notices.send(notice).await;
            }
        });
    }
}
