//! Capture surfaces: the camera stream that feeds continuous decoding.
//!
//! A [`CaptureSurface`] owns exactly one [`FrameSource`]. Activating it
//! releases any previous stream before opening a new one; deactivating it
//! cancels the per-frame loop, waits for the loop task to finish and then
//! stops the stream, so no decode attempt can run after `deactivate` returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::reader::QrReader;

// ============================================================================
// Frame sources
// ============================================================================

/// Errors raised while acquiring a capture device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the platform refused access to the camera
    #[error("Camera permission was denied")]
    PermissionDenied,

    /// No usable device, or the device is busy
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    /// Continuous decoding requested on an inactive surface
    #[error("Capture surface is not active")]
    Inactive,
}

/// A live video stream.
///
/// # Thread Safety
///
/// Sources are moved into the decode task, hence `Send + 'static`.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Acquires the device and starts streaming.
    async fn open(&mut self) -> Result<(), CaptureError>;

    /// Most recent frame, or `None` while the stream has nothing ready.
    async fn latest_frame(&mut self) -> Option<RgbaImage>;

    /// Stops every track and releases the device. Must be idempotent.
    fn stop(&mut self);
}

/// Replays image files as if they were consecutive camera frames.
///
/// Each call to `latest_frame` advances to the next file; once the list is
/// exhausted the stream holds on the last frame.
#[derive(Debug)]
pub struct ReplaySource {
    frames: Vec<PathBuf>,
    position: usize,
    open: bool,
}

impl ReplaySource {
    pub fn new(frames: Vec<PathBuf>) -> Self {
        Self {
            frames,
            position: 0,
            open: false,
        }
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn open(&mut self) -> Result<(), CaptureError> {
        if self.frames.is_empty() {
            return Err(CaptureError::Unavailable("no frames to replay".to_string()));
        }
        self.position = 0;
        self.open = true;
        Ok(())
    }

    async fn latest_frame(&mut self) -> Option<RgbaImage> {
        if !self.open {
            return None;
        }
        let index = self.position.min(self.frames.len().saturating_sub(1));
        self.position = self.position.saturating_add(1);

        let path = self.frames.get(index)?;
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read frame");
                return None;
            }
        };
        image::load_from_memory(&bytes).ok().map(|img| img.to_rgba8())
    }

    fn stop(&mut self) {
        self.open = false;
    }
}

// ============================================================================
// Capture surface
// ============================================================================

struct ScanTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct CaptureSurface<S: FrameSource> {
    source: Arc<Mutex<S>>,
    reader: QrReader,
    frame_interval: Duration,
    scan: Option<ScanTask>,
    active: bool,
}

impl<S: FrameSource> CaptureSurface<S> {
    /// `frame_interval` is the sampling cadence of continuous mode
    /// (display refresh, ~16 ms by default in the config).
    pub fn new(source: S, frame_interval: Duration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            reader: QrReader::new(),
            frame_interval,
            scan: None,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_scanning(&self) -> bool {
        self.scan
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Opens the stream, releasing any previous one first.
    pub async fn activate(&mut self) -> Result<(), CaptureError> {
        self.deactivate().await;
        self.source.lock().await.open().await?;
        self.active = true;
        info!("Capture surface activated");
        Ok(())
    }

    /// Starts sampling frames until a code is found or the surface is
    /// deactivated. The receiver resolves with the decoded text; it errors
    /// if the loop was cancelled first.
    pub fn start_continuous(&mut self) -> Result<oneshot::Receiver<String>, CaptureError> {
        if !self.active {
            return Err(CaptureError::Inactive);
        }
        if let Some(previous) = self.scan.take() {
            let _ = previous.cancel.send(true);
            previous.handle.abort();
        }

        let (found_tx, found_rx) = oneshot::channel();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let source = Arc::clone(&self.source);
        let reader = self.reader;
        let frame_interval = self.frame_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *cancel_rx.borrow() {
                    break;
                }

                let frame = source.lock().await.latest_frame().await;
                let Some(frame) = frame else {
                    continue;
                };

                if let Some(code) = reader.scan_frame(&frame) {
                    info!(code = %code, "QR code detected");
                    let _ = found_tx.send(code);
                    break;
                }
                debug!("No code in frame");
            }
        });

        self.scan = Some(ScanTask {
            cancel: cancel_tx,
            handle,
        });
        Ok(found_rx)
    }

    /// Cancels continuous decoding and stops the stream.
    pub async fn deactivate(&mut self) {
        if let Some(task) = self.scan.take() {
            let _ = task.cancel.send(true);
            task.handle.abort();
            // Wait for the loop to unwind so nothing runs after we return
            let _ = task.handle.await;
        }
        if self.active {
            self.source.lock().await.stop();
            self.active = false;
            info!("Capture surface deactivated");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::fixtures::qr_frame;
    use image::Rgba;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // Camera mock: serves blank frames until `reveal_after` pulls, then the code
    struct MockCamera {
        pulls: Arc<AtomicUsize>,
        opens: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
        reveal_after: Option<usize>,
        deny: bool,
    }

    impl MockCamera {
        fn new(reveal_after: Option<usize>) -> Self {
            Self {
                pulls: Arc::new(AtomicUsize::new(0)),
                opens: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicBool::new(false)),
                reveal_after,
                deny: false,
            }
        }
    }

    #[async_trait]
    impl FrameSource for MockCamera {
        async fn open(&mut self) -> Result<(), CaptureError> {
            if self.deny {
                return Err(CaptureError::PermissionDenied);
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.stopped.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn latest_frame(&mut self) -> Option<RgbaImage> {
            let pulls = self.pulls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.reveal_after {
                Some(n) if pulls >= n => Some(qr_frame("GLS-1234", 4)),
                _ => Some(RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]))),
            }
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_continuous_scan_finds_code() {
        let camera = MockCamera::new(Some(3));
        let pulls = camera.pulls.clone();
        let mut surface = CaptureSurface::new(camera, Duration::from_millis(1));

        surface.activate().await.unwrap();
        let code = surface.start_continuous().unwrap().await.unwrap();
        assert_eq!(code, "GLS-1234");
        assert_eq!(pulls.load(Ordering::SeqCst), 3);

        // The loop stops by itself once a code is found
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
        assert!(!surface.is_scanning());
    }

    #[tokio::test]
    async fn test_no_decode_attempts_after_deactivate() {
        let camera = MockCamera::new(None);
        let pulls = camera.pulls.clone();
        let stopped = camera.stopped.clone();
        let mut surface = CaptureSurface::new(camera, Duration::from_millis(1));

        surface.activate().await.unwrap();
        let found = surface.start_continuous().unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        surface.deactivate().await;
        let after_deactivate = pulls.load(Ordering::SeqCst);
        assert!(after_deactivate > 0);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(found.await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pulls.load(Ordering::SeqCst), after_deactivate);
    }

    #[tokio::test]
    async fn test_reactivation_releases_previous_stream() {
        let camera = MockCamera::new(None);
        let opens = camera.opens.clone();
        let stopped = camera.stopped.clone();
        let mut surface = CaptureSurface::new(camera, Duration::from_millis(1));

        surface.activate().await.unwrap();
        let _ = surface.start_continuous().unwrap();
        surface.activate().await.unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert!(!stopped.load(Ordering::SeqCst));
        assert!(!surface.is_scanning());
        surface.deactivate().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_surface_inactive() {
        let mut camera = MockCamera::new(None);
        camera.deny = true;
        let mut surface = CaptureSurface::new(camera, Duration::from_millis(1));

        assert_eq!(surface.activate().await, Err(CaptureError::PermissionDenied));
        assert!(!surface.is_active());
        assert_eq!(surface.start_continuous().unwrap_err(), CaptureError::Inactive);
    }

    #[tokio::test]
    async fn test_replay_source_holds_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let blank = dir.path().join("0.png");
        let code = dir.path().join("1.png");
        RgbaImage::from_pixel(32, 32, Rgba([255, 255, 255, 255]))
            .save(&blank)
            .unwrap();
        qr_frame("GLS-1234", 4).save(&code).unwrap();

        let mut surface =
            CaptureSurface::new(ReplaySource::new(vec![blank, code]), Duration::from_millis(1));
        surface.activate().await.unwrap();
        let found = surface.start_continuous().unwrap().await.unwrap();
        assert_eq!(found, "GLS-1234");
        surface.deactivate().await;
    }
}
