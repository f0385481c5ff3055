//! Single-shot capture: take a picture, normalize it, queue it.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use log::{error, info, warn};

use crate::notify::{Notice, NoticeSink};
use crate::store::{CachedPhoto, PhotoStore, StoreError};

/// Normalized photos are never wider than this.
pub const MAX_WIDTH: u32 = 800;
/// JPEG quality used when re-encoding (compression factor 0.7).
pub const JPEG_QUALITY: u8 = 70;
/// Capture quality handed to the camera, 0.0..=1.0.
pub const DEFAULT_CAPTURE_QUALITY: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// The user has not been asked yet.
    Undetermined,
}

/// Pluggable camera handle.
pub trait Camera: Send {
    fn permission(&self) -> Permission;

    /// True once a live session is available for capture.
    fn is_ready(&self) -> bool;

    /// Takes one picture and returns the encoded image bytes.
    fn take_picture(&mut self, quality: f32) -> Result<Vec<u8>>;
}

/// Camera stand-in that "captures" a still image from disk.
#[derive(Debug, Clone)]
pub struct StillFileCamera {
    path: PathBuf,
}

impl StillFileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Camera for StillFileCamera {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn is_ready(&self) -> bool {
        self.path.is_file()
    }

    // A still file has a fixed quality; the requested one is ignored.
    fn take_picture(&mut self, _quality: f32) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("read still image {}", self.path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Normalizing,
    Saved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CameraNotReady,
    /// Another capture has not finished yet.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved(CachedPhoto),
    Rejected(RejectReason),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera permission has not been granted")]
    PermissionDenied,
    #[error("camera capture failed: {0}")]
    Camera(String),
    #[error("failed to normalize image: {0}")]
    Normalize(#[from] image::ImageError),
    #[error(transparent)]
    CacheIo(#[from] StoreError),
}

/// Drives one capture at a time from shutter press to a queued photo.
pub struct CaptureController<C: Camera> {
    camera: Mutex<C>,
    store: Arc<PhotoStore>,
    notices: Arc<dyn NoticeSink>,
    state: Mutex<CaptureState>,
    quality: f32,
}

impl<C: Camera> CaptureController<C> {
    pub fn new(camera: C, store: Arc<PhotoStore>, notices: Arc<dyn NoticeSink>) -> Self {
        Self {
            camera: Mutex::new(camera),
            store,
            notices,
            state: Mutex::new(CaptureState::Idle),
            quality: DEFAULT_CAPTURE_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    pub fn state(&self) -> CaptureState {
        *lock(&self.state)
    }

    /// Handles a shutter press.
    ///
    /// Presses that arrive while a capture is running, or before the camera is
    /// ready, are rejected without touching the store.
    pub fn capture(&self) -> Result<CaptureOutcome, CaptureError> {
        let Some(busy) = BusyGuard::acquire(&self.state) else {
            info!("Capture already in progress, ignoring shutter press");
            return Ok(CaptureOutcome::Rejected(RejectReason::Busy));
        };

        let mut camera = lock(&self.camera);
        match camera.permission() {
            Permission::Granted => {}
            Permission::Denied => {
                warn!("Camera permission denied");
                self.notices
                    .show(Notice::blocking("We need your permission to use the camera"));
                return Err(CaptureError::PermissionDenied);
            }
            Permission::Undetermined => {
                info!("Camera permission not decided yet, ignoring shutter press");
                return Ok(CaptureOutcome::Rejected(RejectReason::CameraNotReady));
            }
        }
        if !camera.is_ready() {
            info!("Camera not ready, ignoring shutter press");
            return Ok(CaptureOutcome::Rejected(RejectReason::CameraNotReady));
        }

        let raw = camera
            .take_picture(self.quality)
            .map_err(|err| self.fail(CaptureError::Camera(format!("{err:#}"))))?;
        drop(camera);

        busy.set(CaptureState::Normalizing);
        let jpeg = normalize(&raw).map_err(|err| self.fail(err.into()))?;

        busy.set(CaptureState::Saved);
        let sequence = self.store.next_slot().map_err(|err| self.fail(err.into()))?;
        let path = self
            .store
            .save(&jpeg, sequence)
            .map_err(|err| self.fail(err.into()))?;

        self.notices.show(Notice::capture_saved(&path));
        Ok(CaptureOutcome::Saved(CachedPhoto { sequence, path }))
    }

    fn fail(&self, err: CaptureError) -> CaptureError {
        error!("Error taking picture: {err}");
        self.notices.show(Notice::error(format!("Capture failed: {err}")));
        err
    }
}

/// Resizes to at most [`MAX_WIDTH`] (keeping aspect ratio) and re-encodes as JPEG.
pub fn normalize(raw: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(raw)?;
    let img = if img.width() > MAX_WIDTH {
        let height = (f64::from(img.height()) * f64::from(MAX_WIDTH) / f64::from(img.width()))
            .round()
            .max(1.0) as u32;
        img.resize_exact(MAX_WIDTH, height, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder.encode_image(&rgb)?;
    }
    Ok(out)
}

/// Holds the controller out of `Idle` for the lifetime of one capture.
struct BusyGuard<'a> {
    state: &'a Mutex<CaptureState>,
}

impl<'a> BusyGuard<'a> {
    fn acquire(state: &'a Mutex<CaptureState>) -> Option<Self> {
        let mut current = lock(state);
        if *current != CaptureState::Idle {
            return None;
        }
        *current = CaptureState::Capturing;
        Some(Self { state })
    }

    fn set(&self, next: CaptureState) {
        *lock(self.state) = next;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = CaptureState::Idle;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoticeLevel;
    use crate::notify::testing::RecordingNotices;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40])));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    struct FakeCamera {
        permission: Permission,
        ready: bool,
        frame: Result<Vec<u8>, String>,
        // When set, take_picture blocks until the sender side fires.
        gate: Option<mpsc::Receiver<()>>,
    }

    impl FakeCamera {
        fn with_frame(frame: Vec<u8>) -> Self {
            Self {
                permission: Permission::Granted,
                ready: true,
                frame: Ok(frame),
                gate: None,
            }
        }
    }

    impl Camera for FakeCamera {
        fn permission(&self) -> Permission {
            self.permission
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn take_picture(&mut self, _quality: f32) -> Result<Vec<u8>> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            self.frame.clone().map_err(anyhow::Error::msg)
        }
    }

    fn controller(
        camera: FakeCamera,
    ) -> (TempDir, Arc<PhotoStore>, Arc<RecordingNotices>, CaptureController<FakeCamera>) {
        let root = TempDir::new().expect("temp dir");
        let store = Arc::new(PhotoStore::new(root.path()));
        let notices = Arc::new(RecordingNotices::default());
        let controller = CaptureController::new(camera, store.clone(), notices.clone());
        (root, store, notices, controller)
    }

    #[test]
    fn normalize_shrinks_wide_images_to_max_width() {
        let jpeg = normalize(&png(1600, 1200)).expect("normalize");
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 600));
    }

    #[test]
    fn normalize_keeps_narrow_images_at_their_size() {
        let jpeg = normalize(&png(400, 300)).expect("normalize");
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 300));
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(normalize(b"definitely not an image").is_err());
    }

    #[test]
    fn capture_saves_normalized_photo_and_notifies() {
        let (_root, store, notices, controller) = controller(FakeCamera::with_frame(png(1200, 900)));

        let outcome = controller.capture().expect("capture");
        let CaptureOutcome::Saved(photo) = outcome else {
            panic!("expected a saved photo, got {outcome:?}");
        };
        assert_eq!(photo.sequence, 0);
        assert_eq!(controller.state(), CaptureState::Idle);

        let saved = image::load_from_memory(&fs::read(&photo.path).unwrap()).unwrap();
        assert_eq!(saved.width(), MAX_WIDTH);
        assert_eq!(store.list_all().unwrap(), vec![photo.clone()]);

        let shown = notices.taken();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0], Notice::capture_saved(&photo.path));
        assert_eq!(shown[0].ttl, Some(crate::notify::CAPTURE_NOTICE_TTL));
    }

    #[test]
    fn repeated_captures_use_consecutive_slots() {
        let (_root, store, _notices, controller) = controller(FakeCamera::with_frame(png(64, 48)));
        for _ in 0..4 {
            controller.capture().expect("capture");
        }
        let sequences: Vec<u32> = store.list_all().unwrap().iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn camera_not_ready_is_a_no_op() {
        let mut camera = FakeCamera::with_frame(png(64, 48));
        camera.ready = false;
        let (_root, store, notices, controller) = controller(camera);

        assert_eq!(
            controller.capture().unwrap(),
            CaptureOutcome::Rejected(RejectReason::CameraNotReady)
        );
        assert!(store.list_all().unwrap().is_empty());
        assert!(notices.taken().is_empty());
    }

    #[test]
    fn undetermined_permission_is_not_ready() {
        let mut camera = FakeCamera::with_frame(png(64, 48));
        camera.permission = Permission::Undetermined;
        let (_root, _store, _notices, controller) = controller(camera);

        assert_eq!(
            controller.capture().unwrap(),
            CaptureOutcome::Rejected(RejectReason::CameraNotReady)
        );
    }

    #[test]
    fn denied_permission_raises_a_blocking_notice() {
        let mut camera = FakeCamera::with_frame(png(64, 48));
        camera.permission = Permission::Denied;
        let (_root, store, notices, controller) = controller(camera);

        assert!(matches!(controller.capture(), Err(CaptureError::PermissionDenied)));
        assert!(store.list_all().unwrap().is_empty());

        let shown = notices.taken();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].level, NoticeLevel::Blocking);
        assert_eq!(shown[0].ttl, None);
    }

    #[test]
    fn camera_failure_returns_to_idle_without_saving() {
        let mut camera = FakeCamera::with_frame(Vec::new());
        camera.frame = Err("sensor unplugged".into());
        let (_root, store, notices, controller) = controller(camera);

        let err = controller.capture().unwrap_err();
        assert!(matches!(err, CaptureError::Camera(ref msg) if msg.contains("sensor unplugged")));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(store.list_all().unwrap().is_empty());
        assert_eq!(notices.taken()[0].level, NoticeLevel::Error);

        // Nothing was reserved, so the next good capture still gets slot 0.
        assert_eq!(store.next_slot().unwrap(), 0);
    }

    #[test]
    fn undecodable_frame_is_a_normalize_failure() {
        let (_root, store, _notices, controller) =
            controller(FakeCamera::with_frame(b"not an image".to_vec()));

        assert!(matches!(controller.capture(), Err(CaptureError::Normalize(_))));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn second_press_during_capture_is_rejected() {
        let (release, gate) = mpsc::channel();
        let mut camera = FakeCamera::with_frame(png(64, 48));
        camera.gate = Some(gate);
        let (_root, store, _notices, controller) = controller(camera);
        let controller = Arc::new(controller);

        let first = {
            let controller = controller.clone();
            thread::spawn(move || controller.capture())
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.state() == CaptureState::Idle {
            assert!(Instant::now() < deadline, "first capture never started");
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(
            controller.capture().unwrap(),
            CaptureOutcome::Rejected(RejectReason::Busy)
        );

        release.send(()).unwrap();
        let outcome = first.join().unwrap().expect("first capture");
        assert!(matches!(outcome, CaptureOutcome::Saved(ref p) if p.sequence == 0));
        assert_eq!(store.list_all().unwrap().len(), 1);
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn still_file_camera_reads_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("still.png");
        fs::write(&path, png(10, 10)).unwrap();

        let mut camera = StillFileCamera::new(&path);
        assert!(camera.is_ready());
        assert_eq!(camera.take_picture(1.0).unwrap(), fs::read(&path).unwrap());

        let missing = StillFileCamera::new(dir.path().join("missing.png"));
        assert!(!missing.is_ready());
    }
}
