//! Camera Capture
//!
//! Each camera runs a dedicated capture thread that grabs frames at the
//! device's native rate and publishes them into a single-slot
//! [`LatestFrameCell`]. The control loop never blocks on a camera: it
//! samples whatever frame is newest at the tick, and a monotonically
//! increasing generation counter lets the synchronizer tell a fresh frame
//! from a repeat of the previous one.
//!
//! The cell holds exactly one frame, so memory stays bounded no matter how
//! far a camera runs ahead of the control rate; older frames are simply
//! replaced. Capture failures keep the last good frame in place and are
//! logged, never propagated into the tick.
//!
//! Grabbers are created inside the capture thread, so camera handles never
//! cross threads. `open` blocks until the first frame arrives or a timeout
//! expires, which turns a dead camera into a startup error instead of a
//! session full of repeated frames.

use crate::clock::Clock;
use crate::config::{CameraConfig, CameraTransport};
use crate::error::{Result, TelerecError};
use crate::types::FrameData;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll interval while waiting for the first frame
const STARTUP_POLL: Duration = Duration::from_millis(5);

/// One published frame with its position in the camera's frame sequence
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Monotonic per-camera frame counter, starts at 1
    pub generation: u64,
    /// Capture time on the session timeline
    pub captured_at: Duration,
    /// Pixel data, shared so publishing never copies
    pub data: Arc<FrameData>,
}

/// Single-slot cell holding the newest frame from one camera
///
/// One capture thread writes; any number of readers snapshot. Replacing
/// the slot drops the previous frame, keeping memory bounded to one frame
/// per camera.
pub struct LatestFrameCell {
    slot: Mutex<Option<FrameSnapshot>>,
    generation: AtomicU64,
}

impl LatestFrameCell {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Publish a frame, replacing whatever was in the slot
    pub fn store(&self, data: FrameData, captured_at: Duration) -> u64 {
        let mut slot = self.slot.lock();
        let generation = self.generation.load(Ordering::Relaxed) + 1;
        *slot = Some(FrameSnapshot {
            generation,
            captured_at,
            data: Arc::new(data),
        });
        self.generation.store(generation, Ordering::Release);
        generation
    }

    /// Snapshot the newest frame, if any has arrived yet
    pub fn latest(&self) -> Option<FrameSnapshot> {
        self.slot.lock().clone()
    }

    /// Generation of the newest frame; 0 before the first frame
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for LatestFrameCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability interface for one frame source
///
/// Implementations live entirely on the capture thread and need not be
/// `Send`.
pub trait FrameGrabber {
    /// Open the device and start streaming
    fn open(&mut self) -> Result<()>;

    /// Block until the next frame and return it as RGB8
    fn grab(&mut self) -> Result<FrameData>;

    /// Stop streaming and release the device
    fn close(&mut self);
}

/// Startup handshake between `Camera::open` and its capture thread
enum StartupState {
    Opening,
    Streaming,
    Failed(String),
}

/// One camera: a capture thread feeding a latest-frame cell
pub struct Camera {
    id: String,
    width: u32,
    height: u32,
    fps: u32,
    cell: Arc<LatestFrameCell>,
    running: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl Camera {
    /// Start capturing and block until the first frame or the timeout
    pub fn open(
        config: &CameraConfig,
        clock: Arc<dyn Clock>,
        capture_timeout: Duration,
    ) -> Result<Self> {
        let cell = Arc::new(LatestFrameCell::new());
        let running = Arc::new(AtomicBool::new(true));
        let startup = Arc::new(Mutex::new(StartupState::Opening));

        let worker = {
            let thread_config = config.clone();
            let cell = cell.clone();
            let running = running.clone();
            let startup = startup.clone();
            std::thread::Builder::new()
                .name(format!("cam-{}", config.id))
                .spawn(move || capture_loop(thread_config, cell, running, startup, clock))
                .map_err(|e| TelerecError::camera(&config.id, format!("spawn capture thread: {}", e)))?
        };

        let mut camera = Self {
            id: config.id.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
            cell,
            running,
            worker: Some(worker),
        };

        let deadline = Instant::now() + capture_timeout;
        loop {
            if let Some(first) = camera.cell.latest() {
                // Drivers may negotiate a different geometry than requested;
                // record what the device actually delivers
                if (first.data.width, first.data.height) != (camera.width, camera.height) {
                    tracing::warn!(
                        "Camera '{}' delivers {}x{}, configured {}x{}",
                        camera.id,
                        first.data.width,
                        first.data.height,
                        camera.width,
                        camera.height
                    );
                    camera.width = first.data.width;
                    camera.height = first.data.height;
                }
                tracing::info!("Camera '{}' streaming", camera.id);
                return Ok(camera);
            }
            let failure = match &*startup.lock() {
                StartupState::Failed(msg) => Some(msg.clone()),
                _ => None,
            };
            if let Some(msg) = failure {
                camera.close();
                return Err(TelerecError::camera(&camera.id, msg));
            }
            if Instant::now() >= deadline {
                camera.close();
                return Err(TelerecError::Timeout(format!(
                    "camera '{}' produced no frame within {:?}",
                    camera.id, capture_timeout
                )));
            }
            std::thread::sleep(STARTUP_POLL);
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Newest frame, if one has arrived
    pub fn latest(&self) -> Option<FrameSnapshot> {
        self.cell.latest()
    }

    /// Generation of the newest frame
    pub fn generation(&self) -> u64 {
        self.cell.generation()
    }

    /// Stop the capture thread and wait for it to exit
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open every configured camera, failing if any one cannot start
///
/// Cameras already opened are stopped again when a later one fails.
pub fn open_cameras(
    configs: &[CameraConfig],
    clock: &Arc<dyn Clock>,
    capture_timeout: Duration,
) -> Result<Vec<Camera>> {
    let mut cameras = Vec::with_capacity(configs.len());
    for config in configs {
        let camera = Camera::open(config, clock.clone(), capture_timeout)
            .map_err(|e| e.with_context(format!("opening camera '{}'", config.id)))?;
        cameras.push(camera);
    }
    Ok(cameras)
}

fn capture_loop(
    config: CameraConfig,
    cell: Arc<LatestFrameCell>,
    running: Arc<AtomicBool>,
    startup: Arc<Mutex<StartupState>>,
    clock: Arc<dyn Clock>,
) {
    let mut grabber = build_grabber(&config);
    if let Err(e) = grabber.open() {
        tracing::error!("Camera '{}' failed to open: {}", config.id, e);
        *startup.lock() = StartupState::Failed(e.to_string());
        return;
    }
    *startup.lock() = StartupState::Streaming;

    let frame_interval = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
    let mut consecutive_failures: u32 = 0;

    while running.load(Ordering::Relaxed) {
        let frame_start = Instant::now();
        match grabber.grab() {
            Ok(data) => {
                cell.store(data, clock.now());
                consecutive_failures = 0;
            }
            Err(e) => {
                // Last good frame stays in the cell; the tick sees a repeat
                consecutive_failures += 1;
                tracing::warn!(
                    "Camera '{}' capture failed ({} consecutive): {}",
                    config.id,
                    consecutive_failures,
                    e
                );
            }
        }

        // Native grabbers block on the device and pace themselves; this
        // only throttles sources that return immediately
        let elapsed = frame_start.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }

    grabber.close();
    tracing::debug!("Camera '{}' capture loop stopped", config.id);
}

fn build_grabber(config: &CameraConfig) -> Box<dyn FrameGrabber> {
    match config.transport {
        CameraTransport::Native => Box::new(NokhwaGrabber::new(config)),
        CameraTransport::Synthetic => Box::new(SyntheticGrabber::new(config)),
    }
}

/// Platform camera via nokhwa, decoded to RGB8
struct NokhwaGrabber {
    id: String,
    index: CameraIndex,
    width: u32,
    height: u32,
    fps: u32,
    camera: Option<nokhwa::Camera>,
}

impl NokhwaGrabber {
    fn new(config: &CameraConfig) -> Self {
        // Numeric ids select by index, anything else by device path
        let index = match config.native_index() {
            Some(i) => CameraIndex::Index(i),
            None => CameraIndex::String(config.index_or_path.clone()),
        };
        Self {
            id: config.id.clone(),
            index,
            width: config.width,
            height: config.height,
            fps: config.fps,
            camera: None,
        }
    }
}

impl FrameGrabber for NokhwaGrabber {
    fn open(&mut self) -> Result<()> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(self.width, self.height),
                FrameFormat::MJPEG,
                self.fps,
            ),
        ));

        let mut camera = nokhwa::Camera::new(self.index.clone(), requested)
            .map_err(|e| TelerecError::camera(&self.id, format!("open {:?}: {}", self.index, e)))?;
        camera
            .open_stream()
            .map_err(|e| TelerecError::camera(&self.id, format!("open stream: {}", e)))?;

        let actual = camera.camera_format();
        tracing::info!(
            "Camera '{}' opened: {}x{} @ {}fps {:?} (requested {}x{} @ {}fps)",
            self.id,
            actual.resolution().width(),
            actual.resolution().height(),
            actual.frame_rate(),
            actual.format(),
            self.width,
            self.height,
            self.fps
        );

        self.camera = Some(camera);
        Ok(())
    }

    fn grab(&mut self) -> Result<FrameData> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| TelerecError::camera(&self.id, "not open"))?;

        let frame = camera
            .frame()
            .map_err(|e| TelerecError::camera(&self.id, format!("grab: {}", e)))?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| TelerecError::camera(&self.id, format!("decode: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());
        FrameData::new(width, height, decoded.into_raw())
            .ok_or_else(|| TelerecError::camera(&self.id, "decoded frame has wrong length"))
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Camera '{}': error stopping stream: {:?}", self.id, e);
            }
        }
    }
}

/// Synthetic frame source: a gradient that drifts one pixel per frame
struct SyntheticGrabber {
    id: String,
    width: u32,
    height: u32,
    frame_count: u64,
    open: bool,
}

impl SyntheticGrabber {
    fn new(config: &CameraConfig) -> Self {
        Self {
            id: config.id.clone(),
            width: config.width,
            height: config.height,
            frame_count: 0,
            open: false,
        }
    }
}

impl FrameGrabber for SyntheticGrabber {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn grab(&mut self) -> Result<FrameData> {
        if !self.open {
            return Err(TelerecError::camera(&self.id, "not open"));
        }
        self.frame_count += 1;
        let n = self.frame_count as u32;

        let mut pixels = Vec::with_capacity(FrameData::expected_len(self.width, self.height));
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x + n) & 0xFF) as u8);
                pixels.push((y & 0xFF) as u8);
                pixels.push(((x + y + n) & 0xFF) as u8);
            }
        }

        FrameData::new(self.width, self.height, pixels)
            .ok_or_else(|| TelerecError::camera(&self.id, "generated frame has wrong length"))
    }

    fn close(&mut self) {
        self.open = false;
    }
}
