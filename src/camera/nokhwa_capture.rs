//! nokhwa-backed camera capture.
//!
//! The device is opened on a dedicated capture thread (nokhwa cameras are not
//! `Send`). The open result is reported back before `open` returns, then the
//! thread keeps pushing decoded frames into a single-slot channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

use super::{CameraBackend, CameraFrame, DeviceError, FrameSource};
use crate::slot::{slot, SlotReceiver, SlotSender};

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    /// Camera index
    pub index: u32,
    /// Camera name
    pub name: String,
}

/// List available cameras
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(camera_list) => camera_list
            .iter()
            .enumerate()
            .map(|(idx, info)| CameraInfo {
                index: idx as u32,
                name: info.human_name().to_string(),
            })
            .collect(),
        Err(e) => {
            log::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Opens nokhwa cameras for the render loop.
#[derive(Debug, Clone)]
pub struct NokhwaBackend {
    /// Longest wait for a new frame in `retrieve_latest`.
    pub frame_timeout: Duration,
}

impl NokhwaBackend {
    pub fn new(frame_timeout: Duration) -> Self {
        Self { frame_timeout }
    }
}

impl CameraBackend for NokhwaBackend {
    fn open(&self, device_index: u32) -> Result<Box<dyn FrameSource>, DeviceError> {
        let capture = NokhwaCapture::open(device_index, self.frame_timeout)?;
        Ok(Box::new(capture))
    }
}

/// A running capture thread for one camera.
pub struct NokhwaCapture {
    /// Latest decoded frame
    frames: SlotReceiver<CameraFrame>,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<JoinHandle<()>>,
    /// Frame counter
    frame_count: Arc<AtomicU64>,
    frame_timeout: Duration,
    device_index: u32,
}

impl NokhwaCapture {
    /// Open camera `device_index` and start capturing.
    ///
    /// Blocks until the capture thread has either opened the stream or given up.
    pub fn open(device_index: u32, frame_timeout: Duration) -> Result<Self, DeviceError> {
        let (frame_sender, frames) = slot();
        let (ready_sender, ready_receiver) = crossbeam_channel::bounded(1);
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));

        let running_clone = running.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    device_index,
                    frame_sender,
                    ready_sender,
                    running_clone,
                    frame_count_clone,
                );
            })
            .map_err(|e| DeviceError::Spawn(e.to_string()))?;

        let opened = ready_receiver.recv().unwrap_or_else(|_| Err("capture thread exited".to_string()));

        match opened {
            Ok((width, height)) => {
                log::info!("Camera {} streaming at {}x{}", device_index, width, height);
                Ok(Self {
                    frames,
                    running,
                    thread_handle: Some(thread_handle),
                    frame_count,
                    frame_timeout,
                    device_index,
                })
            }
            Err(reason) => {
                let _ = thread_handle.join();
                Err(DeviceError::Open {
                    index: device_index,
                    reason,
                })
            }
        }
    }

    /// Open the device, trying progressively less specific formats.
    fn open_camera(device_index: u32) -> Result<Camera, String> {
        let index = CameraIndex::Index(device_index);

        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let first = match Camera::new(index.clone(), requested) {
            Ok(c) => return Ok(c),
            Err(e) => e,
        };
        log::warn!("Failed to open camera with highest resolution: {:?}", first);

        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(640, 480),
        ));
        let second = match Camera::new(index.clone(), requested) {
            Ok(c) => return Ok(c),
            Err(e) => e,
        };
        log::warn!("Failed with HighestResolution: {:?}", second);

        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
        Camera::new(index, requested).map_err(|e| format!("{:?}", e))
    }

    /// Camera capture thread
    fn capture_thread(
        device_index: u32,
        frames: SlotSender<CameraFrame>,
        ready: Sender<Result<(u32, u32), String>>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        log::info!("Starting camera capture thread (camera {})", device_index);

        let mut camera = match Self::open_camera(device_index) {
            Ok(c) => c,
            Err(reason) => {
                log::error!("Failed to open camera with all format attempts: {}", reason);
                let _ = ready.send(Err(reason));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            log::error!("Failed to open camera stream: {:?}", e);
            let _ = ready.send(Err(format!("{:?}", e)));
            return;
        }

        log::info!("Camera opened: {}", camera.info().human_name());
        let resolution = camera.resolution();
        let _ = ready.send(Ok((resolution.width(), resolution.height())));

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(buffer) => match buffer.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let frame_number = frame_count.fetch_add(1, Ordering::Relaxed);
                        frames.send(CameraFrame {
                            data: image.into_raw(),
                            width: buffer.resolution().width(),
                            height: buffer.resolution().height(),
                            frame_number,
                            timestamp: Instant::now(),
                        });
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop camera stream: {:?}", e);
        }
        log::info!("Camera capture thread stopped");
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}

impl FrameSource for NokhwaCapture {
    fn retrieve_latest(&mut self) -> Option<CameraFrame> {
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        self.frames.take_timeout(self.frame_timeout)
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            log::info!(
                "Camera {} closed after {} frames",
                self.device_index,
                self.frame_count()
            );
        }
    }
}

impl Drop for NokhwaCapture {
    fn drop(&mut self) {
        self.close();
    }
}
