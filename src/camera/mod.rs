//! Camera capture module
//!
//! Defines the frame type and the open/retrieve/close seam the render loop
//! drives. With the `camera` feature a nokhwa-backed capture thread is
//! provided; anything else (files, test doubles) can implement the traits.

#[cfg(feature = "camera")]
mod nokhwa_capture;

#[cfg(feature = "camera")]
pub use nokhwa_capture::{list_cameras, CameraInfo, NokhwaBackend, NokhwaCapture};

use std::time::Instant;

use image::RgbaImage;

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame number
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

impl CameraFrame {
    /// Wrap an RGBA image as a frame.
    pub fn from_image(image: RgbaImage, frame_number: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            frame_number,
            timestamp: Instant::now(),
        }
    }

    /// True when the frame carries no usable pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0
            || self.height == 0
            || self.data.len() != self.width as usize * self.height as usize * 4
    }

    /// Convert into an RGBA image buffer, `None` if the frame is empty.
    pub fn into_image(self) -> Option<RgbaImage> {
        if self.is_empty() {
            return None;
        }
        RgbaImage::from_raw(self.width, self.height, self.data)
    }
}

/// Error opening a camera device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("camera {index} could not be opened: {reason}")]
    Open { index: u32, reason: String },
    #[error("failed to spawn capture thread: {0}")]
    Spawn(String),
}

/// An opened camera.
pub trait FrameSource: Send {
    /// The most recently buffered frame.
    ///
    /// May wait up to one frame interval for a frame newer than the last one
    /// returned; `None` means no frame this time. Older frames are dropped.
    fn retrieve_latest(&mut self) -> Option<CameraFrame>;

    /// Release the device. Further retrieves return `None`.
    fn close(&mut self);
}

/// Opens camera devices by index.
pub trait CameraBackend: Send + Sync {
    fn open(&self, device_index: u32) -> Result<Box<dyn FrameSource>, DeviceError>;
}
