//! Marker Trace - marker-anchored AR trace overlay
//!
//! Captures camera frames on a background worker, finds a fiducial marker,
//! turns its pose into roll/pitch/yaw and draws a user-supplied 3D polyline
//! anchored to the marker. Composed frames are handed to the host display
//! through a single-slot channel.

pub mod calibration;
pub mod camera;
pub mod config;
pub mod detection;
pub mod display;
pub mod geometry;
pub mod points;
pub mod pose;
pub mod projection;
pub mod render;
pub mod render_loop;
pub mod slot;

pub use calibration::{CalibrationStore, CameraCalibration, ConfigurationError};
pub use camera::{CameraBackend, CameraFrame, DeviceError, FrameSource};
pub use config::{ConfigError, TraceConfig};
pub use detection::{Detections, MarkerDetector, MarkerPose, PoseEstimator};
pub use display::{DisplaySink, FramePublisher, FrameReceiver};
pub use points::{FormatError, ModelPoint, ModelPointSet};
pub use pose::{EulerAngles, FramePose};
pub use render::{ComposedFrame, Compositor, Overlay, OverlayStyle};
pub use render_loop::{ControlError, ControlHandle, LoopState, Pipeline, TraceController};
