//! One detect → pose → project → compose cycle.

use crate::calibration::CameraCalibration;
use crate::camera::CameraFrame;
use crate::detection::{Detections, MarkerDetector, PoseEstimator};
use crate::points::ModelPointSet;
use crate::pose::FramePose;
use crate::projection::project_points;
use crate::render::{ComposedFrame, Compositor, Overlay, Scene, TargetPose};

/// Detector, pose estimator and compositor used by the worker.
pub struct Pipeline {
    detector: Box<dyn MarkerDetector>,
    estimator: Box<dyn PoseEstimator>,
    compositor: Compositor,
    /// Side length handed to the pose estimator.
    marker_length: f64,
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn MarkerDetector>,
        estimator: Box<dyn PoseEstimator>,
        compositor: Compositor,
        marker_length: f64,
    ) -> Self {
        Self {
            detector,
            estimator,
            compositor,
            marker_length,
        }
    }

    /// Run one cycle on `frame`.
    ///
    /// Returns `None` only for an empty frame. A missing target or pose yields
    /// a frame with [`Overlay::NoMarker`]; nothing carries over between frames.
    pub fn process_frame(
        &mut self,
        frame: CameraFrame,
        calibration: &CameraCalibration,
        target_marker_id: i32,
        points: &ModelPointSet,
    ) -> Option<ComposedFrame> {
        let frame_number = frame.frame_number;
        let timestamp = frame.timestamp;
        let Some(image) = frame.into_image() else {
            log::trace!("Skipping empty frame {}", frame_number);
            return None;
        };

        let detections = self.detector.detect(&image);
        let target = self.locate_target(&detections, calibration, target_marker_id);

        let overlay = match &target {
            None => Overlay::NoMarker,
            Some(_) if points.is_empty() => Overlay::NoPoints,
            Some(target) => Overlay::Trace(project_points(
                points,
                target.pose.marker_size,
                &target.angles,
                target.pose.anchor,
            )),
        };

        let scene = Scene {
            detections: &detections,
            target,
            overlay,
        };
        Some(self.compositor.compose(image, frame_number, timestamp, scene))
    }

    fn locate_target<'a>(
        &mut self,
        detections: &Detections,
        calibration: &'a CameraCalibration,
        target_marker_id: i32,
    ) -> Option<TargetPose<'a>> {
        let Some(index) = detections.index_of(target_marker_id) else {
            log::trace!("Marker {} not in view", target_marker_id);
            return None;
        };

        let poses = self
            .estimator
            .estimate(&detections.corners, self.marker_length, calibration);
        let Some(marker_pose) = poses.get(index).copied().flatten() else {
            log::debug!("No pose for marker {}", target_marker_id);
            return None;
        };

        let pose = FramePose::new(
            marker_pose.rotation_vector,
            marker_pose.translation_vector,
            &detections.corners[index],
        );
        Some(TargetPose {
            pose,
            angles: pose.euler_angles(),
            calibration,
            marker_length: self.marker_length,
        })
    }
}
