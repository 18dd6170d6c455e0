//! ArUco detection and pose estimation using OpenCV.
//!
//! Detection runs `objdetect::ArucoDetector` on a grayscale copy of the
//! frame. Poses come from `calib3d::solve_pnp` with the IPPE_SQUARE solver,
//! one marker at a time, against a square of the configured side length.

use glam::{DVec2, DVec3};
use image::RgbaImage;
use opencv::core::{Mat, Point2f, Point3f, Scalar, Vector, CV_8UC4};
use opencv::prelude::*;
use opencv::{calib3d, imgproc, objdetect};

use super::{
    CornerRefinement, Detections, DetectorParams, DictionarySpec, MarkerDetector, MarkerPose,
    PoseEstimator, Quad,
};
use crate::calibration::CameraCalibration;

fn predefined(spec: DictionarySpec) -> objdetect::PredefinedDictionaryType {
    use objdetect::PredefinedDictionaryType as P;
    match spec {
        DictionarySpec::Dict4x4_50 => P::DICT_4X4_50,
        DictionarySpec::Dict4x4_100 => P::DICT_4X4_100,
        DictionarySpec::Dict4x4_250 => P::DICT_4X4_250,
        DictionarySpec::Dict5x5_50 => P::DICT_5X5_50,
        DictionarySpec::Dict5x5_100 => P::DICT_5X5_100,
        DictionarySpec::Dict6x6_50 => P::DICT_6X6_50,
        DictionarySpec::Dict6x6_250 => P::DICT_6X6_250,
        DictionarySpec::Dict7x7_50 => P::DICT_7X7_50,
        DictionarySpec::ArucoOriginal => P::DICT_ARUCO_ORIGINAL,
    }
}

fn refinement_method(refinement: CornerRefinement) -> i32 {
    match refinement {
        CornerRefinement::None => objdetect::CornerRefineMethod::CORNER_REFINE_NONE as i32,
        CornerRefinement::Subpixel => objdetect::CornerRefineMethod::CORNER_REFINE_SUBPIX as i32,
        CornerRefinement::Contour => objdetect::CornerRefineMethod::CORNER_REFINE_CONTOUR as i32,
    }
}

fn to_quad(points: &Vector<Point2f>) -> Option<Quad> {
    if points.len() != 4 {
        return None;
    }
    let mut quad = [DVec2::ZERO; 4];
    for (slot, p) in quad.iter_mut().zip(points.iter()) {
        *slot = DVec2::new(p.x as f64, p.y as f64);
    }
    Some(quad)
}


/// ArUco marker detector.
pub struct ArucoMarkerDetector {
    detector: objdetect::ArucoDetector,
}

impl ArucoMarkerDetector {
    /// Build a detector for `dictionary` with the given parameters.
    pub fn new(dictionary: DictionarySpec, params: &DetectorParams) -> Result<Self, String> {
        let dict = objdetect::get_predefined_dictionary(predefined(dictionary))
            .map_err(|e| format!("OpenCV error: {}", e))?;

        let mut detector_params =
            objdetect::DetectorParameters::default().map_err(|e| format!("OpenCV error: {}", e))?;
        detector_params.set_adaptive_thresh_win_size_min(params.adaptive_thresh_win_size_min);
        detector_params.set_adaptive_thresh_win_size_max(params.adaptive_thresh_win_size_max);
        detector_params.set_adaptive_thresh_win_size_step(params.adaptive_thresh_win_size_step);
        detector_params.set_min_marker_perimeter_rate(params.min_marker_perimeter_rate);
        detector_params.set_max_marker_perimeter_rate(params.max_marker_perimeter_rate);
        detector_params.set_corner_refinement_method(refinement_method(params.corner_refinement));

        let refine = objdetect::RefineParameters::new(10.0, 3.0, true)
            .map_err(|e| format!("OpenCV error: {}", e))?;
        let detector = objdetect::ArucoDetector::new(&dict, &detector_params, refine)
            .map_err(|e| format!("OpenCV error: {}", e))?;

        log::info!("ArUco detector ready ({})", dictionary.display_name());
        Ok(Self { detector })
    }

    fn gray_mat(frame: &RgbaImage) -> opencv::Result<Mat> {
        let (width, height) = frame.dimensions();
        let mut rgba =
            Mat::new_rows_cols_with_default(height as i32, width as i32, CV_8UC4, Scalar::all(0.0))?;
        rgba.data_bytes_mut()?.copy_from_slice(frame.as_raw());

        let mut gray = Mat::default();
        imgproc::cvt_color(&rgba, &mut gray, imgproc::COLOR_RGBA2GRAY, 0)?;
        Ok(gray)
    }

    fn try_detect(&mut self, frame: &RgbaImage) -> opencv::Result<Detections> {
        let gray = Self::gray_mat(frame)?;

        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        let mut rejected = Vector::<Vector<Point2f>>::new();
        self.detector
            .detect_markers(&gray, &mut corners, &mut ids, &mut rejected)?;

        let candidates = ids
            .iter()
            .zip(corners.iter())
            .map(|(id, points)| (id, to_quad(&points)));
        let rejected = rejected.iter().filter_map(|points| to_quad(&points)).collect();
        Ok(Detections::from_candidates(candidates, rejected))
    }
}

impl MarkerDetector for ArucoMarkerDetector {
    fn detect(&mut self, frame: &RgbaImage) -> Detections {
        match self.try_detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("Marker detection failed: {}", e);
                Detections::default()
            }
        }
    }
}

/// Per-marker PnP pose estimator.
#[derive(Debug, Default)]
pub struct PnpPoseEstimator;

impl PnpPoseEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Marker corners in its own frame, matching the detector's corner order.
    fn object_points(marker_length: f64) -> Vector<Point3f> {
        let half = (marker_length / 2.0) as f32;
        Vector::from_slice(&[
            Point3f::new(-half, half, 0.0),
            Point3f::new(half, half, 0.0),
            Point3f::new(half, -half, 0.0),
            Point3f::new(-half, -half, 0.0),
        ])
    }

    fn solve(
        object_points: &Vector<Point3f>,
        quad: &Quad,
        camera_matrix: &Mat,
        distortion: &Mat,
    ) -> opencv::Result<Option<MarkerPose>> {
        let image_points: Vector<Point2f> = quad
            .iter()
            .map(|p| Point2f::new(p.x as f32, p.y as f32))
            .collect();

        let mut rvec = Mat::default();
        let mut tvec = Mat::default();
        let solved = calib3d::solve_pnp(
            object_points,
            &image_points,
            camera_matrix,
            distortion,
            &mut rvec,
            &mut tvec,
            false,
            calib3d::SOLVEPNP_IPPE_SQUARE,
        )?;
        if !solved {
            return Ok(None);
        }

        let read = |m: &Mat| -> opencv::Result<DVec3> {
            Ok(DVec3::new(*m.at::<f64>(0)?, *m.at::<f64>(1)?, *m.at::<f64>(2)?))
        };
        Ok(Some(MarkerPose {
            rotation_vector: read(&rvec)?,
            translation_vector: read(&tvec)?,
        }))
    }

    fn try_estimate(
        &self,
        corners: &[Quad],
        marker_length: f64,
        calibration: &CameraCalibration,
    ) -> opencv::Result<Vec<Option<MarkerPose>>> {
        let camera_matrix = Mat::from_slice_2d(&calibration.matrix_rows())?;
        let distortion = Mat::from_slice_2d(&[calibration.distortion])?;
        let object_points = Self::object_points(marker_length);

        // A marker that fails to solve maps to `None`, keeping the result index-parallel.
        let poses = corners
            .iter()
            .enumerate()
            .map(|(index, quad)| {
                Self::solve(&object_points, quad, &camera_matrix, &distortion)
                    .map_err(|e| log::debug!("No pose for marker {}: {}", index, e))
                    .ok()
                    .flatten()
            })
            .collect();
        Ok(poses)
    }
}

impl PoseEstimator for PnpPoseEstimator {
    fn estimate(
        &mut self,
        corners: &[Quad],
        marker_length: f64,
        calibration: &CameraCalibration,
    ) -> Vec<Option<MarkerPose>> {
        match self.try_estimate(corners, marker_length, calibration) {
            Ok(poses) => poses,
            Err(e) => {
                log::warn!("Pose estimation failed: {}", e);
                Vec::new()
            }
        }
    }
}
