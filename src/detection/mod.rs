//! Marker detection and pose estimation seams.
//!
//! The render loop only depends on the traits here. With the `opencv`
//! feature, ArUco detection and per-marker PnP are provided by OpenCV.

#[cfg(feature = "opencv")]
mod aruco;

#[cfg(feature = "opencv")]
pub use aruco::{ArucoMarkerDetector, PnpPoseEstimator};

use glam::{DVec2, DVec3};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::calibration::CameraCalibration;

/// Four corners of a detected marker, clockwise from the top-left.
pub type Quad = [DVec2; 4];

/// Output of one detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    /// Decoded marker ids, index-parallel to `corners`.
    pub ids: Vec<i32>,
    /// Corner quads of the decoded markers.
    pub corners: Vec<Quad>,
    /// Candidate quads that did not decode.
    pub rejected: Vec<Quad>,
}

impl Detections {
    /// Build from raw detector output, keeping ids and corners paired.
    ///
    /// A marker whose corner set is not a quad is dropped together with its id.
    pub fn from_candidates(
        candidates: impl IntoIterator<Item = (i32, Option<Quad>)>,
        rejected: Vec<Quad>,
    ) -> Self {
        let (ids, corners) = candidates
            .into_iter()
            .filter_map(|(id, quad)| Some((id, quad?)))
            .unzip();
        Self {
            ids,
            corners,
            rejected,
        }
    }

    /// Position of `marker_id` among the detections (the last one if repeated).
    pub fn index_of(&self, marker_id: i32) -> Option<usize> {
        let index = self.ids.iter().rposition(|&id| id == marker_id)?;
        (index < self.corners.len()).then_some(index)
    }
}

/// Pose of one marker relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerPose {
    /// Rodrigues rotation vector.
    pub rotation_vector: DVec3,
    /// Translation vector, in marker length units.
    pub translation_vector: DVec3,
}

/// Finds fiducial markers in a frame.
///
/// Failing to find anything is an empty result, never an error.
pub trait MarkerDetector: Send {
    fn detect(&mut self, frame: &RgbaImage) -> Detections;
}

/// Estimates marker poses from detected corners.
///
/// The result is index-parallel to `corners`. `None` entries, or entries
/// missing from a shorter result, mean no pose for that marker.
pub trait PoseEstimator: Send {
    fn estimate(
        &mut self,
        corners: &[Quad],
        marker_length: f64,
        calibration: &CameraCalibration,
    ) -> Vec<Option<MarkerPose>>;
}

/// Predefined marker dictionaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DictionarySpec {
    #[default]
    #[serde(rename = "4x4_50")]
    Dict4x4_50,
    #[serde(rename = "4x4_100")]
    Dict4x4_100,
    #[serde(rename = "4x4_250")]
    Dict4x4_250,
    #[serde(rename = "5x5_50")]
    Dict5x5_50,
    #[serde(rename = "5x5_100")]
    Dict5x5_100,
    #[serde(rename = "6x6_50")]
    Dict6x6_50,
    #[serde(rename = "6x6_250")]
    Dict6x6_250,
    #[serde(rename = "7x7_50")]
    Dict7x7_50,
    #[serde(rename = "original")]
    ArucoOriginal,
}

impl DictionarySpec {
    /// Get display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            DictionarySpec::Dict4x4_50 => "4x4 (50)",
            DictionarySpec::Dict4x4_100 => "4x4 (100)",
            DictionarySpec::Dict4x4_250 => "4x4 (250)",
            DictionarySpec::Dict5x5_50 => "5x5 (50)",
            DictionarySpec::Dict5x5_100 => "5x5 (100)",
            DictionarySpec::Dict6x6_50 => "6x6 (50)",
            DictionarySpec::Dict6x6_250 => "6x6 (250)",
            DictionarySpec::Dict7x7_50 => "7x7 (50)",
            DictionarySpec::ArucoOriginal => "ArUco original",
        }
    }

    /// Number of distinct ids in the dictionary.
    pub fn marker_count(&self) -> i32 {
        match self {
            DictionarySpec::Dict4x4_50
            | DictionarySpec::Dict5x5_50
            | DictionarySpec::Dict6x6_50
            | DictionarySpec::Dict7x7_50 => 50,
            DictionarySpec::Dict4x4_100 | DictionarySpec::Dict5x5_100 => 100,
            DictionarySpec::Dict4x4_250 | DictionarySpec::Dict6x6_250 => 250,
            DictionarySpec::ArucoOriginal => 1024,
        }
    }

    /// Whether `marker_id` can be decoded with this dictionary.
    pub fn contains(&self, marker_id: i32) -> bool {
        (0..self.marker_count()).contains(&marker_id)
    }
}

/// Corner refinement applied after detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CornerRefinement {
    #[default]
    None,
    Subpixel,
    Contour,
}

/// Tunable detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Smallest adaptive threshold window.
    pub adaptive_thresh_win_size_min: i32,
    /// Largest adaptive threshold window.
    pub adaptive_thresh_win_size_max: i32,
    /// Window size step.
    pub adaptive_thresh_win_size_step: i32,
    /// Minimum marker perimeter relative to the largest image side.
    pub min_marker_perimeter_rate: f64,
    /// Maximum marker perimeter relative to the largest image side.
    pub max_marker_perimeter_rate: f64,
    pub corner_refinement: CornerRefinement,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            adaptive_thresh_win_size_min: 3,
            adaptive_thresh_win_size_max: 23,
            adaptive_thresh_win_size_step: 10,
            min_marker_perimeter_rate: 0.03,
            max_marker_perimeter_rate: 4.0,
            corner_refinement: CornerRefinement::None,
        }
    }
}
