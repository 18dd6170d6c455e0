//! Marker pose and Euler angle extraction.

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::geometry::{rodrigues_to_matrix, ProjectionMatrix};

/// Roll (about X), pitch (about Y) and yaw (about Z) in degrees.
///
/// The angles describe `R = Rz(yaw) * Ry(pitch) * Rx(roll)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    /// Derive the angles from a marker's rotation and translation vectors.
    ///
    /// The rotation vector is expanded to a matrix, the translation appended as
    /// a fourth column and the resulting 3x4 matrix decomposed.
    pub fn from_pose(rotation_vector: DVec3, translation_vector: DVec3) -> Self {
        let rotation = rodrigues_to_matrix(rotation_vector);
        let projection = ProjectionMatrix::from_rotation_translation(rotation, translation_vector);
        let degrees = projection.decompose().euler_degrees;
        Self::new(degrees.x, degrees.y, degrees.z)
    }

    /// The same angles in radians as `(roll, pitch, yaw)`.
    pub fn to_radians(self) -> DVec3 {
        DVec3::new(
            self.roll.to_radians(),
            self.pitch.to_radians(),
            self.yaw.to_radians(),
        )
    }
}

/// Pose of the target marker for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePose {
    /// Rodrigues rotation vector.
    pub rotation_vector: DVec3,
    /// Translation vector.
    pub translation_vector: DVec3,
    /// Average side length of the detected quad in pixels.
    pub marker_size: f64,
    /// Reference corner the overlay is anchored to.
    pub anchor: DVec2,
}

impl FramePose {
    /// Build a pose from the estimator output and the target marker's quad.
    pub fn new(rotation_vector: DVec3, translation_vector: DVec3, quad: &[DVec2; 4]) -> Self {
        Self {
            rotation_vector,
            translation_vector,
            marker_size: marker_size(quad),
            anchor: quad[0],
        }
    }

    pub fn euler_angles(&self) -> EulerAngles {
        EulerAngles::from_pose(self.rotation_vector, self.translation_vector)
    }
}

/// Closed perimeter of a quad.
pub fn quad_perimeter(quad: &[DVec2; 4]) -> f64 {
    (0..4).map(|i| quad[i].distance(quad[(i + 1) % 4])).sum()
}

/// Average side length of a quad.
pub fn marker_size(quad: &[DVec2; 4]) -> f64 {
    quad_perimeter(quad) / 4.0
}
