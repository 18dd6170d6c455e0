//! Model point projection.
//!
//! Points are scaled by the marker size, rotated by the inverse marker
//! orientation (roll, then pitch, then yaw, each applied to a row vector),
//! flattened by dropping Z and offset by the anchor corner.

use glam::{DVec2, DVec3};

use crate::geometry::{pitch_matrix, roll_matrix, row_mul, yaw_matrix};
use crate::points::ModelPointSet;
use crate::pose::EulerAngles;

/// Apply `roll(-roll)`, then `pitch(-pitch)`, then `yaw(-yaw)` to a row vector.
///
/// Equivalent to `Rz(yaw) * Ry(pitch) * Rx(roll) * v` for a column vector, the
/// inverse of the decomposition in [`EulerAngles::from_pose`].
pub fn rotate_inverse(point: DVec3, angles: &EulerAngles) -> DVec3 {
    let radians = angles.to_radians();
    let rolled = row_mul(point, &roll_matrix(-radians.x));
    let pitched = row_mul(rolled, &pitch_matrix(-radians.y));
    row_mul(pitched, &yaw_matrix(-radians.z))
}

/// Project a single model point to screen space.
pub fn project_point(point: DVec3, marker_size: f64, angles: &EulerAngles, anchor: DVec2) -> DVec2 {
    let rotated = rotate_inverse(point * marker_size, angles);
    rotated.truncate() + anchor
}

/// Project every point of the set, preserving order.
pub fn project_points(
    points: &ModelPointSet,
    marker_size: f64,
    angles: &EulerAngles,
    anchor: DVec2,
) -> Vec<DVec2> {
    points
        .iter()
        .map(|p| project_point(*p, marker_size, angles, anchor))
        .collect()
}
