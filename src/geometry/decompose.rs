//! Projection matrix decomposition.
//!
//! Splits a 3x4 matrix `[M | t]` into an upper-triangular camera matrix,
//! a rotation and the camera centre. The rotation is found with three Givens
//! rotations (RQ decomposition), which also yields the per-axis rotations and
//! their angles.

use glam::{DMat3, DVec3};

use super::rotation::{element, pitch_matrix, roll_matrix, yaw_matrix};

/// Determinant magnitude below which `M` is treated as singular.
const SINGULAR_EPS: f64 = 1e-12;

/// A 3x4 projection-style matrix `[left | last_column]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionMatrix {
    /// Left 3x3 block.
    pub left: DMat3,
    /// Fourth column.
    pub last_column: DVec3,
}

/// Result of an RQ decomposition `M = upper * rotation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RqDecomposition {
    /// Upper-triangular factor.
    pub upper: DMat3,
    /// Orthogonal factor, `rotation_z * rotation_y * rotation_x`.
    pub rotation: DMat3,
    /// Rotation about X.
    pub rotation_x: DMat3,
    /// Rotation about Y.
    pub rotation_y: DMat3,
    /// Rotation about Z.
    pub rotation_z: DMat3,
    /// Angles about X, Y, Z in radians.
    pub angles: DVec3,
}

/// Full decomposition of a [`ProjectionMatrix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionDecomposition {
    /// Upper-triangular camera (intrinsic) matrix.
    pub camera_matrix: DMat3,
    /// Rotation matrix.
    pub rotation: DMat3,
    /// Camera centre `-M⁻¹ t`, absent when `M` is singular.
    pub camera_centre: Option<DVec3>,
    /// Rotation about X.
    pub rotation_x: DMat3,
    /// Rotation about Y.
    pub rotation_y: DMat3,
    /// Rotation about Z.
    pub rotation_z: DMat3,
    /// Euler angles about X, Y, Z in degrees.
    pub euler_degrees: DVec3,
}

impl ProjectionMatrix {
    /// Build `[rotation | translation]`.
    pub fn from_rotation_translation(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            left: rotation,
            last_column: translation,
        }
    }

    /// Decompose into camera matrix, rotation, camera centre and Euler angles.
    pub fn decompose(&self) -> ProjectionDecomposition {
        let rq = RqDecomposition::of(&self.left);

        let camera_centre = if self.left.determinant().abs() > SINGULAR_EPS {
            Some(-(self.left.inverse() * self.last_column))
        } else {
            None
        };

        ProjectionDecomposition {
            camera_matrix: rq.upper,
            rotation: rq.rotation,
            camera_centre,
            rotation_x: rq.rotation_x,
            rotation_y: rq.rotation_y,
            rotation_z: rq.rotation_z,
            euler_degrees: DVec3::new(
                rq.angles.x.to_degrees(),
                rq.angles.y.to_degrees(),
                rq.angles.z.to_degrees(),
            ),
        }
    }
}

impl RqDecomposition {
    /// Decompose `m` as `upper * Rz * Ry * Rx`.
    ///
    /// Each Givens step zeroes one sub-diagonal entry and keeps the diagonal
    /// entry it pivots on non-negative, so a proper rotation comes back with
    /// `upper == I` and the Y angle stays within [-90°, 90°].
    pub fn of(m: &DMat3) -> Self {
        // Zero (2,1) with a rotation about X.
        let ax = element(m, 2, 1).atan2(element(m, 2, 2));
        let a = *m * roll_matrix(-ax);

        // Zero (2,0) with a rotation about Y; column 1 is untouched.
        let ay = (-element(&a, 2, 0)).atan2(element(&a, 2, 2));
        let b = a * pitch_matrix(-ay);

        // Zero (1,0) with a rotation about Z; row 2 stays [0, 0, *].
        let az = element(&b, 1, 0).atan2(element(&b, 1, 1));
        let upper = b * yaw_matrix(-az);

        let rotation_x = roll_matrix(ax);
        let rotation_y = pitch_matrix(ay);
        let rotation_z = yaw_matrix(az);

        Self {
            upper,
            rotation: rotation_z * rotation_y * rotation_x,
            rotation_x,
            rotation_y,
            rotation_z,
            angles: DVec3::new(ax, ay, az),
        }
    }
}
