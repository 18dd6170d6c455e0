//! Rotation helpers.
//!
//! All matrices use the column-vector convention (`m * v`). The projector
//! works with row vectors, so `row_mul` is provided for that side.

use glam::{DMat3, DQuat, DVec3};

/// Convert a Rodrigues (axis-angle) vector into a rotation matrix.
///
/// The vector direction is the rotation axis, its length the angle in radians.
/// A zero vector yields the identity.
pub fn rodrigues_to_matrix(rotation_vector: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(rotation_vector))
}

/// Convert a rotation matrix back into a Rodrigues vector.
pub fn matrix_to_rodrigues(rotation: &DMat3) -> DVec3 {
    DQuat::from_mat3(rotation).to_scaled_axis()
}

/// Rotation about the X axis: `[[1,0,0],[0,c,-s],[0,s,c]]`.
pub fn roll_matrix(angle: f64) -> DMat3 {
    DMat3::from_rotation_x(angle)
}

/// Rotation about the Y axis: `[[c,0,s],[0,1,0],[-s,0,c]]`.
pub fn pitch_matrix(angle: f64) -> DMat3 {
    DMat3::from_rotation_y(angle)
}

/// Rotation about the Z axis: `[[c,-s,0],[s,c,0],[0,0,1]]`.
pub fn yaw_matrix(angle: f64) -> DMat3 {
    DMat3::from_rotation_z(angle)
}

/// Row vector times matrix: `v · m`.
pub fn row_mul(v: DVec3, m: &DMat3) -> DVec3 {
    m.transpose() * v
}

/// Element at `(row, col)`.
pub fn element(m: &DMat3, row: usize, col: usize) -> f64 {
    m.col(col)[row]
}

/// Build a matrix from row-major rows.
pub fn from_rows(rows: [[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(&rows).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn assert_vec_eq(a: DVec3, b: DVec3) {
        assert!((a - b).length() < 1e-9, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_zero_rodrigues_is_identity() {
        let m = rodrigues_to_matrix(DVec3::ZERO);
        assert!(m.abs_diff_eq(DMat3::IDENTITY, 1e-12));
    }

    #[test]
    fn test_rodrigues_quarter_turn_about_z() {
        let m = rodrigues_to_matrix(DVec3::new(0.0, 0.0, FRAC_PI_2));
        assert_vec_eq(m * DVec3::X, DVec3::Y);
        assert_vec_eq(m * DVec3::Y, -DVec3::X);
    }

    #[test]
    fn test_rodrigues_roundtrip() {
        let rvec = DVec3::new(0.3, -0.2, 0.5);
        let back = matrix_to_rodrigues(&rodrigues_to_matrix(rvec));
        assert_vec_eq(back, rvec);
    }

    #[test]
    fn test_single_axis_layouts() {
        let a = 0.4_f64;
        let (s, c) = a.sin_cos();
        let roll = roll_matrix(a);
        assert!((element(&roll, 1, 2) + s).abs() < 1e-12);
        assert!((element(&roll, 2, 1) - s).abs() < 1e-12);
        assert!((element(&roll, 1, 1) - c).abs() < 1e-12);

        let pitch = pitch_matrix(a);
        assert!((element(&pitch, 0, 2) - s).abs() < 1e-12);
        assert!((element(&pitch, 2, 0) + s).abs() < 1e-12);

        let yaw = yaw_matrix(a);
        assert!((element(&yaw, 0, 1) + s).abs() < 1e-12);
        assert!((element(&yaw, 1, 0) - s).abs() < 1e-12);
    }

    #[test]
    fn test_row_mul_uses_columns() {
        let m = from_rows([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        // [1, 0, 0] · m picks the first row
        assert_vec_eq(row_mul(DVec3::X, &m), DVec3::new(1.0, 2.0, 3.0));
        // m · [1, 0, 0] picks the first column
        assert_vec_eq(m * DVec3::X, DVec3::new(1.0, 4.0, 7.0));
    }
}
