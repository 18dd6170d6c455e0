//! Geometry module
//!
//! Small fixed-size linear algebra on top of glam's `DMat3`/`DVec3`:
//! Rodrigues conversion, single-axis rotations, row-vector products and
//! the projection-matrix decomposition used for Euler angle extraction.

mod decompose;
mod rotation;

pub use decompose::{ProjectionDecomposition, ProjectionMatrix, RqDecomposition};
pub use rotation::{
    element, from_rows, matrix_to_rodrigues, pitch_matrix, rodrigues_to_matrix, roll_matrix,
    row_mul, yaw_matrix,
};
