//! Camera calibration store.
//!
//! Holds the intrinsic matrix and Brown-Conrady distortion coefficients
//! used by pose estimation and for drawing pose axes.

use std::sync::Arc;

use glam::{DMat3, DVec2, DVec3};
use parking_lot::RwLock;

use crate::geometry::{element, from_rows, rodrigues_to_matrix};

/// Number of distortion coefficients (k1, k2, p1, p2, k3).
pub const DISTORTION_LEN: usize = 5;

/// Error raised when calibration values have the wrong shape or are unusable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("camera matrix must be 3x3, got {rows} rows")]
    MatrixRows { rows: usize },
    #[error("camera matrix row {row} must have 3 entries, got {len}")]
    MatrixRow { row: usize, len: usize },
    #[error("distortion must have 5 coefficients, got {len}")]
    DistortionLength { len: usize },
    #[error("calibration contains a non-finite value")]
    NonFinite,
    #[error("focal lengths must be non-zero")]
    ZeroFocalLength,
}

/// Camera intrinsics and distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraCalibration {
    /// 3x3 intrinsic matrix.
    pub camera_matrix: DMat3,
    /// Distortion coefficients k1, k2, p1, p2, k3.
    pub distortion: [f64; DISTORTION_LEN],
}

impl CameraCalibration {
    /// Validate and build a calibration from row-major values.
    pub fn from_values(intrinsics: &[Vec<f64>], distortion: &[f64]) -> Result<Self, ConfigurationError> {
        if intrinsics.len() != 3 {
            return Err(ConfigurationError::MatrixRows {
                rows: intrinsics.len(),
            });
        }

        let mut rows = [[0.0; 3]; 3];
        for (r, values) in intrinsics.iter().enumerate() {
            if values.len() != 3 {
                return Err(ConfigurationError::MatrixRow {
                    row: r,
                    len: values.len(),
                });
            }
            rows[r].copy_from_slice(values);
        }

        let distortion: [f64; DISTORTION_LEN] = distortion
            .try_into()
            .map_err(|_| ConfigurationError::DistortionLength {
                len: distortion.len(),
            })?;

        let all_finite = rows.iter().flatten().chain(distortion.iter()).all(|v| v.is_finite());
        if !all_finite {
            return Err(ConfigurationError::NonFinite);
        }
        if rows[0][0].abs() < 1e-12 || rows[1][1].abs() < 1e-12 {
            return Err(ConfigurationError::ZeroFocalLength);
        }

        Ok(Self {
            camera_matrix: from_rows(rows),
            distortion,
        })
    }

    pub fn fx(&self) -> f64 {
        element(&self.camera_matrix, 0, 0)
    }

    pub fn fy(&self) -> f64 {
        element(&self.camera_matrix, 1, 1)
    }

    pub fn cx(&self) -> f64 {
        element(&self.camera_matrix, 0, 2)
    }

    pub fn cy(&self) -> f64 {
        element(&self.camera_matrix, 1, 2)
    }

    /// Camera matrix as row-major rows.
    pub fn matrix_rows(&self) -> [[f64; 3]; 3] {
        let m = self.camera_matrix;
        [m.row(0).to_array(), m.row(1).to_array(), m.row(2).to_array()]
    }

    /// Apply radial-tangential distortion to normalized coordinates.
    pub fn distort_normalized(&self, normalized: DVec2) -> DVec2 {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let (x, y) = (normalized.x, normalized.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
        let x_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        DVec2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Project an object-space point seen under pose `(rvec, tvec)` to pixels.
    ///
    /// Returns `None` for points at or behind the camera plane.
    pub fn project(&self, rotation_vector: DVec3, translation_vector: DVec3, point: DVec3) -> Option<DVec2> {
        let camera = rodrigues_to_matrix(rotation_vector) * point + translation_vector;
        if camera.z <= 1e-9 {
            return None;
        }

        let distorted = self.distort_normalized(DVec2::new(camera.x / camera.z, camera.y / camera.z));
        let skew = element(&self.camera_matrix, 0, 1);
        Some(DVec2::new(
            self.fx() * distorted.x + skew * distorted.y + self.cx(),
            self.fy() * distorted.y + self.cy(),
        ))
    }
}

/// Shared calibration slot.
///
/// Written once per `start`, read by the worker for every cycle.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    current: RwLock<Option<Arc<CameraCalibration>>>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a calibration, replacing any previous one.
    ///
    /// On error the stored value is left as it was.
    pub fn load(&self, intrinsics: &[Vec<f64>], distortion: &[f64]) -> Result<Arc<CameraCalibration>, ConfigurationError> {
        let calibration = Arc::new(CameraCalibration::from_values(intrinsics, distortion)?);
        self.replace(calibration.clone());
        Ok(calibration)
    }

    /// Store an already validated calibration.
    pub fn replace(&self, calibration: Arc<CameraCalibration>) {
        log::info!(
            "Calibration loaded: fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
            calibration.fx(),
            calibration.fy(),
            calibration.cx(),
            calibration.cy()
        );
        *self.current.write() = Some(calibration);
    }

    /// The current calibration, if one has been loaded.
    pub fn get(&self) -> Option<Arc<CameraCalibration>> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> Vec<Vec<f64>> {
        vec![
            vec![1000.0, 0.0, 640.0],
            vec![0.0, 1000.0, 360.0],
            vec![0.0, 0.0, 1.0],
        ]
    }

    #[test]
    fn test_load_and_read_back() {
        let store = CalibrationStore::new();
        assert!(store.get().is_none());

        store.load(&intrinsics(), &[0.1, -0.2, 0.0, 0.0, 0.05]).unwrap();
        let calibration = store.get().unwrap();
        assert_eq!(calibration.fx(), 1000.0);
        assert_eq!(calibration.cx(), 640.0);
        assert_eq!(calibration.cy(), 360.0);
        assert_eq!(calibration.distortion[4], 0.05);
        assert_eq!(calibration.matrix_rows()[1], [0.0, 1000.0, 360.0]);
    }

    #[test]
    fn test_load_is_idempotent() {
        let store = CalibrationStore::new();
        let a = store.load(&intrinsics(), &[0.0; 5]).unwrap();
        let b = store.load(&intrinsics(), &[0.0; 5]).unwrap();
        assert_eq!(*a, *b);
        assert_eq!(*store.get().unwrap(), *a);
    }

    #[test]
    fn test_shape_errors() {
        let store = CalibrationStore::new();

        let two_rows = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        assert_eq!(
            store.load(&two_rows, &[0.0; 5]).unwrap_err(),
            ConfigurationError::MatrixRows { rows: 2 }
        );

        let mut short_row = intrinsics();
        short_row[2].pop();
        assert_eq!(
            store.load(&short_row, &[0.0; 5]).unwrap_err(),
            ConfigurationError::MatrixRow { row: 2, len: 2 }
        );

        assert_eq!(
            store.load(&intrinsics(), &[0.0; 4]).unwrap_err(),
            ConfigurationError::DistortionLength { len: 4 }
        );
        assert!(store.get().is_none());
    }

    #[test]
    fn test_failed_load_keeps_previous() {
        let store = CalibrationStore::new();
        store.load(&intrinsics(), &[0.0; 5]).unwrap();
        assert!(store.load(&intrinsics(), &[f64::NAN, 0.0, 0.0, 0.0, 0.0]).is_err());
        assert_eq!(store.get().unwrap().distortion, [0.0; 5]);
    }

    #[test]
    fn test_zero_focal_length_rejected() {
        let mut values = intrinsics();
        values[1][1] = 0.0;
        assert_eq!(
            CameraCalibration::from_values(&values, &[0.0; 5]).unwrap_err(),
            ConfigurationError::ZeroFocalLength
        );
    }

    #[test]
    fn test_project_without_distortion() {
        let calibration = CameraCalibration::from_values(&intrinsics(), &[0.0; 5]).unwrap();
        let p = calibration
            .project(DVec3::ZERO, DVec3::new(0.0, 0.0, 2.0), DVec3::new(0.2, -0.1, 0.0))
            .unwrap();
        assert!((p - DVec2::new(740.0, 310.0)).length() < 1e-9);
    }

    #[test]
    fn test_project_behind_camera() {
        let calibration = CameraCalibration::from_values(&intrinsics(), &[0.0; 5]).unwrap();
        assert!(calibration
            .project(DVec3::ZERO, DVec3::new(0.0, 0.0, -1.0), DVec3::ZERO)
            .is_none());
    }

    #[test]
    fn test_radial_distortion_pushes_outward() {
        let calibration = CameraCalibration::from_values(&intrinsics(), &[0.1, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let d = calibration.distort_normalized(DVec2::new(0.5, 0.0));
        assert!((d.x - 0.5 * (1.0 + 0.1 * 0.25)).abs() < 1e-12);
        assert_eq!(d.y, 0.0);
    }
}
