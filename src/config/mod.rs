//! Configuration and serialization module.
//!
//! A single JSON document describes the camera, its calibration, the marker
//! detector, the points file and how the overlay is drawn.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detection::{DetectorParams, DictionarySpec};

/// Errors reading or writing a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no platform config directory")]
    NoConfigDir,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub camera: CameraConfig,
    pub calibration: CalibrationConfig,
    pub detector: DetectorConfig,
    pub points: PointsConfig,
    pub overlay: OverlayConfig,
}

/// Camera selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index passed to the camera backend.
    pub device_index: u32,
    /// Marker id the trace is anchored to.
    pub target_marker_id: i32,
    /// Longest wait for a frame per cycle, in milliseconds.
    pub frame_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            target_marker_id: 0,
            frame_timeout_ms: 100,
        }
    }
}

/// Camera intrinsics.
///
/// Empty by default; a usable calibration must be supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Intrinsic matrix, row-major (3 rows of 3).
    pub camera_matrix: Vec<Vec<f64>>,
    /// Distortion coefficients k1, k2, p1, p2, k3.
    pub distortion: Vec<f64>,
}

/// Marker detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub dictionary: DictionarySpec,
    pub params: DetectorParams,
    /// Side length used for pose estimation. Poses and axes are in these units.
    pub marker_length: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            dictionary: DictionarySpec::default(),
            params: DetectorParams::default(),
            marker_length: 1.0,
        }
    }
}

/// Model points file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Loaded at startup and on `reload` when set.
    pub path: Option<PathBuf>,
    /// Field delimiter.
    pub delimiter: char,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            path: None,
            delimiter: ',',
        }
    }
}

/// Overlay drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Pose axis length, as a fraction of the marker length.
    pub axis_length: f64,
    /// Radius of the trace point discs, in pixels.
    pub point_radius: i32,
    /// TrueType/OpenType font for labels, replacing the bundled DejaVu Sans Mono.
    pub label_font: Option<PathBuf>,
    /// Scale for rasterised labels, in pixels.
    pub label_scale: f32,
    /// Output size; frames keep the camera size when unset.
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    /// Where the binary writes the latest frame on `snapshot`.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            axis_length: 0.5,
            point_radius: 5,
            label_font: None,
            label_scale: 20.0,
            display_width: None,
            display_height: None,
            snapshot_path: None,
        }
    }
}

impl OverlayConfig {
    /// Configured output size, when both dimensions are set and non-zero.
    pub fn display_size(&self) -> Option<(u32, u32)> {
        match (self.display_width, self.display_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

impl TraceConfig {
    /// Load from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save to a JSON file, creating parent directories as needed
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Default config location under the platform config directory
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|mut p| {
                p.push("MarkerTrace");
                p.push("config.json");
                p
            })
            .ok_or(ConfigError::NoConfigDir)
    }
}
