//! Frame compositing.
//!
//! Draws the detected marker outlines, the target's pose axes and either the
//! projected trace or a status message onto the camera image. Overlay
//! coordinates are camera pixels; the optional display resize happens last.
//!
//! Labels use the bundled DejaVu Sans Mono unless another font is configured.
//! Segments are clipped to the image before drawing, so off-screen geometry
//! costs no more than on-screen geometry.

use std::path::Path;
use std::time::Instant;

use ab_glyph::{FontArc, PxScale};
use glam::{DVec2, DVec3};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing;

use crate::calibration::CameraCalibration;
use crate::config::OverlayConfig;
use crate::detection::{Detections, Quad};
use crate::pose::{EulerAngles, FramePose};

pub const OUTLINE_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const MARKER_ID_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const SEGMENT_COLOR: Rgba<u8> = Rgba([255, 127, 0, 255]);
pub const POINT_COLOR: Rgba<u8> = Rgba([0, 127, 255, 255]);
pub const POINT_LABEL_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);
pub const STATUS_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const AXIS_COLORS: [Rgba<u8>; 3] = [
    Rgba([255, 0, 0, 255]),
    Rgba([0, 255, 0, 255]),
    Rgba([0, 0, 255, 255]),
];

pub const NO_POINTS_MESSAGE: &str = "No points! Please load CSV file!";
const STATUS_POSITION: DVec2 = DVec2::new(50.0, 50.0);

/// What was drawn for the target marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    /// Target marker not found or no pose for it.
    NoMarker,
    /// Target found but the point set is empty.
    NoPoints,
    /// Projected points, in model order.
    Trace(Vec<DVec2>),
}

impl Overlay {
    pub fn projected_points(&self) -> &[DVec2] {
        match self {
            Overlay::Trace(points) => points,
            _ => &[],
        }
    }

    /// Number of connecting segments drawn.
    pub fn segment_count(&self) -> usize {
        self.projected_points().len().saturating_sub(1)
    }
}

/// Text attached to a composed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLabel {
    pub text: String,
    /// Baseline origin in camera pixels.
    pub position: DVec2,
    pub color: Rgba<u8>,
}

impl TextLabel {
    fn new(text: impl Into<String>, position: DVec2, color: Rgba<u8>) -> Self {
        Self {
            text: text.into(),
            position,
            color,
        }
    }
}

/// An immutable frame ready for display.
#[derive(Debug, Clone)]
pub struct ComposedFrame {
    pub image: RgbaImage,
    pub frame_number: u64,
    pub timestamp: Instant,
    pub overlay: Overlay,
    /// Labels in camera pixels, also rasterised into `image`.
    pub labels: Vec<TextLabel>,
    pub pose: Option<FramePose>,
    pub angles: Option<EulerAngles>,
}

/// Pose data for the target marker in this frame.
#[derive(Debug, Clone, Copy)]
pub struct TargetPose<'a> {
    pub pose: FramePose,
    pub angles: EulerAngles,
    pub calibration: &'a CameraCalibration,
    pub marker_length: f64,
}

/// Everything drawn over one camera image.
#[derive(Debug, Clone)]
pub struct Scene<'a> {
    pub detections: &'a Detections,
    pub target: Option<TargetPose<'a>>,
    pub overlay: Overlay,
}

/// Drawing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    /// Axis length as a fraction of the marker length.
    pub axis_length: f64,
    pub point_radius: i32,
    pub label_scale: f32,
    pub display_size: Option<(u32, u32)>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        OverlayStyle::from(&OverlayConfig::default())
    }
}

impl From<&OverlayConfig> for OverlayStyle {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            axis_length: config.axis_length,
            point_radius: config.point_radius,
            label_scale: config.label_scale,
            display_size: config.display_size(),
        }
    }
}

/// Error loading a label font.
#[derive(Debug, thiserror::Error)]
pub enum FontError {
    #[error("failed to read font: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid font data")]
    Invalid,
}

static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSansMono.ttf");

/// Load a TrueType/OpenType font from disk.
pub fn load_font(path: &Path) -> Result<FontArc, FontError> {
    let data = std::fs::read(path)?;
    FontArc::try_from_vec(data).map_err(|_| FontError::Invalid)
}

/// The label font shipped with the crate.
pub fn bundled_font() -> Result<FontArc, FontError> {
    FontArc::try_from_slice(BUNDLED_FONT).map_err(|_| FontError::Invalid)
}

/// Draws overlays onto camera frames.
pub struct Compositor {
    style: OverlayStyle,
    font: Option<FontArc>,
}

impl Compositor {
    /// A compositor labelling with the bundled font.
    pub fn new(style: OverlayStyle) -> Self {
        let font = match bundled_font() {
            Ok(font) => Some(font),
            Err(e) => {
                log::warn!("Bundled label font unusable, labels disabled: {}", e);
                None
            }
        };
        Self { style, font }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Build from the overlay config; `label_font` replaces the bundled font.
    pub fn from_config(config: &OverlayConfig) -> Result<Self, FontError> {
        let compositor = Self::new(OverlayStyle::from(config));
        match &config.label_font {
            Some(path) => {
                let font = load_font(path)?;
                log::info!("Label font loaded from {}", path.display());
                Ok(compositor.with_font(font))
            }
            None => Ok(compositor),
        }
    }

    /// Draw `scene` over `image` and package the result.
    pub fn compose(
        &self,
        mut image: RgbaImage,
        frame_number: u64,
        timestamp: Instant,
        scene: Scene<'_>,
    ) -> ComposedFrame {
        let mut labels = Vec::new();
        let (width, height) = image.dimensions();
        let bounds = Bounds::new(width, height);

        for (quad, id) in scene.detections.corners.iter().zip(&scene.detections.ids) {
            draw_quad(&mut image, &bounds, quad, OUTLINE_COLOR);
            labels.push(TextLabel::new(
                format!("id={}", id),
                quad_centre(quad),
                MARKER_ID_COLOR,
            ));
        }

        if let Some(target) = &scene.target {
            self.draw_axes(&mut image, &bounds, target);
        }

        match &scene.overlay {
            Overlay::NoMarker => {}
            Overlay::NoPoints => {
                labels.push(TextLabel::new(NO_POINTS_MESSAGE, STATUS_POSITION, STATUS_COLOR));
            }
            Overlay::Trace(points) => {
                for (index, point) in points.iter().enumerate() {
                    if let Some(next) = points.get(index + 1) {
                        draw_segment(&mut image, &bounds, *point, *next, SEGMENT_COLOR);
                    }
                    let radius = self.style.point_radius;
                    if bounds.contains(*point, radius as f64) {
                        drawing::draw_filled_circle_mut(
                            &mut image,
                            to_i32(*point),
                            radius,
                            POINT_COLOR,
                        );
                    }
                    labels.push(TextLabel::new(index.to_string(), *point, POINT_LABEL_COLOR));
                }
            }
        }

        if let Some(font) = &self.font {
            let scale = PxScale::from(self.style.label_scale);
            for label in &labels {
                let reach = self.style.label_scale as f64 * (label.text.len() as f64 + 1.0);
                if !bounds.contains(label.position, reach) {
                    continue;
                }
                let (x, y) = to_i32(label.position);
                let top = y - self.style.label_scale.round() as i32;
                drawing::draw_text_mut(&mut image, label.color, x, top, scale, font, &label.text);
            }
        }

        if let Some((width, height)) = self.style.display_size {
            if image.dimensions() != (width, height) {
                image = imageops::resize(&image, width, height, FilterType::Triangle);
            }
        }

        ComposedFrame {
            image,
            frame_number,
            timestamp,
            overlay: scene.overlay,
            labels,
            pose: scene.target.map(|t| t.pose),
            angles: scene.target.map(|t| t.angles),
        }
    }

    fn draw_axes(&self, image: &mut RgbaImage, bounds: &Bounds, target: &TargetPose<'_>) {
        let length = self.style.axis_length * target.marker_length;
        let rvec = target.pose.rotation_vector;
        let tvec = target.pose.translation_vector;
        let Some(origin) = target.calibration.project(rvec, tvec, DVec3::ZERO) else {
            return;
        };

        let tips = [DVec3::X, DVec3::Y, DVec3::Z];
        for (axis, color) in tips.iter().zip(AXIS_COLORS) {
            if let Some(tip) = target.calibration.project(rvec, tvec, *axis * length) {
                draw_thick_line(image, bounds, origin, tip, color);
            }
        }
    }
}

fn to_f32(p: DVec2) -> (f32, f32) {
    (p.x as f32, p.y as f32)
}

fn to_i32(p: DVec2) -> (i32, i32) {
    (p.x.round() as i32, p.y.round() as i32)
}

fn quad_centre(quad: &Quad) -> DVec2 {
    quad.iter().copied().sum::<DVec2>() / 4.0
}

/// Drawable area, one pixel wider than the image on every side.
struct Bounds {
    min: DVec2,
    max: DVec2,
}

impl Bounds {
    fn new(width: u32, height: u32) -> Self {
        Self {
            min: DVec2::splat(-1.0),
            max: DVec2::new(width as f64, height as f64),
        }
    }

    /// True when `p` is finite and within `margin` of the area.
    fn contains(&self, p: DVec2, margin: f64) -> bool {
        p.is_finite()
            && p.cmpge(self.min - margin).all()
            && p.cmple(self.max + margin).all()
    }

    /// Clip a segment to the area (Liang-Barsky).
    ///
    /// `None` when the segment misses the area or has a non-finite endpoint.
    fn clip(&self, start: DVec2, end: DVec2) -> Option<(DVec2, DVec2)> {
        if !start.is_finite() || !end.is_finite() {
            return None;
        }
        let delta = end - start;
        let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
        let edges = [
            (-delta.x, start.x - self.min.x),
            (delta.x, self.max.x - start.x),
            (-delta.y, start.y - self.min.y),
            (delta.y, self.max.y - start.y),
        ];
        for (p, q) in edges {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
        Some((start + delta * t0, start + delta * t1))
    }
}

fn draw_segment(
    image: &mut RgbaImage,
    bounds: &Bounds,
    start: DVec2,
    end: DVec2,
    color: Rgba<u8>,
) {
    if let Some((a, b)) = bounds.clip(start, end) {
        drawing::draw_line_segment_mut(image, to_f32(a), to_f32(b), color);
    }
}

fn draw_quad(image: &mut RgbaImage, bounds: &Bounds, quad: &Quad, color: Rgba<u8>) {
    for i in 0..4 {
        draw_segment(image, bounds, quad[i], quad[(i + 1) % 4], color);
    }
}

/// Three pixel wide line.
fn draw_thick_line(
    image: &mut RgbaImage,
    bounds: &Bounds,
    start: DVec2,
    end: DVec2,
    color: Rgba<u8>,
) {
    let normal = (end - start).perp().normalize_or_zero();
    for offset in [-1.0, 0.0, 1.0] {
        let shift = normal * offset;
        draw_segment(image, bounds, start + shift, end + shift, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Range;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn blank(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, BLACK)
    }

    fn square(origin: DVec2, side: f64) -> Quad {
        [
            origin,
            origin + DVec2::new(side, 0.0),
            origin + DVec2::new(side, side),
            origin + DVec2::new(0.0, side),
        ]
    }

    fn calibration() -> CameraCalibration {
        CameraCalibration::from_values(
            &[
                vec![500.0, 0.0, 100.0],
                vec![0.0, 500.0, 100.0],
                vec![0.0, 0.0, 1.0],
            ],
            &[0.0; 5],
        )
        .unwrap()
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(Overlay::NoMarker.segment_count(), 0);
        assert_eq!(Overlay::NoPoints.segment_count(), 0);
        assert_eq!(Overlay::Trace(vec![DVec2::ZERO]).segment_count(), 0);
        let trace = Overlay::Trace(vec![DVec2::ZERO, DVec2::X, DVec2::Y]);
        assert_eq!(trace.segment_count(), 2);
        assert_eq!(trace.projected_points().len(), 3);
    }

    #[test]
    fn test_trace_points_and_labels() {
        let compositor = Compositor::new(OverlayStyle::default());
        let detections = Detections::default();
        let points = vec![
            DVec2::new(20.0, 20.0),
            DVec2::new(60.0, 20.0),
            DVec2::new(60.0, 60.0),
        ];
        let frame = compositor.compose(
            blank(100, 100),
            4,
            Instant::now(),
            Scene {
                detections: &detections,
                target: None,
                overlay: Overlay::Trace(points.clone()),
            },
        );

        assert_eq!(frame.frame_number, 4);
        assert_eq!(*frame.image.get_pixel(20, 20), POINT_COLOR);
        assert_eq!(*frame.image.get_pixel(60, 60), POINT_COLOR);
        // Segment between the first two points, outside the discs.
        assert_eq!(*frame.image.get_pixel(40, 20), SEGMENT_COLOR);
        assert_eq!(*frame.image.get_pixel(40, 80), BLACK);

        let texts: Vec<&str> = frame.labels.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["0", "1", "2"]);
        assert_eq!(frame.labels[2].position, points[2]);
    }

    #[test]
    fn test_no_points_status() {
        let compositor = Compositor::new(OverlayStyle::default());
        let detections = Detections::default();
        let frame = compositor.compose(
            blank(100, 100),
            0,
            Instant::now(),
            Scene {
                detections: &detections,
                target: None,
                overlay: Overlay::NoPoints,
            },
        );
        assert_eq!(frame.labels.len(), 1);
        assert_eq!(frame.labels[0].text, NO_POINTS_MESSAGE);
        assert_eq!(frame.labels[0].position, DVec2::new(50.0, 50.0));
        assert_eq!(frame.labels[0].color, STATUS_COLOR);
    }

    /// Non-black pixels in the given window.
    fn lit_pixels(image: &RgbaImage, xs: Range<u32>, ys: Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) != BLACK)
            .count()
    }

    #[test]
    fn test_default_config_rasterises_status_text() {
        let compositor = Compositor::from_config(&OverlayConfig::default()).unwrap();
        let detections = Detections::default();
        let frame = compositor.compose(
            blank(200, 100),
            0,
            Instant::now(),
            Scene {
                detections: &detections,
                target: None,
                overlay: Overlay::NoPoints,
            },
        );
        // Text sits above its (50, 50) baseline.
        assert!(lit_pixels(&frame.image, 50..120, 30..55) > 0);
        assert_eq!(lit_pixels(&frame.image, 0..45, 0..100), 0);
    }

    #[test]
    fn test_far_off_trace_is_clipped() {
        let compositor = Compositor::new(OverlayStyle::default());
        let detections = Detections::default();
        let points = vec![
            DVec2::new(10.0, 50.0),
            DVec2::new(1e7, 50.0),
            DVec2::new(1e7, -1e7),
            DVec2::new(f64::NAN, 0.0),
            DVec2::new(-1e9, f64::INFINITY),
        ];
        let frame = compositor.compose(
            blank(100, 100),
            0,
            Instant::now(),
            Scene {
                detections: &detections,
                target: None,
                overlay: Overlay::Trace(points),
            },
        );
        // Visible part of the first segment runs to the right edge.
        assert_eq!(*frame.image.get_pixel(99, 50), SEGMENT_COLOR);
        assert_eq!(*frame.image.get_pixel(50, 80), BLACK);
        assert_eq!(frame.overlay.segment_count(), 4);
        assert_eq!(frame.labels.len(), 5);
    }

    #[test]
    fn test_clip_segment() {
        let bounds = Bounds::new(100, 100);

        let (a, b) = bounds
            .clip(DVec2::new(50.0, 50.0), DVec2::new(1e7, 50.0))
            .unwrap();
        assert_eq!(a, DVec2::new(50.0, 50.0));
        assert!((b.x - 100.0).abs() < 1e-6);
        assert_eq!(b.y, 50.0);

        let (a, b) = bounds
            .clip(DVec2::new(-50.0, -50.0), DVec2::new(150.0, 150.0))
            .unwrap();
        assert!((a - DVec2::splat(-1.0)).length() < 1e-9);
        assert!((b - DVec2::splat(100.0)).length() < 1e-9);

        assert!(bounds
            .clip(DVec2::new(200.0, 0.0), DVec2::new(300.0, 50.0))
            .is_none());
        assert!(bounds
            .clip(DVec2::new(0.0, -5.0), DVec2::new(50.0, -5.0))
            .is_none());
        assert!(bounds
            .clip(DVec2::new(f64::NAN, 0.0), DVec2::new(10.0, 10.0))
            .is_none());
    }

    #[test]
    fn test_outlines_and_axes() {
        let compositor = Compositor::new(OverlayStyle::default());
        let quad = square(DVec2::new(10.0, 10.0), 30.0);
        let detections = Detections {
            ids: vec![5],
            corners: vec![quad],
            rejected: Vec::new(),
        };
        let calibration = calibration();
        let pose = FramePose::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 10.0), &quad);
        let frame = compositor.compose(
            blank(200, 200),
            1,
            Instant::now(),
            Scene {
                detections: &detections,
                target: Some(TargetPose {
                    pose,
                    angles: pose.euler_angles(),
                    calibration: &calibration,
                    marker_length: 1.0,
                }),
                overlay: Overlay::NoPoints,
            },
        );

        // Left edge of the outline, clear of the id label.
        assert_eq!(*frame.image.get_pixel(10, 25), OUTLINE_COLOR);
        // Origin projects to the principal point; X axis tip is 25px right of it.
        assert_eq!(*frame.image.get_pixel(112, 100), AXIS_COLORS[0]);
        // Y axis runs downwards.
        assert_eq!(*frame.image.get_pixel(100, 112), AXIS_COLORS[1]);

        assert!(frame.labels.iter().any(|l| l.text == "id=5"));
        assert_eq!(frame.pose, Some(pose));
        assert!(frame.angles.is_some());
    }

    #[test]
    fn test_display_resize() {
        let style = OverlayStyle {
            display_size: Some((64, 48)),
            ..OverlayStyle::default()
        };
        let compositor = Compositor::new(style);
        let detections = Detections::default();
        let frame = compositor.compose(
            blank(128, 96),
            0,
            Instant::now(),
            Scene {
                detections: &detections,
                target: None,
                overlay: Overlay::NoMarker,
            },
        );
        assert_eq!(frame.image.dimensions(), (64, 48));
        assert!(frame.labels.is_empty());
    }

    #[test]
    fn test_missing_font_file() {
        let config = OverlayConfig {
            label_font: Some("/nonexistent/font.ttf".into()),
            ..OverlayConfig::default()
        };
        assert!(matches!(
            Compositor::from_config(&config),
            Err(FontError::Io(_))
        ));
    }

    #[test]
    fn test_invalid_font_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("font.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(matches!(load_font(&path), Err(FontError::Invalid)));
    }
}
