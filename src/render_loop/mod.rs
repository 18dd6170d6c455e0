//! Render loop state machine.
//!
//! `TraceController` owns the camera backend and the per-cycle pipeline and
//! runs them on a dedicated worker thread between `start` and `stop`:
//!
//! ```text
//! Idle --start--> Running --stop--> Stopping --worker joined--> Idle
//! ```
//!
//! Target marker id, model points and display sink live in shared state and
//! can be replaced at any time through a [`ControlHandle`]; the worker picks
//! the new values up on its next cycle.

mod pipeline;

pub use pipeline::Pipeline;

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::calibration::{CalibrationStore, CameraCalibration, ConfigurationError};
use crate::camera::{CameraBackend, DeviceError, FrameSource};
use crate::config::CalibrationConfig;
use crate::display::DisplaySink;
use crate::points::{FormatError, ModelPointSet};

/// Lifecycle of the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
}

/// Error returned by [`TraceController::start`].
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("render loop is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("invalid calibration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("failed to spawn render worker: {0}")]
    Spawn(String),
}

/// Cooperative cancellation flag checked by the worker once per cycle.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State shared between the control side and the worker.
struct Shared {
    target_marker: AtomicI32,
    points: RwLock<ModelPointSet>,
    sink: RwLock<Arc<dyn DisplaySink>>,
    state: Mutex<LoopState>,
}

impl Shared {
    fn set_state(&self, state: LoopState) {
        *self.state.lock() = state;
    }
}

/// Cloneable access to the runtime-adjustable parts of the loop.
///
/// Safe to use from any thread while the loop runs.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    pub fn state(&self) -> LoopState {
        *self.shared.state.lock()
    }

    /// Parse a new point set and swap it in.
    ///
    /// On error the current set is left untouched. Returns the number of points.
    pub fn load_points<R: BufRead>(&self, source: R, delimiter: char) -> Result<usize, FormatError> {
        let points = ModelPointSet::parse(source, delimiter)?;
        Ok(self.replace_points(points))
    }

    /// [`load_points`](Self::load_points) from a file.
    pub fn load_points_file(&self, path: &Path, delimiter: char) -> Result<usize, FormatError> {
        let points = ModelPointSet::load_file(path, delimiter)?;
        let count = self.replace_points(points);
        log::info!("Loaded {} points from {}", count, path.display());
        Ok(count)
    }

    fn replace_points(&self, points: ModelPointSet) -> usize {
        let count = points.len();
        *self.shared.points.write() = points;
        if count == 0 {
            log::warn!("Point set is empty");
        }
        count
    }

    /// Snapshot of the current point set.
    pub fn points(&self) -> ModelPointSet {
        self.shared.points.read().clone()
    }

    pub fn set_target_marker(&self, marker_id: i32) {
        self.shared.target_marker.store(marker_id, Ordering::Release);
        log::info!("Target marker set to {}", marker_id);
    }

    pub fn target_marker(&self) -> i32 {
        self.shared.target_marker.load(Ordering::Acquire)
    }

    pub fn set_display_sink(&self, sink: Arc<dyn DisplaySink>) {
        *self.shared.sink.write() = sink;
    }
}

/// A running worker.
struct Worker {
    token: StopToken,
    thread: JoinHandle<()>,
}

/// Owns the camera backend, calibration and pipeline, and drives the loop.
pub struct TraceController {
    handle: ControlHandle,
    backend: Box<dyn CameraBackend>,
    calibration_values: CalibrationConfig,
    calibration: CalibrationStore,
    pipeline: Arc<Mutex<Pipeline>>,
    worker: Option<Worker>,
    /// Worker stack size; platform default when `None`.
    stack_size: Option<usize>,
}

impl TraceController {
    pub fn new(
        backend: Box<dyn CameraBackend>,
        pipeline: Pipeline,
        calibration: CalibrationConfig,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        let shared = Arc::new(Shared {
            target_marker: AtomicI32::new(0),
            points: RwLock::new(ModelPointSet::default()),
            sink: RwLock::new(sink),
            state: Mutex::new(LoopState::Idle),
        });
        Self {
            handle: ControlHandle { shared },
            backend,
            calibration_values: calibration,
            calibration: CalibrationStore::new(),
            pipeline: Arc::new(Mutex::new(pipeline)),
            worker: None,
            stack_size: None,
        }
    }

    /// Open the camera, load the calibration and launch the worker.
    ///
    /// Nothing changes on error: the stored calibration is only replaced once
    /// the worker is running, and a camera opened before a later failure is
    /// closed again.
    pub fn start(&mut self, device_index: u32, target_marker_id: i32) -> Result<(), ControlError> {
        if self.state() != LoopState::Idle {
            return Err(ControlError::AlreadyRunning);
        }

        let mut source = self.backend.open(device_index)?;

        let calibration = match CameraCalibration::from_values(
            &self.calibration_values.camera_matrix,
            &self.calibration_values.distortion,
        ) {
            Ok(calibration) => Arc::new(calibration),
            Err(e) => {
                source.close();
                log::error!("Calibration rejected: {}", e);
                return Err(e.into());
            }
        };

        // The source is held here until the worker is spawned.
        let (source_tx, source_rx) = crossbeam_channel::bounded::<Box<dyn FrameSource>>(1);
        let token = StopToken::new();
        let shared = self.handle.shared.clone();
        let pipeline = self.pipeline.clone();
        let worker_token = token.clone();
        let worker_calibration = calibration.clone();

        let mut builder = std::thread::Builder::new().name("marker-trace".to_string());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let spawned = builder.spawn(move || {
            let Ok(source) = source_rx.recv() else {
                return;
            };
            Self::worker_thread(source, worker_calibration, shared, pipeline, worker_token);
        });

        match spawned {
            Ok(thread) => {
                self.calibration.replace(calibration);
                self.handle.set_target_marker(target_marker_id);
                self.handle.shared.set_state(LoopState::Running);
                if let Err(e) = source_tx.send(source) {
                    // Only possible if the worker is already gone.
                    e.into_inner().close();
                }
                self.worker = Some(Worker { token, thread });
                log::info!(
                    "Render loop started (camera {}, marker {})",
                    device_index,
                    target_marker_id
                );
                Ok(())
            }
            Err(e) => {
                source.close();
                log::error!("Failed to spawn render worker: {}", e);
                Err(ControlError::Spawn(e.to_string()))
            }
        }
    }

    /// Ask the worker to finish its current cycle, wait for it and return to Idle.
    ///
    /// No-op when Idle.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.handle.shared.set_state(LoopState::Stopping);
        worker.token.cancel();
        if worker.thread.join().is_err() {
            log::error!("Render worker panicked");
        }
        self.handle.shared.set_state(LoopState::Idle);
        log::info!("Render loop stopped");
    }

    /// Worker main loop
    fn worker_thread(
        mut source: Box<dyn FrameSource>,
        calibration: Arc<CameraCalibration>,
        shared: Arc<Shared>,
        pipeline: Arc<Mutex<Pipeline>>,
        token: StopToken,
    ) {
        log::info!("Render worker started");
        let mut pipeline = pipeline.lock();
        let mut published: u64 = 0;

        while !token.is_cancelled() {
            let Some(frame) = source.retrieve_latest() else {
                log::trace!("No frame this cycle");
                continue;
            };

            let target = shared.target_marker.load(Ordering::Acquire);
            let points = shared.points.read().clone();
            if let Some(composed) = pipeline.process_frame(frame, &calibration, target, &points) {
                let sink = shared.sink.read().clone();
                sink.publish(composed);
                published += 1;
            }
        }

        source.close();
        log::info!("Render worker stopped after {} frames", published);
    }

    pub fn state(&self) -> LoopState {
        self.handle.state()
    }

    /// A handle for adjusting the loop from other threads.
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Calibration loaded by the last successful `start`.
    pub fn calibration(&self) -> Option<Arc<CameraCalibration>> {
        self.calibration.get()
    }

    pub fn load_points<R: BufRead>(&self, source: R, delimiter: char) -> Result<usize, FormatError> {
        self.handle.load_points(source, delimiter)
    }

    pub fn load_points_file(&self, path: &Path, delimiter: char) -> Result<usize, FormatError> {
        self.handle.load_points_file(path, delimiter)
    }

    pub fn points(&self) -> ModelPointSet {
        self.handle.points()
    }

    pub fn set_target_marker(&self, marker_id: i32) {
        self.handle.set_target_marker(marker_id);
    }

    pub fn set_display_sink(&self, sink: Arc<dyn DisplaySink>) {
        self.handle.set_display_sink(sink);
    }
}

impl Drop for TraceController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use glam::{DVec2, DVec3};
    use image::RgbaImage;

    use crate::camera::CameraFrame;
    use crate::detection::{Detections, MarkerDetector, MarkerPose, PoseEstimator, Quad};
    use crate::display::{frame_slot, FrameReceiver};
    use crate::render::{Compositor, Overlay, OverlayStyle};

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct CameraLog {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeBackend {
        fail: bool,
        log: Arc<CameraLog>,
    }

    impl CameraBackend for FakeBackend {
        fn open(&self, device_index: u32) -> Result<Box<dyn FrameSource>, DeviceError> {
            if self.fail {
                return Err(DeviceError::Open {
                    index: device_index,
                    reason: "no such device".to_string(),
                });
            }
            self.log.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSource {
                log: self.log.clone(),
                frame_number: 0,
                closed: false,
            }))
        }
    }

    struct FakeSource {
        log: Arc<CameraLog>,
        frame_number: u64,
        closed: bool,
    }

    impl FrameSource for FakeSource {
        fn retrieve_latest(&mut self) -> Option<CameraFrame> {
            if self.closed {
                return None;
            }
            std::thread::sleep(Duration::from_millis(2));
            self.frame_number += 1;
            Some(CameraFrame::from_image(RgbaImage::new(320, 240), self.frame_number))
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.log.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn square(origin: DVec2, side: f64) -> Quad {
        [
            origin,
            origin + DVec2::new(side, 0.0),
            origin + DVec2::new(side, side),
            origin + DVec2::new(0.0, side),
        ]
    }

    struct FixedDetector(Detections);

    impl MarkerDetector for FixedDetector {
        fn detect(&mut self, _frame: &RgbaImage) -> Detections {
            self.0.clone()
        }
    }

    struct FrontalEstimator;

    impl PoseEstimator for FrontalEstimator {
        fn estimate(
            &mut self,
            corners: &[Quad],
            _marker_length: f64,
            _calibration: &CameraCalibration,
        ) -> Vec<Option<MarkerPose>> {
            corners
                .iter()
                .map(|_| {
                    Some(MarkerPose {
                        rotation_vector: DVec3::ZERO,
                        translation_vector: DVec3::new(0.0, 0.0, 10.0),
                    })
                })
                .collect()
        }
    }

    fn pipeline() -> Pipeline {
        let detections = Detections {
            ids: vec![7],
            corners: vec![square(DVec2::new(100.0, 100.0), 40.0)],
            rejected: Vec::new(),
        };
        Pipeline::new(
            Box::new(FixedDetector(detections)),
            Box::new(FrontalEstimator),
            Compositor::new(OverlayStyle::default()),
            1.0,
        )
    }

    fn calibration_values() -> CalibrationConfig {
        CalibrationConfig {
            camera_matrix: vec![
                vec![800.0, 0.0, 160.0],
                vec![0.0, 800.0, 120.0],
                vec![0.0, 0.0, 1.0],
            ],
            distortion: vec![0.0; 5],
        }
    }

    fn controller(fail: bool, calibration: CalibrationConfig) -> (TraceController, FrameReceiver, Arc<CameraLog>) {
        let log = Arc::new(CameraLog::default());
        let (publisher, receiver) = frame_slot();
        let backend = FakeBackend {
            fail,
            log: log.clone(),
        };
        let controller =
            TraceController::new(Box::new(backend), pipeline(), calibration, Arc::new(publisher));
        (controller, receiver, log)
    }

    const TRACE_CSV: &str = "0,0,0\n1,0,0\n1,1,0\n";

    #[test]
    fn test_start_publishes_trace_and_stop_closes_camera() {
        let (mut controller, receiver, log) = controller(false, calibration_values());
        assert_eq!(controller.load_points(Cursor::new(TRACE_CSV), ',').unwrap(), 3);

        controller.start(0, 7).unwrap();
        assert_eq!(controller.state(), LoopState::Running);
        assert!(controller.calibration().is_some());

        let frame = receiver.take_timeout(WAIT).unwrap();
        let points = frame.overlay.projected_points();
        assert_eq!(points.len(), 3);
        assert_eq!(frame.overlay.segment_count(), 2);
        assert!(points[1].distance(DVec2::new(140.0, 100.0)) < 1e-9);
        assert!(points[2].distance(DVec2::new(140.0, 140.0)) < 1e-9);

        controller.stop();
        assert_eq!(controller.state(), LoopState::Idle);
        assert!(controller.calibration().is_none());
        assert_eq!(log.opened.load(Ordering::SeqCst), 1);
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_point_set_publishes_no_points() {
        let (mut controller, receiver, _log) = controller(false, calibration_values());
        controller.start(0, 7).unwrap();
        let frame = receiver.take_timeout(WAIT).unwrap();
        assert_eq!(frame.overlay, Overlay::NoPoints);
        controller.stop();
    }

    #[test]
    fn test_retarget_while_running() {
        let (mut controller, receiver, _log) = controller(false, calibration_values());
        controller.load_points(Cursor::new(TRACE_CSV), ',').unwrap();
        controller.start(0, 3).unwrap();
        assert_eq!(receiver.take_timeout(WAIT).unwrap().overlay, Overlay::NoMarker);

        controller.set_target_marker(7);
        let found = (0..50)
            .filter_map(|_| receiver.take_timeout(WAIT))
            .any(|frame| matches!(frame.overlay, Overlay::Trace(_)));
        assert!(found);
        controller.stop();
    }

    #[test]
    fn test_second_start_is_rejected() {
        let (mut controller, _receiver, log) = controller(false, calibration_values());
        controller.start(0, 7).unwrap();
        assert!(matches!(controller.start(1, 7), Err(ControlError::AlreadyRunning)));
        assert_eq!(log.opened.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), LoopState::Running);
        controller.stop();
    }

    #[test]
    fn test_device_error_keeps_idle() {
        let (mut controller, _receiver, _log) = controller(true, calibration_values());
        assert!(matches!(controller.start(0, 7), Err(ControlError::Device(_))));
        assert_eq!(controller.state(), LoopState::Idle);
    }

    #[test]
    fn test_bad_calibration_closes_camera() {
        let bad = CalibrationConfig {
            camera_matrix: vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            distortion: vec![0.0; 5],
        };
        let (mut controller, _receiver, log) = controller(false, bad);
        assert!(matches!(
            controller.start(0, 7),
            Err(ControlError::Configuration(ConfigurationError::MatrixRows { rows: 2 }))
        ));
        assert_eq!(controller.state(), LoopState::Idle);
        assert!(controller.calibration().is_none());
        assert_eq!(log.opened.load(Ordering::SeqCst), 1);
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_failure_closes_camera_and_keeps_calibration() {
        let (mut controller, _receiver, log) = controller(false, calibration_values());
        // No address space can hold this stack.
        controller.stack_size = Some(usize::MAX / 4);
        assert!(matches!(controller.start(0, 7), Err(ControlError::Spawn(_))));
        assert_eq!(controller.state(), LoopState::Idle);
        assert!(controller.calibration().is_none());
        assert_eq!(log.opened.load(Ordering::SeqCst), 1);
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);

        controller.stack_size = None;
        controller.start(0, 7).unwrap();
        assert!(controller.calibration().is_some());
        controller.stop();
        assert_eq!(log.closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (mut controller, _receiver, log) = controller(false, calibration_values());
        controller.stop();
        assert_eq!(controller.state(), LoopState::Idle);
        assert_eq!(log.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_after_stop() {
        let (mut controller, receiver, log) = controller(false, calibration_values());
        controller.start(0, 7).unwrap();
        controller.stop();
        controller.start(0, 7).unwrap();
        assert!(receiver.take_timeout(WAIT).is_some());
        controller.stop();
        assert_eq!(log.opened.load(Ordering::SeqCst), 2);
        assert_eq!(log.closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_reload_keeps_points() {
        let (controller, _receiver, _log) = controller(false, calibration_values());
        controller.load_points(Cursor::new(TRACE_CSV), ',').unwrap();

        let err = controller.load_points(Cursor::new("0,0,0\n1,0\n"), ',').unwrap_err();
        assert!(matches!(err, FormatError::FieldCount { line: 2, found: 2 }));
        assert_eq!(controller.points().len(), 3);
    }

    #[test]
    fn test_handle_swaps_display_sink() {
        let (mut controller, first, _log) = controller(false, calibration_values());
        let (publisher, second) = frame_slot();
        let handle = controller.handle();

        controller.start(0, 7).unwrap();
        assert!(first.take_timeout(WAIT).is_some());

        handle.set_display_sink(Arc::new(publisher));
        assert!(second.take_timeout(WAIT).is_some());
        assert_eq!(handle.state(), LoopState::Running);
        controller.stop();
        assert_eq!(handle.state(), LoopState::Idle);
    }
}
