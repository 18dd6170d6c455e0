//! Marker Trace - Main Entry Point
//!
//! Runs the trace overlay against a live camera. Reads commands from stdin:
//! `reload`, `marker <id>`, `snapshot`, `cameras`, `quit`.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use marker_trace::camera::{list_cameras, NokhwaBackend};
use marker_trace::detection::{ArucoMarkerDetector, PnpPoseEstimator};
use marker_trace::display::frame_slot;
use marker_trace::render::Compositor;
use marker_trace::render_loop::{ControlHandle, Pipeline};
use marker_trace::{ComposedFrame, TraceConfig, TraceController};

const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);
const DISPLAY_POLL: Duration = Duration::from_millis(100);

/// Console command
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Reload,
    Marker(i32),
    Snapshot,
    Cameras,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some("reload") => Command::Reload,
            Some("marker") => {
                let id = words.next().ok_or("usage: marker <id>")?;
                let id = id
                    .parse()
                    .map_err(|_| format!("invalid marker id: {}", id))?;
                Command::Marker(id)
            }
            Some("snapshot") => Command::Snapshot,
            Some("cameras") => Command::Cameras,
            Some("quit") | Some("exit") => Command::Quit,
            Some(other) => return Err(format!("unknown command: {}", other)),
            None => return Err("empty command".to_string()),
        };
        match words.next() {
            Some(extra) => Err(format!("unexpected argument: {}", extra)),
            None => Ok(command),
        }
    }
}

/// Forward stdin lines as commands. EOF quits.
fn spawn_command_reader() -> std::io::Result<Receiver<Command>> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(command) => {
                        let quit = command == Command::Quit;
                        if sender.send(command).is_err() || quit {
                            return;
                        }
                    }
                    Err(e) => log::warn!("{}", e),
                }
            }
            let _ = sender.send(Command::Quit);
        })?;
    Ok(receiver)
}

/// Warn about an id the configured dictionary can never report.
fn check_marker_id(config: &TraceConfig, marker_id: i32) {
    let dictionary = config.detector.dictionary;
    if !dictionary.contains(marker_id) {
        log::warn!(
            "Marker {} is outside the {} dictionary ({} ids) and will never be detected",
            marker_id,
            dictionary.display_name(),
            dictionary.marker_count()
        );
    }
}

fn reload_points(handle: &ControlHandle, config: &TraceConfig) {
    let Some(path) = &config.points.path else {
        log::warn!("No points file configured");
        return;
    };
    if let Err(e) = handle.load_points_file(path, config.points.delimiter) {
        log::error!("Failed to load {}: {}", path.display(), e);
    }
}

fn save_snapshot(frame: Option<&ComposedFrame>, path: Option<&PathBuf>) {
    let Some(path) = path else {
        log::warn!("No snapshot path configured");
        return;
    };
    let Some(frame) = frame else {
        log::warn!("No frame to save yet");
        return;
    };
    match frame.image.save(path) {
        Ok(()) => log::info!("Saved frame {} to {}", frame.frame_number, path.display()),
        Err(e) => log::error!("Failed to save snapshot: {}", e),
    }
}

fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = if config_path.exists() {
        log::info!("Loading config from {}", config_path.display());
        TraceConfig::load_from_file(&config_path)?
    } else {
        log::warn!(
            "Config not found at {}, writing defaults; fill in the calibration and restart",
            config_path.display()
        );
        TraceConfig::default().save_to_file(&config_path)?;
        return Ok(());
    };

    for camera in list_cameras() {
        log::info!("Camera {}: {}", camera.index, camera.name);
    }

    let detector = ArucoMarkerDetector::new(config.detector.dictionary, &config.detector.params)?;
    let compositor = Compositor::from_config(&config.overlay)?;
    let pipeline = Pipeline::new(
        Box::new(detector),
        Box::new(PnpPoseEstimator::new()),
        compositor,
        config.detector.marker_length,
    );

    let backend = NokhwaBackend::new(Duration::from_millis(config.camera.frame_timeout_ms));
    let (publisher, frames) = frame_slot();
    let mut controller = TraceController::new(
        Box::new(backend),
        pipeline,
        config.calibration.clone(),
        Arc::new(publisher),
    );
    let handle = controller.handle();

    if config.points.path.is_some() {
        reload_points(&handle, &config);
    }

    check_marker_id(&config, config.camera.target_marker_id);
    controller.start(config.camera.device_index, config.camera.target_marker_id)?;
    let commands = spawn_command_reader()?;

    let mut latest: Option<ComposedFrame> = None;
    let mut frame_count: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        match commands.try_recv() {
            Ok(Command::Quit) | Err(TryRecvError::Disconnected) => break,
            Ok(Command::Reload) => reload_points(&handle, &config),
            Ok(Command::Marker(id)) => {
                check_marker_id(&config, id);
                handle.set_target_marker(id);
            }
            Ok(Command::Snapshot) => {
                save_snapshot(latest.as_ref(), config.overlay.snapshot_path.as_ref())
            }
            Ok(Command::Cameras) => {
                for camera in list_cameras() {
                    log::info!("Camera {}: {}", camera.index, camera.name);
                }
            }
            Err(TryRecvError::Empty) => {}
        }

        if let Some(frame) = frames.take_timeout(DISPLAY_POLL) {
            frame_count += 1;
            latest = Some(frame);
        }

        let elapsed = last_report.elapsed();
        if elapsed >= FPS_LOG_INTERVAL {
            let fps = frame_count as f64 / elapsed.as_secs_f64();
            match latest.as_ref().and_then(|f| f.angles) {
                Some(angles) => log::info!(
                    "{:.1} fps, roll {:.1} pitch {:.1} yaw {:.1}",
                    fps,
                    angles.roll,
                    angles.pitch,
                    angles.yaw
                ),
                None => log::info!("{:.1} fps, marker {} not tracked", fps, handle.target_marker()),
            }
            frame_count = 0;
            last_report = Instant::now();
        }
    }

    controller.stop();
    Ok(())
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Marker Trace v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => match TraceConfig::default_path() {
            Ok(path) => path,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = run(config_path) {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log::info!("Marker Trace exiting");
}
