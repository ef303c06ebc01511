//! Worker fan-out and lifecycle
//!
//! Builds the per-camera runtime (queues, shared scalars, worker threads),
//! starts consumers before their producers, and tears everything down in
//! the opposite order on shutdown or config reload. Frame regions are
//! swept before a generation is considered gone.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, error, info, warn};

use camera_capture::{CaptureSupervisor, LibvaGpuSelector};
use edgescope_core::config::CameraConfig;
use edgescope_core::metrics::CameraMetrics;
use edgescope_core::types::{Event, FrameKey};
use edgescope_core::{AppConfig, EdgeError, Result};
use frame_process::{EventSink, EventWorker, ObjectDetectClient, ProcessWorker, TracingSink};
use frame_shm::SharedFrameManager;
use object_detect::{NoopDetector, ObjectDetectionWorker, ReadyEvent};

/// Main-loop poll period.
const TICK: Duration = Duration::from_millis(500);
/// Ticks between runtime stats lines.
const STATS_TICKS: u32 = 40;

/// Events queue up shallow: analysis is best-effort real-time.
const EVENT_QUEUE_SIZE: usize = 2;
const FRAME_QUEUE_MIN: usize = 2;
const FRAME_QUEUE_MAX: usize = 50;

pub struct Orchestrator {
    config_path: PathBuf,
    config: AppConfig,
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

struct CameraRuntime {
    name: String,
    metrics: Arc<CameraMetrics>,
    frame_rx: Receiver<FrameKey>,
    capture: JoinHandle<()>,
    process: JoinHandle<()>,
}

struct Generation {
    stop: Arc<AtomicBool>,
    cameras: Vec<CameraRuntime>,
    object: Option<JoinHandle<()>>,
    event: JoinHandle<()>,
}

impl Orchestrator {
    pub fn new(config_path: PathBuf, config: AppConfig) -> Self {
        Self {
            config_path,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            reload: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Outer supervisor loop: one worker generation per config, rebuilt on
    /// every reload, until SIGINT/SIGTERM.
    pub fn run(mut self) -> Result<()> {
        let shutdown = Arc::clone(&self.shutdown);
        ctrlc::set_handler(move || {
            info!("shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
        })
        .map_err(|e| EdgeError::Worker(format!("failed to install signal handler: {e}")))?;

        let _watcher = crate::watch::watch_config(&self.config_path, Arc::clone(&self.reload))?;

        while !self.shutdown.load(Ordering::Relaxed) {
            self.reload.store(false, Ordering::Relaxed);

            let generation = self.start_generation();
            let mut ticks = 0u32;
            while !self.reload.load(Ordering::Relaxed) && !self.shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(TICK);
                ticks += 1;
                if ticks % STATS_TICKS == 0 {
                    self.log_stats(&generation);
                }
            }
            self.stop_generation(generation);

            if self.reload.load(Ordering::Relaxed) && !self.shutdown.load(Ordering::Relaxed) {
                // An invalid file keeps the previous config running.
                match AppConfig::load(&self.config_path) {
                    Ok(config) => {
                        info!("config reloaded");
                        self.config = config;
                    }
                    Err(e) => error!("config reload failed, keeping previous config: {e}"),
                }
            }
        }

        Ok(())
    }

    /// Starts one worker generation. Consumers come up before their
    /// producers: event, object detection, process, then capture.
    fn start_generation(&self) -> Generation {
        let stop = Arc::new(AtomicBool::new(false));
        let gpu = LibvaGpuSelector::new();

        let enabled: Vec<(&String, &CameraConfig)> = self
            .config
            .cameras
            .iter()
            .filter(|(name, camera)| {
                if !camera.enabled {
                    info!(camera = %name, "camera is disabled, skipping");
                }
                camera.enabled
            })
            .collect();

        let (event_tx, event_rx) = bounded::<Event>(EVENT_QUEUE_SIZE);
        let sinks: Vec<Box<dyn EventSink>> =
            vec![Box::new(TracingSink::new(&self.config.mqtt.topic_prefix))];
        let event_worker = EventWorker::new(event_rx, sinks, Arc::clone(&stop));
        let event = spawn_worker("event-worker", move || event_worker.run());

        let (token_tx, token_rx) = bounded::<String>(enabled.len().max(1));
        let mut ready_events: HashMap<String, ReadyEvent> = HashMap::new();
        let mut shapes = HashMap::new();
        for (name, camera) in &enabled {
            let (height, width) = camera.frame_shape();
            ready_events.insert((*name).clone(), ReadyEvent::new());
            shapes.insert((*name).clone(), (height as usize, width as usize));
        }

        let object = if enabled.is_empty() {
            None
        } else {
            let worker = ObjectDetectionWorker::new(
                "object-detect",
                self.config.model.clone(),
                shapes,
                token_rx,
                ready_events.clone(),
                Box::new(NoopDetector::new()),
                Arc::clone(&stop),
            );
            Some(spawn_worker("object-detect", move || worker.run()))
        };

        let mut cameras = Vec::new();
        for (name, camera) in &enabled {
            let queue_size = (camera.detect.fps as usize).clamp(FRAME_QUEUE_MIN, FRAME_QUEUE_MAX);
            let (frame_tx, frame_rx) = bounded::<FrameKey>(queue_size);
            let metrics = Arc::new(CameraMetrics::new());

            let client = ObjectDetectClient::new(
                name,
                token_tx.clone(),
                ready_events[name.as_str()].clone(),
            );
            let process_worker = ProcessWorker::new(
                name,
                (*camera).clone(),
                frame_rx.clone(),
                event_tx.clone(),
                Some(client),
                Arc::clone(&stop),
            );
            let process = spawn_worker(&format!("process:{name}"), move || process_worker.run());

            let capture_supervisor = CaptureSupervisor::new(
                name,
                camera,
                &gpu,
                frame_tx,
                frame_rx.clone(),
                Arc::clone(&metrics),
                Arc::clone(&stop),
            );
            let capture = spawn_worker(&format!("capture:{name}"), move || capture_supervisor.run());

            info!(camera = %name, queue_size, "camera workers started");
            cameras.push(CameraRuntime {
                name: (*name).clone(),
                metrics,
                frame_rx,
                capture,
                process,
            });
        }

        info!(cameras = cameras.len(), "worker generation started");
        Generation {
            stop,
            cameras,
            object,
            event,
        }
    }

    /// Stops a generation: producers first, consumers last, then sweeps
    /// whatever regions remained queued.
    fn stop_generation(&self, generation: Generation) {
        info!("stopping worker generation");
        generation.stop.store(true, Ordering::Relaxed);

        let mut sweeper = SharedFrameManager::new();
        for camera in generation.cameras {
            join_worker(&format!("capture:{}", camera.name), camera.capture);
            join_worker(&format!("process:{}", camera.name), camera.process);

            let mut swept = 0usize;
            while let Ok(key) = camera.frame_rx.try_recv() {
                let _ = sweeper.delete(key.as_str());
                swept += 1;
            }
            if swept > 0 {
                debug!(camera = %camera.name, swept, "swept leftover frame regions");
            }
        }

        if let Some(object) = generation.object {
            join_worker("object-detect", object);
        }
        join_worker("event-worker", generation.event);
        info!("worker generation stopped");
    }

    fn log_stats(&self, generation: &Generation) {
        for camera in &generation.cameras {
            debug!(
                camera = %camera.name,
                fps = camera.metrics.camera_fps(),
                skipped_fps = camera.metrics.skipped_fps(),
                decoder_pid = camera.metrics.decoder_pid(),
                "camera stats"
            );
        }
    }
}

fn spawn_worker<F>(name: &str, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("spawn worker thread")
}

fn join_worker(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(worker = name, "worker panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn orchestrator_for(yaml: &str) -> Orchestrator {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        let path = file.into_temp_path();
        let config = AppConfig::load(&path).unwrap();
        Orchestrator::new(path.to_path_buf(), config)
    }

    #[test]
    fn disabled_cameras_spawn_no_workers() {
        let orchestrator = orchestrator_for(
            r#"
cameras:
  front:
    enabled: false
    source:
      path: rtsp://example/stream
"#,
        );
        let generation = orchestrator.start_generation();
        assert!(generation.cameras.is_empty());
        assert!(generation.object.is_none());
        orchestrator.stop_generation(generation);
    }

    #[test]
    fn generation_stops_cleanly_with_an_unreachable_decoder() {
        // The decoder binary fails to produce frames; the watchdog keeps
        // retrying until the generation is stopped.
        let orchestrator = orchestrator_for(
            r#"
cameras:
  front:
    source:
      path: /nonexistent/stream.mp4
      ffmpeg:
        retry_interval: 0.2
    detect:
      width: 32
      height: 32
      fps: 5
"#,
        );
        let generation = orchestrator.start_generation();
        assert_eq!(generation.cameras.len(), 1);
        std::thread::sleep(Duration::from_millis(500));
        orchestrator.stop_generation(generation);
    }
}
