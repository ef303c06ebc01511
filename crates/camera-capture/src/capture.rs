//! Capture supervision
//!
//! One supervisor per camera. Owns the decoder subprocess and the collector
//! thread and serializes every decoder transition through its watchdog
//! loop: collector death, frame stall and runaway capture rate all end in
//! a decoder restart after `retry_interval`.

use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, warn};

use edgescope_core::config::CameraConfig;
use edgescope_core::fps;
use edgescope_core::metrics::CameraMetrics;
use edgescope_core::types::FrameKey;
use frame_shm::SharedFrameManager;

use crate::collector::{CollectorExit, FrameCollector};
use crate::decoder::{DecoderProcess, DecoderSupervisor};
use crate::ffmpeg::{build_decoder_command, DecoderCommand, LibvaGpuSelector};

/// Seconds without a frame before the decoder is declared stalled.
pub const STALL_SECS: f64 = 20.0;

/// Grace for a stalled decoder: SIGTERM, then kill.
const STALL_STOP_GRACE: Duration = Duration::from_secs(30);
/// How long the stop path waits for the collector thread to come home.
const COLLECTOR_JOIN_GRACE: Duration = Duration::from_secs(30);

pub struct CaptureSupervisor {
    camera: String,
    command: DecoderCommand,
    frame_size: usize,
    retry_interval: Duration,
    runaway_fps: f64,
    decoder: DecoderSupervisor,
    process: Option<DecoderProcess>,
    collector: Option<JoinHandle<CollectorExit>>,
    frame_tx: Sender<FrameKey>,
    frame_rx: Receiver<FrameKey>,
    metrics: Arc<CameraMetrics>,
    stop: Arc<AtomicBool>,
    started_at: f64,
}

impl CaptureSupervisor {
    pub fn new(
        camera: &str,
        config: &CameraConfig,
        gpu: &LibvaGpuSelector,
        frame_tx: Sender<FrameKey>,
        frame_rx: Receiver<FrameKey>,
        metrics: Arc<CameraMetrics>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            camera: camera.to_string(),
            command: build_decoder_command(&config.source, &config.detect, gpu),
            frame_size: config.frame_size(),
            retry_interval: Duration::from_secs_f64(config.source.ffmpeg.retry_interval),
            runaway_fps: config.source.ffmpeg.runaway_fps,
            decoder: DecoderSupervisor::new(camera),
            process: None,
            collector: None,
            frame_tx,
            frame_rx,
            metrics,
            stop,
            started_at: 0.0,
        }
    }

    /// Watchdog loop. Runs until the stop flag is raised, then tears the
    /// capture side down and drains the frame queue.
    pub fn run(mut self) {
        info!(camera = %self.camera, "capture supervisor started");
        if !self.stop.load(Ordering::Relaxed) {
            self.start_capture();
        }

        while !self.sleep_interruptibly(self.retry_interval) {
            let now = fps::now();
            // A decoder that never produced a frame stalls against its own
            // start time.
            let last_frame = self.metrics.last_frame_time().max(self.started_at);
            let fps = self.metrics.camera_fps();

            if !self.collector_alive() {
                info!(camera = %self.camera, "frame collector is gone, restarting decoder");
                self.metrics.set_camera_fps(0.0);
                self.decoder.dump_log();
                self.start_capture();
            } else if now - last_frame > STALL_SECS {
                warn!(
                    camera = %self.camera,
                    "no frames for {:.0}s, terminating decoder", now - last_frame
                );
                self.metrics.set_camera_fps(0.0);
                self.terminate_decoder();
            } else if fps >= self.runaway_fps {
                warn!(camera = %self.camera, fps, "runaway capture rate, terminating decoder");
                self.metrics.set_camera_fps(0.0);
                self.terminate_decoder();
            }
        }

        self.shutdown();
        info!(camera = %self.camera, "capture supervisor stopped");
    }

    /// Sleeps up to `period`, waking early on stop. Returns true on stop.
    fn sleep_interruptibly(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        while Instant::now() < deadline {
            if self.stop.load(Ordering::Relaxed) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        self.stop.load(Ordering::Relaxed)
    }

    fn collector_alive(&self) -> bool {
        self.collector.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Starts (or restarts) the decoder and a fresh collector thread over
    /// its stdout. A spawn failure is recoverable: the next watchdog pass
    /// tries again.
    fn start_capture(&mut self) {
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
        }

        let mut process = match self.decoder.restart(&self.command, self.process.take()) {
            Ok(process) => process,
            Err(e) => {
                error!(camera = %self.camera, "decoder start failed: {e}");
                return;
            }
        };

        let stdout = match process.take_stdout() {
            Ok(stdout) => stdout,
            Err(e) => {
                error!(camera = %self.camera, "{e}");
                return;
            }
        };

        self.metrics.set_decoder_pid(process.pid());
        self.process = Some(process);
        self.started_at = fps::now();

        let reader = BufReader::with_capacity(self.frame_size.saturating_mul(20), stdout);
        let collector = FrameCollector::new(
            &self.camera,
            self.frame_size,
            self.frame_tx.clone(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.stop),
        );
        let name = format!("collector:{}", self.camera);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || collector.run(reader))
            .expect("spawn frame collector");
        self.collector = Some(handle);
    }

    /// Terminates the decoder only. The collector sees EOF and exits; the
    /// next watchdog pass restarts both.
    fn terminate_decoder(&mut self) {
        if let Some(mut process) = self.process.take() {
            self.decoder.stop(&mut process, STALL_STOP_GRACE);
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            self.decoder.stop(&mut process, crate::decoder::STOP_GRACE);
        }

        if let Some(handle) = self.collector.take() {
            let deadline = Instant::now() + COLLECTOR_JOIN_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(50));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                error!(camera = %self.camera, "collector did not stop in time, detaching");
            }
        }

        // Whatever was queued but never consumed is swept here.
        let mut sweeper = SharedFrameManager::new();
        let mut drained = 0usize;
        while let Ok(key) = self.frame_rx.try_recv() {
            let _ = sweeper.delete(key.as_str());
            drained += 1;
        }
        if drained > 0 {
            info!(camera = %self.camera, drained, "drained frame queue on stop");
        }

        self.decoder.dump_log();
    }
}
