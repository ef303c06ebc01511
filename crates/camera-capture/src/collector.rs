//! Frame collector
//!
//! Reads fixed-size yuv420 frames from the decoder pipe into freshly
//! created shared-memory regions and announces the keys on the frame
//! queue. Never blocks on a full queue: overflow drops the newest frame
//! and bumps the skipped rate.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, error, info};

use edgescope_core::fps::{self, FpsMeter};
use edgescope_core::metrics::CameraMetrics;
use edgescope_core::types::FrameKey;
use frame_shm::SharedFrameManager;

/// Why the collector loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorExit {
    /// The stop flag was raised; a clean shutdown.
    Stopped,
    /// The decoder closed its stdout; the supervisor should restart it.
    DecoderExited,
}

pub struct FrameCollector {
    camera: String,
    frame_size: usize,
    frame_tx: Sender<FrameKey>,
    metrics: Arc<CameraMetrics>,
    stop: Arc<AtomicBool>,
    shm: SharedFrameManager,
    fps: FpsMeter,
    skipped: FpsMeter,
}

impl FrameCollector {
    pub fn new(
        camera: &str,
        frame_size: usize,
        frame_tx: Sender<FrameKey>,
        metrics: Arc<CameraMetrics>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            camera: camera.to_string(),
            frame_size,
            frame_tx,
            metrics,
            stop,
            shm: SharedFrameManager::new(),
            fps: FpsMeter::new(),
            skipped: FpsMeter::new(),
        }
    }

    /// Runs the read-enqueue loop until stop or decoder exit.
    pub fn run<R: Read>(mut self, mut frames: R) -> CollectorExit {
        info!(camera = %self.camera, "frame collector started");
        self.fps.start();
        self.skipped.start();

        let exit = loop {
            if self.stop.load(Ordering::Relaxed) {
                break CollectorExit::Stopped;
            }

            let frame_time = fps::now();
            let key = FrameKey::new(&self.camera, frame_time);

            let buffer = match self.shm.create(key.as_str(), self.frame_size) {
                Ok(buffer) => buffer,
                Err(e) => {
                    error!(camera = %self.camera, "failed to allocate frame region: {e}");
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    continue;
                }
            };

            match frames.read_exact(buffer) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    let _ = self.shm.delete(key.as_str());
                    if self.stop.load(Ordering::Relaxed) {
                        break CollectorExit::Stopped;
                    }
                    error!(camera = %self.camera, "decoder closed the frame pipe");
                    break CollectorExit::DecoderExited;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    // Partial frame; drop it and resync on the next read.
                    debug!(camera = %self.camera, "interrupted frame read");
                    let _ = self.shm.delete(key.as_str());
                    continue;
                }
                Err(e) => {
                    if self.stop.load(Ordering::Relaxed) {
                        let _ = self.shm.delete(key.as_str());
                        break CollectorExit::Stopped;
                    }
                    error!(camera = %self.camera, "corrupt frame read: {e}");
                    let _ = self.shm.delete(key.as_str());
                    continue;
                }
            }

            self.fps.update();
            self.metrics.set_camera_fps(self.fps.rate());
            self.metrics.set_last_frame_time(frame_time);

            match self.frame_tx.try_send(key.clone()) {
                Ok(()) => {
                    // Region stays live for the consumer; only the local
                    // handle is released.
                    self.shm.close(key.as_str());
                }
                Err(TrySendError::Full(_)) => {
                    self.skipped.update();
                    self.metrics.set_skipped_fps(self.skipped.rate());
                    let _ = self.shm.delete(key.as_str());
                }
                Err(TrySendError::Disconnected(_)) => {
                    let _ = self.shm.delete(key.as_str());
                    break CollectorExit::Stopped;
                }
            }
        };

        info!(camera = %self.camera, ?exit, "frame collector stopped");
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    const FRAME_SIZE: usize = 24;

    fn unique_camera(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!(
            "collector-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn frames(n: usize) -> Vec<u8> {
        (0..n * FRAME_SIZE).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn frames_flow_until_decoder_eof() {
        let camera = unique_camera("flow");
        let (tx, rx) = bounded(50);
        let metrics = Arc::new(CameraMetrics::new());
        let stop = Arc::new(AtomicBool::new(false));
        let collector = FrameCollector::new(&camera, FRAME_SIZE, tx, Arc::clone(&metrics), stop);

        let exit = collector.run(Cursor::new(frames(5)));
        assert_eq!(exit, CollectorExit::DecoderExited);
        assert!(metrics.camera_fps() > 0.0);
        assert!(metrics.last_frame_time() > 0.0);

        let mut shm = SharedFrameManager::new();
        let keys: Vec<FrameKey> = rx.try_iter().collect();
        assert_eq!(keys.len(), 5);
        for key in &keys {
            let view = shm.attach(key.as_str(), FRAME_SIZE).unwrap();
            assert_eq!(view.len(), FRAME_SIZE);
            shm.delete(key.as_str()).unwrap();
        }
    }

    #[test]
    fn overflow_drops_newest_and_bumps_skipped() {
        let camera = unique_camera("overflow");
        let (tx, rx) = bounded(2);
        let metrics = Arc::new(CameraMetrics::new());
        let stop = Arc::new(AtomicBool::new(false));
        let collector = FrameCollector::new(&camera, FRAME_SIZE, tx, Arc::clone(&metrics), stop);

        // Nobody consumes: only the first two frames fit.
        let exit = collector.run(Cursor::new(frames(10)));
        assert_eq!(exit, CollectorExit::DecoderExited);
        assert!(metrics.skipped_fps() > 0.0);

        let mut shm = SharedFrameManager::new();
        let keys: Vec<FrameKey> = rx.try_iter().collect();
        assert_eq!(keys.len(), 2);
        for key in &keys {
            shm.attach(key.as_str(), FRAME_SIZE).unwrap();
            shm.delete(key.as_str()).unwrap();
        }
        // Dropped frames left no regions behind: nothing else to attach.
    }

    #[test]
    fn stop_flag_wins_over_pending_input() {
        let camera = unique_camera("stop");
        let (tx, _rx) = bounded(2);
        let metrics = Arc::new(CameraMetrics::new());
        let stop = Arc::new(AtomicBool::new(true));
        let collector = FrameCollector::new(&camera, FRAME_SIZE, tx, metrics, stop);
        assert_eq!(collector.run(Cursor::new(frames(3))), CollectorExit::Stopped);
    }

    #[test]
    fn zero_byte_stream_is_decoder_exit() {
        let camera = unique_camera("eof");
        let (tx, rx) = bounded(2);
        let metrics = Arc::new(CameraMetrics::new());
        let stop = Arc::new(AtomicBool::new(false));
        let collector = FrameCollector::new(&camera, FRAME_SIZE, tx, metrics, stop);
        assert_eq!(
            collector.run(Cursor::new(Vec::new())),
            CollectorExit::DecoderExited
        );
        assert!(rx.try_iter().next().is_none());
    }
}
