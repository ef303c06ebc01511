//! Per-camera process worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use edgescope_core::config::CameraConfig;
use edgescope_core::fps::{self, FpsMeter};
use edgescope_core::types::{Detection, Event, FrameKey};
use frame_shm::SharedFrameManager;
use motion_detect::MotionDetector;
use object_detect::{
    input_slot_name, read_result_slot, result_slot_name, ReadyEvent, RESULT_SLOT_BYTES,
};

const FRAME_POLL: Duration = Duration::from_secs(1);
/// Bounded wait for the detector's ready event.
const DETECT_WAIT: Duration = Duration::from_secs(4);
/// Minimum spacing of drop warnings.
const DROP_LOG_WINDOW: f64 = 10.0;

/// Client half of the object-detection handshake: owns the camera's input
/// and result slots, submits tokens, and awaits the ready event.
pub struct ObjectDetectClient {
    camera: String,
    token_tx: Sender<String>,
    ready: ReadyEvent,
    input_len: usize,
}

impl ObjectDetectClient {
    pub fn new(camera: &str, token_tx: Sender<String>, ready: ReadyEvent) -> Self {
        Self {
            camera: camera.to_string(),
            token_tx,
            ready,
            input_len: 0,
        }
    }

    /// Creates the camera's shared slots. Called once before any frame is
    /// submitted; the slots outlive individual frames.
    fn create_slots(&mut self, shm: &mut SharedFrameManager, config: &CameraConfig) {
        let (height, width) = (config.detect.height as usize, config.detect.width as usize);
        self.input_len = height * width * 3;
        if let Err(e) = shm.create(&input_slot_name(&self.camera), self.input_len) {
            warn!(camera = %self.camera, "input slot: {e}");
        }
        if let Err(e) = shm.create(&result_slot_name(&self.camera), RESULT_SLOT_BYTES) {
            warn!(camera = %self.camera, "result slot: {e}");
        }
    }

    fn delete_slots(&mut self, shm: &mut SharedFrameManager) {
        let _ = shm.delete(&input_slot_name(&self.camera));
        let _ = shm.delete(&result_slot_name(&self.camera));
    }

    /// Copies the frame into the input slot, queues a token and waits for
    /// the result. An overloaded or dead detector yields no detections.
    fn submit_and_wait(&mut self, shm: &mut SharedFrameManager, frame: &[u8]) -> Vec<Detection> {
        self.ready.clear();

        match shm.attach_mut(&input_slot_name(&self.camera), self.input_len) {
            Ok(slot) => slot[..frame.len()].copy_from_slice(frame),
            Err(e) => {
                warn!(camera = %self.camera, "input slot lost: {e}");
                return Vec::new();
            }
        }

        match self.token_tx.try_send(self.camera.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Detector backpressure; skip inference for this frame.
                debug!(camera = %self.camera, "detection queue full");
                return Vec::new();
            }
            Err(TrySendError::Disconnected(_)) => return Vec::new(),
        }

        if !self.ready.wait_timeout(DETECT_WAIT) {
            warn!(camera = %self.camera, "timed out waiting for detection result");
            return Vec::new();
        }

        match shm.attach(&result_slot_name(&self.camera), RESULT_SLOT_BYTES) {
            Ok(slot) => read_result_slot(slot),
            Err(e) => {
                warn!(camera = %self.camera, "result slot lost: {e}");
                Vec::new()
            }
        }
    }
}

pub struct ProcessWorker {
    camera: String,
    config: CameraConfig,
    frame_rx: Receiver<FrameKey>,
    event_tx: Sender<Event>,
    motion: MotionDetector,
    object: Option<ObjectDetectClient>,
    stop: Arc<AtomicBool>,
    shm: SharedFrameManager,
    fps: FpsMeter,
    frames: u64,
    frames_since_submit: u32,
    last_drop_log: f64,
}

impl ProcessWorker {
    pub fn new(
        camera: &str,
        config: CameraConfig,
        frame_rx: Receiver<FrameKey>,
        event_tx: Sender<Event>,
        object: Option<ObjectDetectClient>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let (height, width) = config.frame_shape();
        let motion = MotionDetector::new(
            camera,
            (height as usize, width as usize),
            config.motion.clone(),
            config.detect.fps,
        );
        Self {
            camera: camera.to_string(),
            config,
            frame_rx,
            event_tx,
            motion,
            object,
            stop,
            shm: SharedFrameManager::new(),
            fps: FpsMeter::new(),
            frames: 0,
            frames_since_submit: 0,
            last_drop_log: 0.0,
        }
    }

    pub fn run(mut self) {
        info!(camera = %self.camera, "process worker started");
        if let Some(object) = self.object.as_mut() {
            object.create_slots(&mut self.shm, &self.config);
        }
        self.fps.start();

        let frame_size = self.config.frame_size();
        while !self.stop.load(Ordering::Relaxed) {
            let key = match self.frame_rx.recv_timeout(FRAME_POLL) {
                Ok(key) => key,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            self.handle_frame(&key, frame_size);
        }

        if let Some(mut object) = self.object.take() {
            object.delete_slots(&mut self.shm);
        }
        self.shm.clean();
        info!(camera = %self.camera, "process worker stopped");
    }

    fn handle_frame(&mut self, key: &FrameKey, frame_size: usize) {
        let frame = match self.shm.attach(key.as_str(), frame_size) {
            Ok(frame) => frame,
            Err(e) => {
                error!(camera = %self.camera, %key, "failed to load frame: {e}");
                return;
            }
        };

        // attach borrows the pool, so motion works on an owned copy of the
        // frame; the copy also survives the delete below for the detector.
        let frame = frame.to_vec();
        let motion_boxes = self.motion.detect(&frame);

        let detections = if self.should_detect_objects(!motion_boxes.is_empty()) {
            self.frames_since_submit = 0;
            match self.object.as_mut() {
                Some(object) => object.submit_and_wait(&mut self.shm, &frame),
                None => Vec::new(),
            }
        } else {
            self.frames_since_submit += 1;
            Vec::new()
        };

        let event = Event {
            camera: self.camera.clone(),
            frame_time: key.frame_time(),
            motion_boxes,
            detections,
        };

        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let now = fps::now();
                if now - self.last_drop_log > DROP_LOG_WINDOW {
                    warn!(camera = %self.camera, "event queue full, dropping events");
                    self.last_drop_log = now;
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }

        // Final consumer of the frame region.
        if let Err(e) = self.shm.delete(key.as_str()) {
            debug!(camera = %self.camera, %key, "frame already gone: {e}");
        }

        self.fps.update();
        self.frames += 1;
        if self.frames % 100 == 0 {
            debug!(camera = %self.camera, fps = self.fps.rate(), frames = self.frames, "process worker rate");
        }
    }

    /// Objects are looked for when motion was seen, or periodically for
    /// stationary objects when the configured interval elapses.
    fn should_detect_objects(&self, motion: bool) -> bool {
        if self.object.is_none() {
            return false;
        }
        if motion {
            return true;
        }
        let interval = self.config.detect.stationary.interval;
        interval > 0 && self.frames_since_submit >= interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use edgescope_core::config::CameraConfig;
    use std::sync::atomic::AtomicUsize;

    fn unique_camera(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!(
            "process-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn test_config() -> CameraConfig {
        let mut config = CameraConfig::default();
        config.detect.width = 32;
        config.detect.height = 32;
        config.motion.frame_height = 16;
        config.motion.improve_contrast = false;
        config
    }

    fn publish_frame(camera: &str, t: f64, frame_size: usize, value: u8) -> FrameKey {
        let key = FrameKey::new(camera, t);
        let mut shm = SharedFrameManager::new();
        let view = shm.create(key.as_str(), frame_size).unwrap();
        view.fill(value);
        shm.close(key.as_str());
        key
    }

    #[test]
    fn frames_become_events_and_regions_are_deleted() {
        let camera = unique_camera("events");
        let config = test_config();
        let frame_size = config.frame_size();
        let (frame_tx, frame_rx) = bounded(10);
        let (event_tx, event_rx) = bounded(10);
        let stop = Arc::new(AtomicBool::new(false));

        for i in 0..3 {
            frame_tx
                .send(publish_frame(&camera, 1000.0 + i as f64, frame_size, 0))
                .unwrap();
        }

        let worker = ProcessWorker::new(
            &camera,
            config,
            frame_rx,
            event_tx,
            None,
            Arc::clone(&stop),
        );
        let handle = std::thread::spawn(move || worker.run());

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(event_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.camera == camera));
        assert!(events.iter().all(|e| e.detections.is_empty()));
        assert!((events[0].frame_time - 1000.0).abs() < 1e-6);

        // Every region was deleted by its final consumer.
        let mut probe = SharedFrameManager::new();
        for i in 0..3 {
            let key = FrameKey::new(&camera, 1000.0 + i as f64);
            assert!(probe.attach(key.as_str(), frame_size).is_err());
        }
    }

    #[test]
    fn event_overflow_drops_without_crashing() {
        let camera = unique_camera("overflow");
        let config = test_config();
        let frame_size = config.frame_size();
        let (frame_tx, frame_rx) = bounded(10);
        // Nothing consumes the events and the queue holds two.
        let (event_tx, _event_rx) = bounded(2);
        let stop = Arc::new(AtomicBool::new(false));

        for i in 0..5 {
            frame_tx
                .send(publish_frame(&camera, 2000.0 + i as f64, frame_size, 0))
                .unwrap();
        }
        drop(frame_tx);

        let worker = ProcessWorker::new(
            &camera,
            config,
            frame_rx,
            event_tx,
            None,
            Arc::clone(&stop),
        );
        // Disconnected frame queue ends the loop once drained.
        worker.run();

        let mut probe = SharedFrameManager::new();
        for i in 0..5 {
            let key = FrameKey::new(&camera, 2000.0 + i as f64);
            assert!(probe.attach(key.as_str(), frame_size).is_err());
        }
    }

    #[test]
    fn stationary_interval_gates_submission() {
        let camera = unique_camera("gate");
        let mut config = test_config();
        config.detect.stationary.interval = 3;
        let (token_tx, token_rx) = bounded(16);
        let (_frame_tx, frame_rx) = bounded::<FrameKey>(1);
        let (event_tx, _event_rx) = bounded(16);

        let client = ObjectDetectClient::new(&camera, token_tx, ReadyEvent::new());
        let mut worker = ProcessWorker::new(
            &camera,
            config,
            frame_rx,
            event_tx,
            Some(client),
            Arc::new(AtomicBool::new(false)),
        );

        // No motion: only every third frame submits.
        assert!(!worker.should_detect_objects(false));
        worker.frames_since_submit = 3;
        assert!(worker.should_detect_objects(false));
        // Motion always submits.
        worker.frames_since_submit = 0;
        assert!(worker.should_detect_objects(true));
        drop(token_rx);
    }
}
