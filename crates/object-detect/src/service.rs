//! The shared detection worker

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use edgescope_core::config::ModelConfig;
use edgescope_core::fps::FpsMeter;
use frame_shm::SharedFrameManager;

use crate::detector::ObjectDetector;
use crate::ready::ReadyEvent;
use crate::slots::{input_slot_name, result_slot_name, write_result_slot, RESULT_SLOT_BYTES};
use crate::tensor::tensor_from_yuv;

const TOKEN_POLL: Duration = Duration::from_secs(1);

/// Frame dimensions of one served camera: native `(height, width)` of its
/// detect stream.
pub type CameraShapes = HashMap<String, (usize, usize)>;

/// Single worker serving every camera. Tokens name the camera whose input
/// slot holds a fresh frame; results land in the camera's result slot and
/// its ready event is set.
pub struct ObjectDetectionWorker {
    name: String,
    model: ModelConfig,
    shapes: CameraShapes,
    token_rx: Receiver<String>,
    ready: HashMap<String, ReadyEvent>,
    detector: Box<dyn ObjectDetector>,
    stop: Arc<AtomicBool>,
    shm: SharedFrameManager,
    fps: FpsMeter,
}

impl ObjectDetectionWorker {
    pub fn new(
        name: &str,
        model: ModelConfig,
        shapes: CameraShapes,
        token_rx: Receiver<String>,
        ready: HashMap<String, ReadyEvent>,
        detector: Box<dyn ObjectDetector>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.to_string(),
            model,
            shapes,
            token_rx,
            ready,
            detector,
            stop,
            shm: SharedFrameManager::new(),
            fps: FpsMeter::new(),
        }
    }

    pub fn run(mut self) {
        info!(worker = %self.name, cameras = self.shapes.len(), "object detection worker started");
        self.fps.start();

        while !self.stop.load(Ordering::Relaxed) {
            let camera = match self.token_rx.recv_timeout(TOKEN_POLL) {
                Ok(camera) => camera,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            self.serve(&camera);
        }

        self.detector.stop();
        // The slots belong to the process workers; only local handles drop.
        info!(worker = %self.name, "object detection worker stopped");
    }

    fn serve(&mut self, camera: &str) {
        let Some(&(height, width)) = self.shapes.get(camera) else {
            warn!(worker = %self.name, camera, "token for an unknown camera");
            return;
        };
        let yuv_len = height * width * 3 / 2;

        let input = input_slot_name(camera);
        let tensor = match self.shm.attach(&input, yuv_len) {
            Ok(frame) => tensor_from_yuv(&frame[..yuv_len], height, width, &self.model),
            Err(e) => {
                warn!(worker = %self.name, camera, "input slot unavailable: {e}");
                return;
            }
        };

        let detections = match self.detector.detect(&tensor) {
            Ok(detections) => detections,
            Err(e) => {
                // One bad frame must not wedge the queue.
                error!(worker = %self.name, camera, "model failure: {e}");
                return;
            }
        };

        let result = result_slot_name(camera);
        match self.shm.attach_mut(&result, RESULT_SLOT_BYTES) {
            Ok(slot) => write_result_slot(slot, &detections),
            Err(e) => {
                warn!(worker = %self.name, camera, "result slot unavailable: {e}");
                return;
            }
        }

        if let Some(ready) = self.ready.get(camera) {
            ready.set();
        }

        self.fps.update();
        debug!(worker = %self.name, camera, fps = self.fps.rate(), detections = detections.len(), "inference served");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::NoopDetector;
    use crate::slots::read_result_slot;
    use crate::tensor::Tensor;
    use crossbeam_channel::bounded;
    use edgescope_core::types::Detection;
    use std::sync::atomic::AtomicUsize;

    struct StaticDetector {
        detections: Vec<Detection>,
        seen_shapes: Arc<std::sync::Mutex<Vec<[usize; 4]>>>,
    }

    impl ObjectDetector for StaticDetector {
        fn detect(&mut self, tensor: &Tensor) -> Result<Vec<Detection>, String> {
            self.seen_shapes.lock().unwrap().push(tensor.shape);
            Ok(self.detections.clone())
        }
    }

    fn unique_camera(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!(
            "objdet-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn round_trip_through_the_slots() {
        let camera = unique_camera("trip");
        let (height, width) = (16usize, 16usize);

        // The client side creates both slots, fills the input, then queues
        // a token; this is exactly what a process worker does.
        let mut client = SharedFrameManager::new();
        let input = client
            .create(&input_slot_name(&camera), height * width * 3)
            .unwrap();
        input[..height * width * 3 / 2].fill(128);
        let _ = client
            .create(&result_slot_name(&camera), RESULT_SLOT_BYTES)
            .unwrap();

        let expected = vec![Detection::from_array([3.0, 0.8, 0.1, 0.1, 0.9, 0.9])];
        let seen_shapes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let detector = StaticDetector {
            detections: expected.clone(),
            seen_shapes: Arc::clone(&seen_shapes),
        };

        let (token_tx, token_rx) = bounded(4);
        let ready = ReadyEvent::new();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = ObjectDetectionWorker::new(
            "detector",
            ModelConfig::default(),
            HashMap::from([(camera.clone(), (height, width))]),
            token_rx,
            HashMap::from([(camera.clone(), ready.clone())]),
            Box::new(detector),
            Arc::clone(&stop),
        );
        let handle = std::thread::spawn(move || worker.run());

        token_tx.send(camera.clone()).unwrap();
        assert!(ready.wait_timeout(Duration::from_secs(5)));

        let slot = client
            .attach(&result_slot_name(&camera), RESULT_SLOT_BYTES)
            .unwrap();
        assert_eq!(read_result_slot(slot), expected);

        // Model input got the batch axis and the model size.
        let shapes = seen_shapes.lock().unwrap();
        assert_eq!(shapes.as_slice(), &[[1, 320, 320, 3]]);
        drop(shapes);

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        client.delete(&input_slot_name(&camera)).unwrap();
        client.delete(&result_slot_name(&camera)).unwrap();
    }

    #[test]
    fn unknown_camera_token_is_skipped() {
        let (token_tx, token_rx) = bounded(4);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = ObjectDetectionWorker::new(
            "detector",
            ModelConfig::default(),
            HashMap::new(),
            token_rx,
            HashMap::new(),
            Box::new(NoopDetector::new()),
            Arc::clone(&stop),
        );
        let handle = std::thread::spawn(move || worker.run());
        token_tx.send("nobody".to_string()).unwrap();
        drop(token_tx);
        // Disconnected queue ends the loop.
        handle.join().unwrap();
    }
}
