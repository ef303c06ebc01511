//! Object detection worker
//!
//! A single worker serves every camera: frames arrive through per-camera
//! shared-memory input slots, camera tokens through one bounded queue, and
//! results leave through fixed 20x6 float slots guarded by per-camera
//! ready events.

mod detector;
mod ready;
mod service;
mod slots;
mod tensor;

pub use detector::{NoopDetector, ObjectDetector};
pub use ready::ReadyEvent;
pub use service::{CameraShapes, ObjectDetectionWorker};
pub use slots::{input_slot_name, result_slot_name, read_result_slot, write_result_slot, RESULT_SLOT_BYTES};
pub use tensor::{tensor_from_yuv, Tensor};
