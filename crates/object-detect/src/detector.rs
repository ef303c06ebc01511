//! Model capability contract

use tracing::debug;

use edgescope_core::types::Detection;

use crate::tensor::Tensor;

/// The one seam between the pipeline and a model backend. Implementations
/// are chosen by the configured model kind; errors are isolated to the
/// frame being inferred.
pub trait ObjectDetector: Send {
    fn detect(&mut self, tensor: &Tensor) -> Result<Vec<Detection>, String>;

    fn stop(&mut self) {}
}

/// Backend used when no model is configured: every frame infers to nothing.
pub struct NoopDetector {
    warned: bool,
}

impl NoopDetector {
    pub fn new() -> Self {
        Self { warned: false }
    }
}

impl Default for NoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDetector for NoopDetector {
    fn detect(&mut self, _tensor: &Tensor) -> Result<Vec<Detection>, String> {
        if !self.warned {
            debug!("no model backend configured, detections are empty");
            self.warned = true;
        }
        Ok(Vec::new())
    }
}
