//! Per-camera shared runtime scalars
//!
//! One writer (the capture side), any number of readers (watchdog, logging).
//! Floats are published as raw bits so readers never see a torn value.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Shared scalars for one camera.
#[derive(Debug, Default)]
pub struct CameraMetrics {
    camera_fps: AtomicU64,
    skipped_fps: AtomicU64,
    last_frame_time: AtomicU64,
    decoder_pid: AtomicI32,
}

impl CameraMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera_fps(&self) -> f64 {
        f64::from_bits(self.camera_fps.load(Ordering::Relaxed))
    }

    pub fn set_camera_fps(&self, fps: f64) {
        self.camera_fps.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn skipped_fps(&self) -> f64 {
        f64::from_bits(self.skipped_fps.load(Ordering::Relaxed))
    }

    pub fn set_skipped_fps(&self, fps: f64) {
        self.skipped_fps.store(fps.to_bits(), Ordering::Relaxed);
    }

    /// Wall-clock time of the most recent decoded frame, 0.0 before the
    /// first frame arrives.
    pub fn last_frame_time(&self) -> f64 {
        f64::from_bits(self.last_frame_time.load(Ordering::Relaxed))
    }

    pub fn set_last_frame_time(&self, t: f64) {
        self.last_frame_time.store(t.to_bits(), Ordering::Relaxed);
    }

    pub fn decoder_pid(&self) -> i32 {
        self.decoder_pid.load(Ordering::Relaxed)
    }

    pub fn set_decoder_pid(&self, pid: i32) {
        self.decoder_pid.store(pid, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_survive_the_bit_cast() {
        let metrics = CameraMetrics::new();
        assert_eq!(metrics.camera_fps(), 0.0);
        metrics.set_camera_fps(29.97);
        metrics.set_skipped_fps(0.5);
        metrics.set_last_frame_time(1_700_000_000.25);
        metrics.set_decoder_pid(4242);
        assert_eq!(metrics.camera_fps(), 29.97);
        assert_eq!(metrics.skipped_fps(), 0.5);
        assert_eq!(metrics.last_frame_time(), 1_700_000_000.25);
        assert_eq!(metrics.decoder_pid(), 4242);
    }
}
