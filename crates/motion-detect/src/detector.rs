//! Running-average motion detector

use image::imageops::FilterType;
use ndarray::Array2;
use std::collections::VecDeque;
use tracing::{debug, trace};

use edgescope_core::config::MotionConfig;
use edgescope_core::types::MotionBox;

use crate::ops;

/// Motion fraction under which a quiet frame completes calibration.
const CALIBRATION_MOTION_PCT: f64 = 0.05;
/// Box count over which a frame cannot complete calibration.
const CALIBRATION_MAX_BOXES: usize = 4;
/// Consecutive motion frames before the counter wraps.
const MOTION_FRAME_WRAP: u32 = 10;

/// Per-camera motion detector.
///
/// Differences each downscaled luminance frame against a running average.
/// While calibrating the average adapts aggressively (`delta_alpha`) so
/// startup and scene jumps settle instead of flooding the pipeline with
/// false motion.
pub struct MotionDetector {
    camera: String,
    config: MotionConfig,
    frame_shape: (usize, usize),
    motion_shape: (usize, usize),
    resize_factor: f64,
    avg_frame: Array2<f32>,
    motion_frame_count: u32,
    calibrating: bool,
    blur_sigma: f32,
    interpolation: FilterType,
    contrast_values: VecDeque<(f32, f32)>,
    contrast_history: usize,
    detect_fps: u32,
}

impl MotionDetector {
    /// `frame_shape` is the native luminance plane `(height, width)`.
    pub fn new(camera: &str, frame_shape: (usize, usize), config: MotionConfig, detect_fps: u32) -> Self {
        let (height, width) = frame_shape;
        let frame_height = config.frame_height as usize;
        let resize_factor = height as f64 / frame_height as f64;
        // Width follows the native aspect ratio, rounded; integer-truncating
        // the ratio would collapse to a square for anything wider than 2:1.
        let motion_width = ((frame_height as f64) * (width as f64 / height as f64)).round() as usize;
        let motion_shape = (frame_height, motion_width.max(1));

        debug!(
            camera,
            ?frame_shape,
            ?motion_shape,
            resize_factor,
            "motion detector initialized"
        );

        Self {
            camera: camera.to_string(),
            config,
            frame_shape,
            motion_shape,
            resize_factor,
            avg_frame: Array2::zeros(motion_shape),
            motion_frame_count: 0,
            calibrating: true,
            blur_sigma: 1.0,
            interpolation: FilterType::Nearest,
            contrast_values: VecDeque::new(),
            contrast_history: 50,
            detect_fps,
        }
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    pub fn detect_fps(&self) -> u32 {
        self.detect_fps
    }

    /// Detects motion in one frame. `frame` is the raw yuv420 buffer (or at
    /// least its luminance plane); boxes come back in native coordinates.
    pub fn detect(&mut self, frame: &[u8]) -> Vec<MotionBox> {
        if !self.config.enabled {
            return Vec::new();
        }

        let (height, width) = self.frame_shape;
        let luma = &frame[..height * width];
        let (motion_h, motion_w) = self.motion_shape;

        let mut resized = ops::downscale_blur(
            luma,
            height,
            width,
            motion_h,
            motion_w,
            self.blur_sigma,
            self.interpolation,
        );

        if self.config.improve_contrast {
            self.stretch_contrast(&mut resized);
        }

        let delta = ops::abs_diff(&resized, &self.avg_frame);
        let mask = ops::threshold_mask(&delta, self.config.threshold);
        let dilated = ops::dilate3x3(&mask);
        let regions = ops::connected_regions(&dilated);

        let mut motion_boxes = Vec::new();
        let mut total_area = 0usize;
        for region in &regions {
            total_area += region.area;
            if region.area > self.config.contour_area as usize {
                motion_boxes.push(self.to_native_box(region));
            }
        }

        let pct_motion = total_area as f64 / (motion_h * motion_w) as f64;

        // A quiet frame completes calibration; a global illumination change
        // (lightning, IR flip, PTZ move) restarts it.
        if pct_motion < CALIBRATION_MOTION_PCT && motion_boxes.len() <= CALIBRATION_MAX_BOXES {
            self.calibrating = false;
        }
        if self.calibrating || pct_motion > self.config.lightning_threshold {
            self.calibrating = true;
        }

        trace!(
            camera = %self.camera,
            pct_motion,
            boxes = motion_boxes.len(),
            calibrating = self.calibrating,
            "motion pass"
        );

        let alpha = if self.calibrating {
            self.config.delta_alpha
        } else {
            self.config.frame_alpha
        };
        ops::accumulate_weighted(&mut self.avg_frame, &resized, alpha as f32);

        if motion_boxes.is_empty() {
            self.motion_frame_count = 0;
        } else {
            self.motion_frame_count += 1;
            if self.motion_frame_count >= MOTION_FRAME_WRAP {
                self.motion_frame_count = 0;
            }
        }

        motion_boxes
    }

    pub fn stop(&mut self) {}

    fn to_native_box(&self, region: &ops::Region) -> MotionBox {
        let (height, width) = self.frame_shape;
        let scale = |v: usize| (v as f64 * self.resize_factor).round() as u32;
        MotionBox {
            x1: scale(region.x1).min(width as u32),
            y1: scale(region.y1).min(height as u32),
            x2: scale(region.x2 + 1).min(width as u32),
            y2: scale(region.y2 + 1).min(height as u32),
        }
    }

    /// Linear contrast stretch against the rolling min/max history, so dim
    /// night scenes still produce usable deltas.
    fn stretch_contrast(&mut self, frame: &mut Array2<f32>) {
        let mut lo = f32::MAX;
        let mut hi = f32::MIN;
        for &v in frame.iter() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        self.contrast_values.push_back((lo, hi));
        if self.contrast_values.len() > self.contrast_history {
            self.contrast_values.pop_front();
        }

        let n = self.contrast_values.len() as f32;
        let avg_lo = self.contrast_values.iter().map(|(l, _)| l).sum::<f32>() / n;
        let avg_hi = self.contrast_values.iter().map(|(_, h)| h).sum::<f32>() / n;
        let range = avg_hi - avg_lo;
        if range < 1.0 {
            return;
        }
        for v in frame.iter_mut() {
            *v = ((*v - avg_lo) / range * 255.0).clamp(0.0, 255.0);
        }
    }
}
