//! Core pipeline data types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum detections written into one result slot.
pub const MAX_DETECTIONS: usize = 20;
/// Fields per detection record: class, score, y1, x1, y2, x2.
pub const DETECTION_FIELDS: usize = 6;

/// Name of the shared region holding one decoded frame.
///
/// The string form is `<camera>@<timestamp>`; it is the only identifier that
/// crosses stage boundaries together with the frame bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameKey(String);

impl FrameKey {
    pub fn new(camera: &str, frame_time: f64) -> Self {
        Self(format!("{camera}@{frame_time:.6}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn camera(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(c, _)| c)
    }

    pub fn frame_time(&self) -> f64 {
        self.0
            .split_once('@')
            .and_then(|(_, t)| t.parse().ok())
            .unwrap_or(0.0)
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One object detection in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: f32,
    pub score: f32,
    pub y1: f32,
    pub x1: f32,
    pub y2: f32,
    pub x2: f32,
}

impl Detection {
    pub fn zeroed() -> Self {
        Self::from_array([0.0; DETECTION_FIELDS])
    }

    pub fn from_array(v: [f32; DETECTION_FIELDS]) -> Self {
        Self {
            class_id: v[0],
            score: v[1],
            y1: v[2],
            x1: v[3],
            y2: v[4],
            x2: v[5],
        }
    }

    pub fn to_array(self) -> [f32; DETECTION_FIELDS] {
        [self.class_id, self.score, self.y1, self.x1, self.y2, self.x2]
    }
}

/// Axis-aligned motion bounding box in native frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// Record emitted by a process worker for one analyzed frame.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub camera: String,
    pub frame_time: f64,
    pub motion_boxes: Vec<MotionBox>,
    pub detections: Vec<Detection>,
}
