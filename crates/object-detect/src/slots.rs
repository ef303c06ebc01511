//! Shared-memory slot conventions
//!
//! Input frames travel through a region named after the camera; results
//! come back through a fixed `detection-result_<camera>` slot of
//! 20 detections x 6 floats.

use edgescope_core::types::{Detection, DETECTION_FIELDS, MAX_DETECTIONS};

/// Bytes in one result slot.
pub const RESULT_SLOT_BYTES: usize = MAX_DETECTIONS * DETECTION_FIELDS * std::mem::size_of::<f32>();

pub fn input_slot_name(camera: &str) -> String {
    camera.to_string()
}

pub fn result_slot_name(camera: &str) -> String {
    format!("detection-result_{camera}")
}

/// Serializes up to [`MAX_DETECTIONS`] detections into a result slot,
/// zero-filling the remainder.
pub fn write_result_slot(slot: &mut [u8], detections: &[Detection]) {
    debug_assert_eq!(slot.len(), RESULT_SLOT_BYTES);
    let mut offset = 0;
    for i in 0..MAX_DETECTIONS {
        let detection = detections.get(i).copied().unwrap_or_else(Detection::zeroed);
        for value in detection.to_array() {
            slot[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
            offset += 4;
        }
    }
}

/// Reads a result slot back, dropping the zero-score padding.
pub fn read_result_slot(slot: &[u8]) -> Vec<Detection> {
    debug_assert_eq!(slot.len(), RESULT_SLOT_BYTES);
    let mut detections = Vec::new();
    for record in slot.chunks_exact(DETECTION_FIELDS * 4) {
        let mut values = [0f32; DETECTION_FIELDS];
        for (value, bytes) in values.iter_mut().zip(record.chunks_exact(4)) {
            *value = f32::from_ne_bytes(bytes.try_into().expect("4-byte chunk"));
        }
        let detection = Detection::from_array(values);
        if detection.score > 0.0 {
            detections.push(detection);
        }
    }
    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trips_and_pads() {
        let detections = vec![
            Detection::from_array([1.0, 0.9, 0.1, 0.2, 0.5, 0.6]),
            Detection::from_array([7.0, 0.4, 0.0, 0.0, 1.0, 1.0]),
        ];
        let mut slot = vec![0u8; RESULT_SLOT_BYTES];
        write_result_slot(&mut slot, &detections);
        let back = read_result_slot(&slot);
        assert_eq!(back, detections);
    }

    #[test]
    fn overflow_beyond_twenty_is_truncated() {
        let detections: Vec<Detection> = (0..30)
            .map(|i| Detection::from_array([i as f32, 0.5, 0.0, 0.0, 1.0, 1.0]))
            .collect();
        let mut slot = vec![0u8; RESULT_SLOT_BYTES];
        write_result_slot(&mut slot, &detections);
        assert_eq!(read_result_slot(&slot).len(), MAX_DETECTIONS);
    }

    #[test]
    fn slot_names_follow_the_convention() {
        assert_eq!(input_slot_name("front"), "front");
        assert_eq!(result_slot_name("front"), "detection-result_front");
    }
}
