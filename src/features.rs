//! Per-modality feature bundles shared by the analyzers, the cache and the report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Facial features every face bundle carries, as `[mean, std]` pairs.
pub const FACE_FEATURES: [&str; 8] = [
    "Smile", "Mouth", "EAR", "Brow", "Yaw", "Pitch", "Roll", "FaceSize",
];

/// Prosody contour of a segment, each array `prosody_points` long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundFeatures {
    pub pitch: Vec<f64>,
    pub rate: Vec<f64>,
    pub level: Vec<f64>,
}

impl SoundFeatures {
    /// All-zero contour.
    pub fn neutral(points: usize) -> Self {
        Self {
            pitch: vec![0.0; points],
            rate: vec![0.0; points],
            level: vec![0.0; points],
        }
    }

    pub fn len(&self) -> usize {
        self.pitch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitch.is_empty()
    }

    /// Resize every array to `points`, padding with the last value (or zero).
    pub fn conform(mut self, points: usize) -> Self {
        for series in [&mut self.pitch, &mut self.rate, &mut self.level] {
            let pad = series.last().copied().unwrap_or(0.0);
            series.resize(points, pad);
        }
        self
    }
}

/// Facial features keyed by name, each a `[mean, std]` pair.
pub type FaceFeatures = BTreeMap<String, [f64; 2]>;

/// Zeroed `[mean, std]` for the whole vocabulary.
pub fn neutral_face() -> FaceFeatures {
    FACE_FEATURES
        .iter()
        .map(|name| (name.to_string(), [0.0, 0.0]))
        .collect()
}

/// Restrict `features` to the vocabulary, zero-filling missing names.
pub fn conform_face(features: FaceFeatures) -> FaceFeatures {
    let mut out = neutral_face();
    for (name, pair) in features {
        if let Some(slot) = out.get_mut(&name) {
            *slot = pair;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_sound() {
        let sound = SoundFeatures::neutral(15);
        assert_eq!(sound.len(), 15);
        assert!(sound.pitch.iter().all(|v| *v == 0.0));
        assert!(sound.level.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_neutral_face_covers_vocabulary() {
        let face = neutral_face();
        assert_eq!(face.len(), FACE_FEATURES.len());
        assert_eq!(face["FaceSize"], [0.0, 0.0]);
    }

    #[test]
    fn test_conform_face_drops_unknown_and_fills_missing() {
        let mut raw = FaceFeatures::new();
        raw.insert("Smile".to_string(), [0.4, 0.1]);
        raw.insert("Blink".to_string(), [1.0, 1.0]);

        let face = conform_face(raw);
        assert_eq!(face.len(), 8);
        assert_eq!(face["Smile"], [0.4, 0.1]);
        assert_eq!(face["Yaw"], [0.0, 0.0]);
        assert!(!face.contains_key("Blink"));
    }

    #[test]
    fn test_conform_sound_pads_and_truncates() {
        let sound = SoundFeatures {
            pitch: vec![1.0, 2.0],
            rate: vec![],
            level: vec![1.0, 2.0, 3.0, 4.0],
        }
        .conform(3);

        assert_eq!(sound.pitch, vec![1.0, 2.0, 2.0]);
        assert_eq!(sound.rate, vec![0.0, 0.0, 0.0]);
        assert_eq!(sound.level, vec![1.0, 2.0, 3.0]);
    }
}
