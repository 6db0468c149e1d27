//! Time-indexed store of previously computed feature snapshots.
//!
//! Two independent stores (sound and face) keyed by timestamp. Lookups return
//! the nearest entry only when it lies inside the validity window; eviction is
//! relative to a caller-supplied reference time, never wall-clock time.
//!
//! The cache does no locking. It is owned by a single [`crate::pipeline::Analyzer`]
//! and only touched from the sequential processing loop.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::features::{FaceFeatures, SoundFeatures};

/// Timestamps are stored as whole microseconds so they can be ordered.
fn key(timestamp: f64) -> i64 {
    (timestamp * 1_000_000.0).round() as i64
}

fn seconds(key: i64) -> f64 {
    key as f64 / 1_000_000.0
}

/// Entries dropped by one [`FeatureCache::cleanup`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    pub audio: usize,
    pub video: usize,
}

#[derive(Debug, Clone)]
struct TimeIndex<T> {
    entries: BTreeMap<i64, T>,
}

impl<T: Clone> TimeIndex<T> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    fn nearest(&self, timestamp: f64, validity: f64) -> Option<(f64, &T)> {
        let k = key(timestamp);
        let below = self.entries.range(..=k).next_back();
        let above = self.entries.range(k..).next();

        let (found, value) = match (below, above) {
            (Some(b), Some(a)) => {
                if (k - b.0) <= (a.0 - k) {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        let at = seconds(*found);
        if (at - timestamp).abs() < validity {
            Some((at, value))
        } else {
            None
        }
    }

    fn insert(&mut self, timestamp: f64, value: T) {
        self.entries.insert(key(timestamp), value);
    }

    fn retain_from(&mut self, cutoff: f64) -> usize {
        let before = self.entries.len();
        self.entries = self.entries.split_off(&key(cutoff));
        before - self.entries.len()
    }
}

/// Sound and face snapshots indexed by the start time of the window they describe.
#[derive(Debug, Clone)]
pub struct FeatureCache {
    audio: TimeIndex<SoundFeatures>,
    video: TimeIndex<FaceFeatures>,
    validity_s: f64,
}

impl FeatureCache {
    pub fn new(validity_s: f64) -> Self {
        info!("Initialising feature cache ({:.1}s validity)", validity_s);
        Self {
            audio: TimeIndex::new(),
            video: TimeIndex::new(),
            validity_s,
        }
    }

    /// Nearest sound snapshot within the validity window, if any.
    pub fn lookup_audio(&self, timestamp: f64) -> Option<SoundFeatures> {
        let (at, features) = self.audio.nearest(timestamp, self.validity_s)?;
        debug!("Cached sound {:.2}s -> {:.2}s", at, timestamp);
        Some(features.clone())
    }

    /// Nearest face snapshot within the validity window, if any.
    pub fn lookup_video(&self, timestamp: f64) -> Option<FaceFeatures> {
        let (at, features) = self.video.nearest(timestamp, self.validity_s)?;
        debug!("Cached face {:.2}s -> {:.2}s", at, timestamp);
        Some(features.clone())
    }

    pub fn store_audio(&mut self, timestamp: f64, features: SoundFeatures) {
        debug!("Caching sound features at {:.2}s", timestamp);
        self.audio.insert(timestamp, features);
    }

    pub fn store_video(&mut self, timestamp: f64, features: FaceFeatures) {
        debug!("Caching face features at {:.2}s", timestamp);
        self.video.insert(timestamp, features);
    }

    /// Drop every entry older than `reference - max_age` from both stores.
    pub fn cleanup(&mut self, reference: f64, max_age: f64) -> Evicted {
        let cutoff = reference - max_age;
        let evicted = Evicted {
            audio: self.audio.retain_from(cutoff),
            video: self.video.retain_from(cutoff),
        };

        if evicted.audio > 0 || evicted.video > 0 {
            info!(
                "Evicted cache entries older than {:.2}s: {} sound, {} face",
                cutoff, evicted.audio, evicted.video
            );
        }

        evicted
    }

    pub fn audio_len(&self) -> usize {
        self.audio.entries.len()
    }

    pub fn video_len(&self) -> usize {
        self.video.entries.len()
    }

    pub fn audio_timestamps(&self) -> Vec<f64> {
        self.audio.entries.keys().map(|k| seconds(*k)).collect()
    }

    pub fn video_timestamps(&self) -> Vec<f64> {
        self.video.entries.keys().map(|k| seconds(*k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::neutral_face;

    fn sound(marker: f64) -> SoundFeatures {
        SoundFeatures {
            pitch: vec![marker; 3],
            rate: vec![1.0; 3],
            level: vec![0.5; 3],
        }
    }

    #[test]
    fn test_lookup_empty_is_miss() {
        let cache = FeatureCache::new(2.0);
        assert!(cache.lookup_audio(5.0).is_none());
        assert!(cache.lookup_video(5.0).is_none());
    }

    #[test]
    fn test_lookup_returns_nearest_within_window() {
        let mut cache = FeatureCache::new(2.0);
        cache.store_audio(1.0, sound(1.0));
        cache.store_audio(4.0, sound(4.0));

        assert_eq!(cache.lookup_audio(1.4).unwrap().pitch[0], 1.0);
        assert_eq!(cache.lookup_audio(3.1).unwrap().pitch[0], 4.0);
        assert_eq!(cache.lookup_audio(5.9).unwrap().pitch[0], 4.0);
    }

    #[test]
    fn test_lookup_outside_window_is_miss() {
        let mut cache = FeatureCache::new(2.0);
        cache.store_audio(1.0, sound(1.0));

        assert!(cache.lookup_audio(3.0).is_none());
        assert!(cache.lookup_audio(10.0).is_none());
    }

    #[test]
    fn test_store_overwrites_identical_key() {
        let mut cache = FeatureCache::new(2.0);
        cache.store_audio(2.5, sound(1.0));
        cache.store_audio(2.5, sound(9.0));

        assert_eq!(cache.audio_len(), 1);
        assert_eq!(cache.lookup_audio(2.5).unwrap().pitch[0], 9.0);
    }

    #[test]
    fn test_stores_are_independent() {
        let mut cache = FeatureCache::new(2.0);
        cache.store_video(1.0, neutral_face());

        assert!(cache.lookup_audio(1.0).is_none());
        assert!(cache.lookup_video(1.0).is_some());
    }

    #[test]
    fn test_cleanup_boundary() {
        let mut cache = FeatureCache::new(2.0);
        for t in [10.0, 19.999, 20.0, 25.0] {
            cache.store_audio(t, sound(t));
            cache.store_video(t, neutral_face());
        }

        let evicted = cache.cleanup(30.0, 10.0);

        assert_eq!(evicted, Evicted { audio: 2, video: 2 });
        assert_eq!(cache.audio_timestamps(), vec![20.0, 25.0]);
        assert_eq!(cache.video_timestamps(), vec![20.0, 25.0]);
    }

    #[test]
    fn test_cleanup_negative_cutoff_keeps_everything() {
        let mut cache = FeatureCache::new(2.0);
        cache.store_audio(0.0, sound(0.0));

        let evicted = cache.cleanup(5.0, 300.0);
        assert_eq!(evicted, Evicted::default());
        assert_eq!(cache.audio_len(), 1);
    }
}
