//! Discrete change events inside a sub-segment window.

pub mod trigger;

pub use trigger::{TriggerDecision, TriggerPolicy};

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::audio::{load_pcm, rms};
use crate::error::{MmsegError, Result};
use crate::precompute::VideoFeatures;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AudioChange,
    VisualChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AudioChange => "audio_change",
            EventKind::VisualChange => "visual_change",
        }
    }
}

/// Audio events are placed in seconds, video events on a frame index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventTime {
    Seconds(f64),
    Frame(u64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub at: EventTime,
    /// In `[0, 1]`.
    pub confidence: f32,
}

/// Coarse RMS envelope of the whole audio source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioEnvelope {
    pub hop_s: f64,
    pub energy: Vec<f32>,
}

impl AudioEnvelope {
    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }
}

/// Event-detection capability.
#[async_trait]
pub trait EventDetector: Send + Sync {
    /// Coarse audio summary computed once per source.
    async fn precompute_audio(&self, audio: &Path) -> Result<AudioEnvelope>;

    fn detect_audio_events(
        &self,
        envelope: &AudioEnvelope,
        start_s: f64,
        end_s: f64,
    ) -> Result<Vec<Event>>;

    fn detect_video_events(
        &self,
        video: &VideoFeatures,
        start_frame: u64,
        end_frame: u64,
    ) -> Result<Vec<Event>>;

    fn name(&self) -> &'static str;
}

/// Scale at which a change in a face feature's mean counts as one unit.
fn face_scale(name: &str) -> f64 {
    match name {
        "Yaw" | "Pitch" | "Roll" => 10.0,
        _ => 0.25,
    }
}

/// Flags jumps in the audio envelope and in consecutive face samples.
#[derive(Debug, Clone)]
pub struct EnergyEventDetector {
    hop_s: f64,
    /// Relative energy change that counts as an audio event.
    energy_change: f32,
    /// Windows quieter than this never produce audio events.
    energy_floor: f32,
    /// Scaled face-feature change that counts as a visual event.
    face_change: f64,
}

impl Default for EnergyEventDetector {
    fn default() -> Self {
        Self {
            hop_s: 0.5,
            energy_change: 0.5,
            energy_floor: 0.01,
            face_change: 1.0,
        }
    }
}

impl EnergyEventDetector {
    fn envelope_blocking(audio: &Path, hop_s: f64) -> Result<AudioEnvelope> {
        let pcm = load_pcm(audio).map_err(|e| MmsegError::EventDetection(e.to_string()))?;
        let hop = ((hop_s * pcm.sample_rate as f64) as usize).max(1);

        Ok(AudioEnvelope {
            hop_s,
            energy: pcm.samples.chunks(hop).map(rms).collect(),
        })
    }
}

#[async_trait]
impl EventDetector for EnergyEventDetector {
    async fn precompute_audio(&self, audio: &Path) -> Result<AudioEnvelope> {
        let audio = audio.to_path_buf();
        let hop_s = self.hop_s;
        tokio::task::spawn_blocking(move || Self::envelope_blocking(&audio, hop_s))
            .await
            .map_err(|e| MmsegError::EventDetection(format!("Envelope task failed: {e}")))?
    }

    fn detect_audio_events(
        &self,
        envelope: &AudioEnvelope,
        start_s: f64,
        end_s: f64,
    ) -> Result<Vec<Event>> {
        if envelope.is_empty() || envelope.hop_s <= 0.0 {
            return Ok(Vec::new());
        }

        let first = ((start_s / envelope.hop_s).ceil() as usize).max(1);
        let last = ((end_s / envelope.hop_s).floor() as usize).min(envelope.energy.len() - 1);

        let mut events = Vec::new();
        for i in first..=last {
            let prev = envelope.energy[i - 1];
            let cur = envelope.energy[i];
            let peak = prev.max(cur);
            if peak < self.energy_floor {
                continue;
            }

            let change = (cur - prev).abs() / peak;
            if change >= self.energy_change {
                events.push(Event {
                    kind: EventKind::AudioChange,
                    at: EventTime::Seconds(i as f64 * envelope.hop_s),
                    confidence: change.min(1.0),
                });
            }
        }

        Ok(events)
    }

    fn detect_video_events(
        &self,
        video: &VideoFeatures,
        start_frame: u64,
        end_frame: u64,
    ) -> Result<Vec<Event>> {
        let samples: Vec<_> = video.face_samples.range(start_frame..=end_frame).collect();

        let mut events = Vec::new();
        for pair in samples.windows(2) {
            let (_, before) = pair[0];
            let (frame, after) = pair[1];

            let delta = after
                .iter()
                .filter_map(|(name, pair)| {
                    before
                        .get(name)
                        .map(|prev| (pair[0] - prev[0]).abs() / face_scale(name))
                })
                .fold(0.0f64, f64::max);

            if delta >= self.face_change {
                events.push(Event {
                    kind: EventKind::VisualChange,
                    at: EventTime::Frame(*frame),
                    confidence: (delta / 2.0).min(1.0) as f32,
                });
            }
        }

        Ok(events)
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Deterministic detector that reports a fixed set of event positions.
#[derive(Debug, Clone, Default)]
pub struct StubEventDetector {
    audio_at: Vec<f64>,
    video_at: Vec<u64>,
}

impl StubEventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an audio event wherever a window contains one of these seconds.
    pub fn with_audio_events(mut self, at: Vec<f64>) -> Self {
        self.audio_at = at;
        self
    }

    /// Report a visual event wherever a window contains one of these frames.
    pub fn with_video_events(mut self, at: Vec<u64>) -> Self {
        self.video_at = at;
        self
    }
}

#[async_trait]
impl EventDetector for StubEventDetector {
    async fn precompute_audio(&self, _audio: &Path) -> Result<AudioEnvelope> {
        Ok(AudioEnvelope::default())
    }

    fn detect_audio_events(
        &self,
        _envelope: &AudioEnvelope,
        start_s: f64,
        end_s: f64,
    ) -> Result<Vec<Event>> {
        Ok(self
            .audio_at
            .iter()
            .filter(|t| (start_s..=end_s).contains(*t))
            .map(|t| Event {
                kind: EventKind::AudioChange,
                at: EventTime::Seconds(*t),
                confidence: 0.8,
            })
            .collect())
    }

    fn detect_video_events(
        &self,
        _video: &VideoFeatures,
        start_frame: u64,
        end_frame: u64,
    ) -> Result<Vec<Event>> {
        debug!("Stub video events for frames {}-{}", start_frame, end_frame);
        Ok(self
            .video_at
            .iter()
            .filter(|f| (start_frame..=end_frame).contains(*f))
            .map(|f| Event {
                kind: EventKind::VisualChange,
                at: EventTime::Frame(*f),
                confidence: 0.7,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
