use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MmsegError, Result};

use super::extract::probe_duration;
use super::{load_pcm, rms};

/// A span of audio in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start_s: f64,
    pub end_s: f64,
}

impl Interval {
    pub fn new(start_s: f64, end_s: f64) -> Self {
        Self { start_s, end_s }
    }

    pub fn duration(&self) -> f64 {
        (self.end_s - self.start_s).max(0.0)
    }
}

/// Speech and pause intervals covering an audio source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PauseReport {
    pub speech: Vec<Interval>,
    pub pauses: Vec<Interval>,
}

impl PauseReport {
    /// Derive pauses as the gaps around and between speech intervals.
    pub fn from_speech(speech: Vec<Interval>, total_s: f64) -> Self {
        let mut pauses = Vec::new();
        let mut cursor = 0.0;

        for region in &speech {
            if region.start_s > cursor {
                pauses.push(Interval::new(cursor, region.start_s));
            }
            cursor = cursor.max(region.end_s);
        }
        if total_s > cursor {
            pauses.push(Interval::new(cursor, total_s));
        }

        Self { speech, pauses }
    }
}

/// Voice-activity capability.
#[async_trait]
pub trait PauseDetector: Send + Sync {
    async fn detect_pauses(&self, audio: &Path) -> Result<PauseReport>;
    fn name(&self) -> &'static str;
}

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// RMS energy threshold for speech detection (0.0 to 1.0).
    /// Lower values are more sensitive to quiet speech.
    pub energy_threshold: f32,

    /// Minimum duration of speech to be considered a valid region.
    pub min_speech_duration: Duration,

    /// Minimum duration of silence to split regions.
    pub min_silence_duration: Duration,

    /// Analysis window in seconds.
    pub window_s: f64,

    /// Hop between windows in seconds.
    pub hop_s: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            min_speech_duration: Duration::from_millis(250),
            min_silence_duration: Duration::from_millis(300),
            window_s: 0.1,
            hop_s: 0.05,
        }
    }
}

/// Energy-threshold detector over a WAV source.
#[derive(Debug, Clone, Default)]
pub struct EnergyPauseDetector {
    config: VadConfig,
}

impl EnergyPauseDetector {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    fn detect_blocking(audio: &Path, config: &VadConfig) -> Result<PauseReport> {
        let pcm = load_pcm(audio).map_err(|e| MmsegError::Vad(e.to_string()))?;
        if pcm.sample_rate == 0 {
            return Err(MmsegError::Vad("WAV has zero sample rate".to_string()));
        }

        let window = ((config.window_s * pcm.sample_rate as f64) as usize).max(1);
        let hop = ((config.hop_s * pcm.sample_rate as f64) as usize).max(1);

        info!(
            "Analyzing audio: {} Hz, {:.2}s",
            pcm.sample_rate,
            pcm.duration_secs()
        );

        let energy = compute_energy_profile(&pcm.samples, window, hop);
        let speech_frames: Vec<bool> = energy
            .iter()
            .map(|&e| e >= config.energy_threshold)
            .collect();

        let frame_s = hop as f64 / pcm.sample_rate as f64;
        let speech = frames_to_regions(
            &speech_frames,
            frame_s,
            config.min_speech_duration,
            config.min_silence_duration,
        );

        info!(
            "Detected {} speech regions in {:.2}s of audio",
            speech.len(),
            pcm.duration_secs()
        );

        Ok(PauseReport::from_speech(speech, pcm.duration_secs()))
    }
}

#[async_trait]
impl PauseDetector for EnergyPauseDetector {
    async fn detect_pauses(&self, audio: &Path) -> Result<PauseReport> {
        let audio = audio.to_path_buf();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || Self::detect_blocking(&audio, &config))
            .await
            .map_err(|e| MmsegError::Vad(format!("VAD task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Compute energy profile using sliding window.
fn compute_energy_profile(samples: &[f32], window_size: usize, hop_size: usize) -> Vec<f32> {
    let mut energy_values = Vec::new();
    let mut pos = 0;

    while pos + window_size <= samples.len() {
        energy_values.push(rms(&samples[pos..pos + window_size]));
        pos += hop_size;
    }

    energy_values
}

/// Convert speech frames to time regions with merging and filtering.
fn frames_to_regions(
    speech_frames: &[bool],
    frame_s: f64,
    min_speech_duration: Duration,
    min_silence_duration: Duration,
) -> Vec<Interval> {
    if speech_frames.is_empty() {
        return vec![];
    }

    let min_speech_frames = (min_speech_duration.as_secs_f64() / frame_s).ceil() as usize;
    let min_silence_frames = (min_silence_duration.as_secs_f64() / frame_s).ceil() as usize;

    let mut raw_regions: Vec<(usize, usize)> = Vec::new();
    let mut in_speech = false;
    let mut start_frame = 0;

    for (i, &is_speech) in speech_frames.iter().enumerate() {
        if is_speech && !in_speech {
            in_speech = true;
            start_frame = i;
        } else if !is_speech && in_speech {
            in_speech = false;
            raw_regions.push((start_frame, i));
        }
    }

    if in_speech {
        raw_regions.push((start_frame, speech_frames.len()));
    }

    let mut merged_regions: Vec<(usize, usize)> = Vec::new();
    for (start, end) in raw_regions {
        if let Some((_last_start, last_end)) = merged_regions.last_mut() {
            if start.saturating_sub(*last_end) < min_silence_frames {
                *last_end = end;
                continue;
            }
        }
        merged_regions.push((start, end));
    }

    merged_regions
        .into_iter()
        .filter(|(start, end)| end - start >= min_speech_frames)
        .map(|(start, end)| Interval::new(start as f64 * frame_s, end as f64 * frame_s))
        .collect()
}

/// Deterministic detector: alternating speech and pause blocks over the source duration.
#[derive(Debug, Clone)]
pub struct StubPauseDetector {
    speech_s: f64,
    pause_s: f64,
    probe_timeout: Duration,
    default_duration_s: f64,
}

impl Default for StubPauseDetector {
    fn default() -> Self {
        Self {
            speech_s: 3.0,
            pause_s: 0.5,
            probe_timeout: Duration::from_secs(10),
            default_duration_s: 30.0,
        }
    }
}

impl StubPauseDetector {
    pub fn new(probe_timeout: Duration, default_duration_s: f64) -> Self {
        Self {
            probe_timeout,
            default_duration_s,
            ..Self::default()
        }
    }

    /// Lay the pattern over `[0, duration)`.
    pub fn pattern(&self, duration: f64) -> PauseReport {
        let mut report = PauseReport::default();
        if !duration.is_finite() {
            warn!("Stub VAD given a non-finite duration, emitting no intervals");
            return report;
        }
        let mut cursor = 0.0;

        while cursor < duration {
            let speech_end = (cursor + self.speech_s).min(duration);
            report.speech.push(Interval::new(cursor, speech_end));
            cursor = speech_end;

            if cursor < duration {
                let pause_end = (cursor + self.pause_s).min(duration);
                report.pauses.push(Interval::new(cursor, pause_end));
                cursor = pause_end;
            }
        }

        report
    }
}

#[async_trait]
impl PauseDetector for StubPauseDetector {
    async fn detect_pauses(&self, audio: &Path) -> Result<PauseReport> {
        let duration = probe_duration(audio, self.probe_timeout, self.default_duration_s).await;
        debug!("Stub VAD over {:.2}s", duration);
        Ok(self.pattern(duration))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
