use std::f64::consts::PI;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MmsegError, Result};
use crate::features::SoundFeatures;

use super::{load_pcm, rms};

/// Prosody capability: pitch, speaking-rate and level contours over a span.
#[async_trait]
pub trait ProsodyAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        audio: &Path,
        start_ms: u64,
        end_ms: u64,
        points: usize,
    ) -> Result<SoundFeatures>;
    fn name(&self) -> &'static str;
}

/// Lowest and highest fundamental frequency searched for, in Hz.
const PITCH_RANGE: (f64, f64) = (60.0, 400.0);

/// Frames quieter than this are treated as unvoiced.
const VOICING_FLOOR: f32 = 0.01;

/// Envelope resolution used to count syllable-like peaks.
const ENVELOPE_STEP_S: f64 = 0.01;

/// Contours computed directly from a WAV source.
#[derive(Debug, Clone, Default)]
pub struct WavProsodyAnalyzer;

impl WavProsodyAnalyzer {
    fn analyze_blocking(
        audio: &Path,
        start_ms: u64,
        end_ms: u64,
        points: usize,
    ) -> Result<SoundFeatures> {
        let pcm = load_pcm(audio).map_err(|e| MmsegError::Prosody(e.to_string()))?;
        let window = pcm.slice_ms(start_ms, end_ms);
        if window.is_empty() {
            return Err(MmsegError::Prosody(format!(
                "No samples between {}ms and {}ms",
                start_ms, end_ms
            )));
        }

        let rate = pcm.sample_rate;
        let frame_len = (window.len() / points).max(1);
        let mut features = SoundFeatures::neutral(0);

        for frame in window.chunks(frame_len).take(points) {
            let level = rms(frame);
            features.level.push(level as f64);
            features.pitch.push(if level >= VOICING_FLOOR {
                estimate_pitch(frame, rate).unwrap_or(0.0)
            } else {
                0.0
            });
            features.rate.push(syllable_rate(frame, rate));
        }

        Ok(features.conform(points))
    }
}

#[async_trait]
impl ProsodyAnalyzer for WavProsodyAnalyzer {
    async fn analyze(
        &self,
        audio: &Path,
        start_ms: u64,
        end_ms: u64,
        points: usize,
    ) -> Result<SoundFeatures> {
        let audio = audio.to_path_buf();
        tokio::task::spawn_blocking(move || {
            Self::analyze_blocking(&audio, start_ms, end_ms, points)
        })
        .await
        .map_err(|e| MmsegError::Prosody(format!("Prosody task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}

/// Autocorrelation pitch estimate in Hz.
fn estimate_pitch(frame: &[f32], sample_rate: u32) -> Option<f64> {
    let rate = sample_rate as f64;
    let min_lag = (rate / PITCH_RANGE.1).floor() as usize;
    let max_lag = ((rate / PITCH_RANGE.0).ceil() as usize).min(frame.len().saturating_sub(1));
    if min_lag == 0 || min_lag >= max_lag {
        return None;
    }

    let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    if energy == 0.0 {
        return None;
    }

    let mut best = (0usize, 0.0f64);
    for lag in min_lag..=max_lag {
        let corr: f64 = frame
            .iter()
            .zip(&frame[lag..])
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum();
        if corr > best.1 {
            best = (lag, corr);
        }
    }

    // weak periodicity means unvoiced
    (best.0 > 0 && best.1 / energy > 0.3).then(|| rate / best.0 as f64)
}

/// Energy-envelope peaks per second, a rough syllable rate.
fn syllable_rate(frame: &[f32], sample_rate: u32) -> f64 {
    let step = ((ENVELOPE_STEP_S * sample_rate as f64) as usize).max(1);
    let envelope: Vec<f32> = frame.chunks(step).map(rms).collect();
    if envelope.len() < 3 {
        return 0.0;
    }

    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    let peaks = envelope
        .windows(3)
        .filter(|w| w[1] > w[0] && w[1] >= w[2] && w[1] > mean && w[1] >= VOICING_FLOOR)
        .count();

    let seconds = frame.len() as f64 / sample_rate as f64;
    if seconds > 0.0 {
        peaks as f64 / seconds
    } else {
        0.0
    }
}

/// Deterministic synthetic contours.
#[derive(Debug, Clone, Default)]
pub struct StubProsodyAnalyzer;

impl StubProsodyAnalyzer {
    pub fn contour(start_ms: u64, end_ms: u64, points: usize) -> SoundFeatures {
        let duration_s = (end_ms.saturating_sub(start_ms) as f64 / 1000.0).max(1e-3);
        let step = if points > 1 {
            duration_s / (points - 1) as f64
        } else {
            0.0
        };

        let mut features = SoundFeatures::neutral(0);
        for i in 0..points {
            let phase = 2.0 * PI * (i as f64 * step) / duration_s;
            features.pitch.push(200.0 + 50.0 * (phase * 2.0).sin());
            features.rate.push(1.0 + 0.2 * (phase * 3.0).sin());
            features.level.push(0.7 + 0.2 * (phase * 1.5).sin());
        }
        features
    }
}

#[async_trait]
impl ProsodyAnalyzer for StubProsodyAnalyzer {
    async fn analyze(
        &self,
        _audio: &Path,
        start_ms: u64,
        end_ms: u64,
        points: usize,
    ) -> Result<SoundFeatures> {
        debug!("Stub prosody {}-{}ms", start_ms, end_ms);
        Ok(Self::contour(start_ms, end_ms, points))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, seconds: f64, rate: u32) -> Vec<f32> {
        (0..(seconds * rate as f64) as usize)
            .map(|i| (0.5 * (2.0 * PI * freq * i as f64 / rate as f64).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_estimate_pitch_on_pure_tone() {
        let frame = tone(200.0, 0.1, 16000);
        let pitch = estimate_pitch(&frame, 16000).unwrap();
        assert!((pitch - 200.0).abs() < 5.0, "got {pitch}");
    }

    #[test]
    fn test_estimate_pitch_silence() {
        assert!(estimate_pitch(&[0.0; 1600], 16000).is_none());
    }

    #[test]
    fn test_stub_contour_shape() {
        let features = StubProsodyAnalyzer::contour(0, 3000, 15);
        assert_eq!(features.len(), 15);
        assert_eq!(features.rate.len(), 15);
        assert!((features.pitch[0] - 200.0).abs() < 1e-9);
        assert!(features.level.iter().all(|l| (0.5..=0.9).contains(l)));
    }

    #[tokio::test]
    async fn test_wav_analyzer_returns_requested_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in tone(150.0, 2.0, 16000) {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let features = WavProsodyAnalyzer
            .analyze(&path, 500, 1500, 10)
            .await
            .unwrap();

        assert_eq!(features.len(), 10);
        assert_eq!(features.level.len(), 10);
        assert!(features.level.iter().all(|l| *l > 0.3));
        assert!(features.pitch.iter().all(|p| (*p - 150.0).abs() < 10.0));
    }

    #[tokio::test]
    async fn test_wav_analyzer_empty_span_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let result = WavProsodyAnalyzer.analyze(&path, 5000, 6000, 15).await;
        assert!(matches!(result, Err(MmsegError::Prosody(_))));
    }
}
