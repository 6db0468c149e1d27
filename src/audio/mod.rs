pub mod extract;
pub mod prosody;
pub mod vad;

pub use extract::{
    derive_audio_path, extract_audio, probe_duration, probe_video, resolve_audio, VideoInfo,
};
pub use prosody::{ProsodyAnalyzer, StubProsodyAnalyzer, WavProsodyAnalyzer};
pub use vad::{
    EnergyPauseDetector, Interval, PauseDetector, PauseReport, StubPauseDetector, VadConfig,
};

use std::path::Path;

use hound::WavReader;

use crate::error::Result;

/// Mono samples normalised to `[-1, 1]` together with their rate.
#[derive(Debug, Clone)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples between two millisecond offsets, clamped to the signal.
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> &[f32] {
        let rate = self.sample_rate as u64;
        let start = ((start_ms * rate) / 1000) as usize;
        let end = ((end_ms * rate) / 1000) as usize;
        let end = end.min(self.samples.len());
        let start = start.min(end);
        &self.samples[start..end]
    }
}

/// Read a WAV file, downmixing to mono.
pub fn load_pcm(path: &Path) -> Result<Pcm> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(Pcm {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Root mean square of a sample window.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
