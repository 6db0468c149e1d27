use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::audio::probe_duration;
use crate::error::Result;

use super::{RawSegment, SegmentSource, SegmentTranscriber};

/// Deterministic transcriber: fixed-length placeholder segments over the source duration.
#[derive(Debug, Clone)]
pub struct StubTranscriber {
    segment_ms: u64,
    probe_timeout: Duration,
    default_duration_s: f64,
}

impl Default for StubTranscriber {
    fn default() -> Self {
        Self {
            segment_ms: 3000,
            probe_timeout: Duration::from_secs(10),
            default_duration_s: 30.0,
        }
    }
}

impl StubTranscriber {
    pub fn new(probe_timeout: Duration, default_duration_s: f64) -> Self {
        Self {
            probe_timeout,
            default_duration_s,
            ..Self::default()
        }
    }

    /// Segments tiling `[0, duration)` in whole-second steps.
    pub fn segments_for(&self, duration_s: f64) -> Vec<RawSegment> {
        let total_ms = (duration_s * 1000.0) as u64;
        let whole_ms = (duration_s.floor() as u64) * 1000;

        (0..whole_ms)
            .step_by(self.segment_ms as usize)
            .enumerate()
            .map(|(i, start_ms)| {
                RawSegment::new(
                    format!("placeholder segment {}", i + 1),
                    start_ms,
                    (start_ms + self.segment_ms).min(total_ms),
                    SegmentSource::MockAsr,
                )
                .with_punct("。")
            })
            .collect()
    }
}

#[async_trait]
impl SegmentTranscriber for StubTranscriber {
    async fn transcribe_and_segment(&self, audio: &Path) -> Result<Vec<RawSegment>> {
        let duration = probe_duration(audio, self.probe_timeout, self.default_duration_s).await;
        info!("Stub transcription over {:.2}s", duration);
        Ok(self.segments_for(duration))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
