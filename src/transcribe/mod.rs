pub mod stub;
pub mod whisper;

pub use stub::StubTranscriber;
pub use whisper::WhisperClient;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Where a segment's boundaries came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentSource {
    AsrPunct,
    MockAsr,
    VadSplit,
    VadFallback,
    Fallback,
    UltimateFallback,
    ErrorFallback,
}

impl SegmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentSource::AsrPunct => "ASR_PUNCT",
            SegmentSource::MockAsr => "MOCK_ASR",
            SegmentSource::VadSplit => "VAD_SPLIT",
            SegmentSource::VadFallback => "VAD_FALLBACK",
            SegmentSource::Fallback => "FALLBACK",
            SegmentSource::UltimateFallback => "ULTIMATE_FALLBACK",
            SegmentSource::ErrorFallback => "ERROR_FALLBACK",
        }
    }

    /// Produced by a degraded transcription or analysis path.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            SegmentSource::VadFallback
                | SegmentSource::Fallback
                | SegmentSource::UltimateFallback
                | SegmentSource::ErrorFallback
        )
    }
}

impl std::fmt::Display for SegmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timed text unit from transcription, or a sub-segment derived from one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub source: SegmentSource,
    #[serde(default)]
    pub punct: String,
}

impl RawSegment {
    pub fn new(text: impl Into<String>, start_ms: u64, end_ms: u64, source: SegmentSource) -> Self {
        Self {
            text: text.into(),
            start_ms,
            end_ms,
            source,
            punct: String::new(),
        }
    }

    pub fn with_punct(mut self, punct: impl Into<String>) -> Self {
        self.punct = punct.into();
        self
    }

    pub fn start_s(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    pub fn end_s(&self) -> f64 {
        self.end_ms as f64 / 1000.0
    }

    pub fn duration_s(&self) -> f64 {
        self.end_s() - self.start_s()
    }
}

/// Transcription and segmentation capability.
#[async_trait]
pub trait SegmentTranscriber: Send + Sync {
    async fn transcribe_and_segment(&self, audio: &Path) -> Result<Vec<RawSegment>>;
    fn name(&self) -> &'static str;
}

/// Enforce `start_ms <= end_ms` on provider output.
///
/// Order and overlap are left as delivered; everything downstream works per
/// segment and does not depend on monotonic input.
pub fn normalize_segments(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    segments
        .into_iter()
        .map(|mut segment| {
            if segment.end_ms < segment.start_ms {
                warn!(
                    "Segment ends before it starts ({}ms < {}ms), clamping",
                    segment.end_ms, segment.start_ms
                );
                segment.end_ms = segment.start_ms;
            }
            segment
        })
        .collect()
}
