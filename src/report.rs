//! Output records and the JSON artifact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::features::{neutral_face, FaceFeatures, SoundFeatures};
use crate::transcribe::{RawSegment, SegmentSource};

/// Placeholder text for failed segments that carried none.
pub const FAILED_SEGMENT_TEXT: &str = "[analysis failed]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    FullCompute,
    CachedInterpolation,
    ErrorFallback,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::FullCompute => "full_compute",
            AnalysisMode::CachedInterpolation => "cached_interpolation",
            AnalysisMode::ErrorFallback => "error_fallback",
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub schema_version: String,
    pub source: SegmentSource,
    pub fallback_flag: bool,
    pub original_punct: String,
    pub analysis_mode: AnalysisMode,
}

/// One analysed sub-segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    pub segment_id: String,
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub sound: SoundFeatures,
    pub face: FaceFeatures,
    pub meta: SegmentMeta,
}

pub fn segment_id(start_ms: u64, end_ms: u64) -> String {
    format!("seg_{:06}_{:06}", start_ms, end_ms)
}

impl SegmentResult {
    pub fn new(
        segment: &RawSegment,
        sound: SoundFeatures,
        face: FaceFeatures,
        mode: AnalysisMode,
        schema_version: &str,
    ) -> Self {
        Self {
            segment_id: segment_id(segment.start_ms, segment.end_ms),
            word: segment.text.clone(),
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
            sound,
            face,
            meta: SegmentMeta {
                schema_version: schema_version.to_string(),
                source: segment.source,
                fallback_flag: segment.source.is_fallback(),
                original_punct: segment.punct.clone(),
                analysis_mode: mode,
            },
        }
    }

    /// Neutral record standing in for a sub-segment whose analysis failed.
    pub fn error_fallback(segment: &RawSegment, points: usize, schema_version: &str) -> Self {
        let mut result = Self::new(
            segment,
            SoundFeatures::neutral(points),
            neutral_face(),
            AnalysisMode::ErrorFallback,
            schema_version,
        );
        if result.word.trim().is_empty() {
            result.word = FAILED_SEGMENT_TEXT.to_string();
        }
        result.meta.source = SegmentSource::ErrorFallback;
        result.meta.fallback_flag = true;
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub audio_entries: usize,
    pub video_entries: usize,
    pub audio_evicted: usize,
    pub video_evicted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub total_time_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precompute_time_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_s: Option<f64>,
    /// Source duration over wall time, e.g. `"3.20x"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speedup_ratio: Option<String>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_duration: f64,
    pub segment_count: usize,
    #[serde(default)]
    pub source_counts: BTreeMap<String, usize>,
    #[serde(default)]
    pub asr_segments: usize,
    #[serde(default)]
    pub vad_fallback_segments: usize,
    #[serde(default)]
    pub analysis_modes: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub performance: Performance,
}

pub fn speedup_ratio(duration_s: f64, wall: Duration) -> String {
    let wall_s = wall.as_secs_f64();
    if wall_s <= 0.0 {
        return "0.00x".to_string();
    }
    format!("{:.2}x", duration_s / wall_s)
}

impl Summary {
    pub fn completed(
        segments: &[SegmentResult],
        total_duration: f64,
        segmentation_mode: &str,
        cache: CacheStats,
        precompute: Duration,
        total: Duration,
    ) -> Self {
        let mut source_counts = BTreeMap::new();
        let mut analysis_modes = BTreeMap::new();
        for segment in segments {
            *source_counts
                .entry(segment.meta.source.as_str().to_string())
                .or_insert(0) += 1;
            *analysis_modes
                .entry(segment.meta.analysis_mode.as_str().to_string())
                .or_insert(0) += 1;
        }

        let count = |source: SegmentSource| {
            segments
                .iter()
                .filter(|s| s.meta.source == source)
                .count()
        };

        Self {
            total_duration,
            segment_count: segments.len(),
            asr_segments: count(SegmentSource::AsrPunct),
            vad_fallback_segments: count(SegmentSource::VadFallback),
            source_counts,
            analysis_modes,
            segmentation_mode: Some(segmentation_mode.to_string()),
            cache: Some(cache),
            error: None,
            performance: Performance {
                total_time_s: total.as_secs_f64(),
                precompute_time_s: Some(precompute.as_secs_f64()),
                processing_time_s: Some(total.saturating_sub(precompute).as_secs_f64()),
                speedup_ratio: Some(speedup_ratio(total_duration, total)),
                status: RunStatus::Completed,
            },
        }
    }

    pub fn failed(error: impl Into<String>, total: Duration) -> Self {
        Self {
            total_duration: 0.0,
            segment_count: 0,
            source_counts: BTreeMap::new(),
            asr_segments: 0,
            vad_fallback_segments: 0,
            analysis_modes: BTreeMap::new(),
            segmentation_mode: None,
            cache: None,
            error: Some(error.into()),
            performance: Performance {
                total_time_s: total.as_secs_f64(),
                precompute_time_s: None,
                processing_time_s: None,
                speedup_ratio: None,
                status: RunStatus::Failed,
            },
        }
    }
}

/// The whole artifact: `{segments, summary}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub segments: Vec<SegmentResult>,
    pub summary: Summary,
}

impl AnalysisReport {
    /// Degraded report for a run that could not complete.
    pub fn failed(error: impl Into<String>, total: Duration) -> Self {
        Self {
            segments: Vec::new(),
            summary: Summary::failed(error, total),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.summary.performance.status == RunStatus::Failed
    }
}

/// Sibling path of the media file: `<stem>_analysis_result.json`.
pub fn report_path(media: &Path) -> PathBuf {
    let stem = media.file_stem().unwrap_or_default();
    let mut output = media.to_path_buf();
    output.set_file_name(format!("{}_analysis_result.json", stem.to_string_lossy()));
    output
}

pub fn write_report(report: &AnalysisReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    info!("Wrote {} segments to {}", report.segments.len(), path.display());
    Ok(())
}

pub fn read_report(path: &Path) -> Result<AnalysisReport> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
