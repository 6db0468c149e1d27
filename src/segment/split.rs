use tracing::debug;

use crate::config::AnalysisSettings;
use crate::transcribe::{RawSegment, SegmentSource};

use super::VadTimeline;

/// Breaks long or dense segments into sub-segments at pause boundaries.
#[derive(Debug, Clone)]
pub struct SegmentSplitter {
    max_segment_s: f64,
    max_chars: usize,
    min_split_s: f64,
}

impl SegmentSplitter {
    pub fn new(max_segment_s: f64, max_chars: usize, min_split_s: f64) -> Self {
        Self {
            max_segment_s,
            max_chars,
            min_split_s,
        }
    }

    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self::new(
            settings.max_segment_s,
            settings.max_chars,
            settings.min_split_s,
        )
    }

    /// Over the duration limit or the character limit.
    pub fn needs_split(&self, segment: &RawSegment) -> bool {
        segment.duration_s() > self.max_segment_s || segment.text.chars().count() > self.max_chars
    }

    /// Split `segment` if it needs it and the timeline offers usable pauses.
    ///
    /// Sub-segments tile the parent span exactly and are never shorter than
    /// `min_split_s`. Without a usable pause the segment comes back unchanged.
    pub fn split(&self, segment: &RawSegment, timeline: Option<&VadTimeline>) -> Vec<RawSegment> {
        if !self.needs_split(segment) {
            return vec![segment.clone()];
        }

        let Some(timeline) = timeline else {
            return vec![segment.clone()];
        };

        let start_s = segment.start_s();
        let end_s = segment.end_s();

        let mut cuts = Vec::new();
        let mut prev = start_s;
        for point in timeline.pauses_within(start_s, end_s) {
            if point - prev >= self.min_split_s && end_s - point >= self.min_split_s {
                cuts.push((point * 1000.0).round() as u64);
                prev = point;
            }
        }

        if cuts.is_empty() {
            debug!(
                "No usable pause inside {:.2}-{:.2}s, keeping segment whole",
                start_s, end_s
            );
            return vec![segment.clone()];
        }

        let mut bounds = Vec::with_capacity(cuts.len() + 2);
        bounds.push(segment.start_ms);
        bounds.extend(cuts);
        bounds.push(segment.end_ms);

        debug!(
            "Split {:.2}-{:.2}s into {} sub-segments",
            start_s,
            end_s,
            bounds.len() - 1
        );

        bounds
            .windows(2)
            .map(|w| RawSegment {
                start_ms: w[0],
                end_ms: w[1],
                source: SegmentSource::VadSplit,
                ..segment.clone()
            })
            .collect()
    }
}
