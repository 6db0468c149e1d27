use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::{Interval, PauseReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadLabel {
    Speech,
    Pause,
}

/// Speech/pause labels on a coarse grid, keyed by tenths of a second.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VadTimeline {
    buckets: BTreeMap<i64, VadLabel>,
}

fn bucket(t: f64) -> i64 {
    (t * 10.0).round() as i64
}

impl VadTimeline {
    /// Discretise speech then pause intervals at `step` seconds.
    ///
    /// Buckets are rounded to one decimal; a later label overwrites an earlier
    /// one in the same bucket, so pauses win over speech.
    pub fn build(report: &PauseReport, step: f64) -> Self {
        let mut timeline = Self::default();
        if step <= 0.0 {
            return timeline;
        }

        for interval in &report.speech {
            timeline.fill(interval, step, VadLabel::Speech);
        }
        for interval in &report.pauses {
            timeline.fill(interval, step, VadLabel::Pause);
        }

        timeline
    }

    fn fill(&mut self, interval: &Interval, step: f64, label: VadLabel) {
        if !interval.start_s.is_finite() || !interval.end_s.is_finite() {
            warn!(
                "Skipping non-finite {:?} interval {}-{}",
                label, interval.start_s, interval.end_s
            );
            return;
        }

        let mut i = 0u64;
        loop {
            let t = interval.start_s + i as f64 * step;
            if t >= interval.end_s {
                break;
            }
            self.buckets.insert(bucket(t), label);
            i += 1;
        }
    }

    pub fn label_at(&self, t: f64) -> Option<VadLabel> {
        self.buckets.get(&bucket(t)).copied()
    }

    /// Pause buckets strictly inside `(start_s, end_s)`, in time order.
    pub fn pauses_within(&self, start_s: f64, end_s: f64) -> Vec<f64> {
        self.buckets
            .iter()
            .map(|(k, label)| (*k as f64 / 10.0, *label))
            .filter(|(t, label)| *label == VadLabel::Pause && *t > start_s && *t < end_s)
            .map(|(t, _)| t)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
