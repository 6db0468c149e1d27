use tracing::debug;

use super::Event;

/// Whether a window gets a full feature computation, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecision {
    pub should_trigger: bool,
    pub reasons: Vec<String>,
}

/// Decides between full computation and cache reuse for each window.
///
/// A window triggers when it contains events, when nothing has been fully
/// computed yet, or when the window start is at least `min_interval_s` away
/// from the last full computation.
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    min_interval_s: f64,
    last_full_compute: Option<f64>,
}

impl TriggerPolicy {
    pub fn new(min_interval_s: f64) -> Self {
        Self {
            min_interval_s,
            last_full_compute: None,
        }
    }

    pub fn decide(&self, events: &[Event], window_start_s: f64) -> TriggerDecision {
        let mut reasons = Vec::new();

        if !events.is_empty() {
            reasons.push(format!("detected_{}_events", events.len()));
        }

        match self.last_full_compute {
            None => reasons.push("initial_compute".to_string()),
            Some(last) if (window_start_s - last).abs() >= self.min_interval_s => {
                reasons.push("recompute_interval_elapsed".to_string())
            }
            Some(_) => {}
        }

        debug!("Trigger at {:.2}s: {:?}", window_start_s, reasons);

        TriggerDecision {
            should_trigger: !reasons.is_empty(),
            reasons,
        }
    }

    pub fn record_full_compute(&mut self, window_start_s: f64) {
        self.last_full_compute = Some(window_start_s);
    }

    pub fn last_full_compute(&self) -> Option<f64> {
        self.last_full_compute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventTime};

    fn event() -> Event {
        Event {
            kind: EventKind::AudioChange,
            at: EventTime::Seconds(1.0),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_first_window_always_triggers() {
        let policy = TriggerPolicy::new(2.0);
        let decision = policy.decide(&[], 0.0);
        assert!(decision.should_trigger);
        assert_eq!(decision.reasons, vec!["initial_compute"]);
    }

    #[test]
    fn test_quiet_window_inside_interval_reuses_cache() {
        let mut policy = TriggerPolicy::new(2.0);
        policy.record_full_compute(10.0);

        let decision = policy.decide(&[], 11.0);
        assert!(!decision.should_trigger);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_interval_elapsed_triggers() {
        let mut policy = TriggerPolicy::new(2.0);
        policy.record_full_compute(10.0);

        let decision = policy.decide(&[], 12.0);
        assert!(decision.should_trigger);
        assert_eq!(decision.reasons, vec!["recompute_interval_elapsed"]);
    }

    #[test]
    fn test_events_trigger_and_are_counted() {
        let mut policy = TriggerPolicy::new(2.0);
        policy.record_full_compute(10.0);

        let decision = policy.decide(&[event(), event()], 10.5);
        assert!(decision.should_trigger);
        assert_eq!(decision.reasons, vec!["detected_2_events"]);
    }
}
