use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::audio::ProsodyAnalyzer;
use crate::cache::FeatureCache;
use crate::config::AnalysisSettings;
use crate::error::Result;
use crate::events::{Event, EventDetector, TriggerPolicy};
use crate::features::{conform_face, neutral_face, SoundFeatures};
use crate::precompute::{AudioFeatures, VideoFeatures};
use crate::providers::Providers;
use crate::report::{AnalysisMode, SegmentResult};
use crate::transcribe::RawSegment;
use crate::video::FacialAnalyzer;

/// Media paths and precomputed features shared by every sub-segment of a source.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub video: &'a Path,
    pub audio: &'a Path,
    pub audio_features: &'a AudioFeatures,
    pub video_features: &'a VideoFeatures,
}

/// Turns sub-segments into results, one at a time.
///
/// Each sub-segment goes through event detection and the trigger decision,
/// then either a full analysis (written to the cache) or a cache lookup.
/// Any error or panic on the way yields an `error_fallback` result instead.
pub struct SegmentProcessor {
    prosody: Arc<dyn ProsodyAnalyzer>,
    facial: Arc<dyn FacialAnalyzer>,
    events: Arc<dyn EventDetector>,
    policy: TriggerPolicy,
    prosody_points: usize,
    schema_version: String,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl SegmentProcessor {
    pub fn new(providers: &Providers, settings: &AnalysisSettings) -> Self {
        Self {
            prosody: providers.prosody.clone(),
            facial: providers.facial.clone(),
            events: providers.events.clone(),
            policy: TriggerPolicy::new(settings.min_recompute_interval_s),
            prosody_points: settings.prosody_points,
            schema_version: settings.schema_version.clone(),
        }
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    /// Always produces a result for `segment`.
    pub async fn process(
        &mut self,
        segment: &RawSegment,
        source: SourceContext<'_>,
        cache: &mut FeatureCache,
    ) -> SegmentResult {
        let outcome = AssertUnwindSafe(self.try_process(segment, source, cache))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(
                    "Sub-segment {}-{}ms failed: {}",
                    segment.start_ms, segment.end_ms, e
                );
                self.fallback(segment)
            }
            Err(panic) => {
                error!(
                    "Sub-segment {}-{}ms panicked: {}",
                    segment.start_ms,
                    segment.end_ms,
                    panic_message(&*panic)
                );
                self.fallback(segment)
            }
        }
    }

    fn fallback(&self, segment: &RawSegment) -> SegmentResult {
        SegmentResult::error_fallback(segment, self.prosody_points, &self.schema_version)
    }

    async fn try_process(
        &mut self,
        segment: &RawSegment,
        source: SourceContext<'_>,
        cache: &mut FeatureCache,
    ) -> Result<SegmentResult> {
        let start_s = segment.start_s();
        let events = self.detect_events(segment, &source);
        let decision = self.policy.decide(&events, start_s);

        if decision.should_trigger {
            debug!("Full compute at {:.2}s: {:?}", start_s, decision.reasons);
            let result = self.full_compute(segment, &source).await?;
            cache.store_audio(start_s, result.sound.clone());
            cache.store_video(start_s, result.face.clone());
            self.policy.record_full_compute(start_s);
            Ok(result)
        } else {
            debug!("Cached interpolation at {:.2}s", start_s);
            Ok(self.cached(segment, cache))
        }
    }

    /// Audio and video events inside the segment window, audio first.
    fn detect_events(&self, segment: &RawSegment, source: &SourceContext<'_>) -> Vec<Event> {
        let start_s = segment.start_s();
        let end_s = segment.end_s();

        let mut events = self
            .events
            .detect_audio_events(&source.audio_features.envelope, start_s, end_s)
            .unwrap_or_else(|e| {
                warn!("Audio event detection failed at {:.2}s: {}", start_s, e);
                Vec::new()
            });

        let video = source.video_features;
        let video_events = self
            .events
            .detect_video_events(video, video.frame_at(start_s), video.frame_at(end_s))
            .unwrap_or_else(|e| {
                warn!("Video event detection failed at {:.2}s: {}", start_s, e);
                Vec::new()
            });
        events.extend(video_events);

        events
    }

    async fn full_compute(
        &self,
        segment: &RawSegment,
        source: &SourceContext<'_>,
    ) -> Result<SegmentResult> {
        let sound = self
            .prosody
            .analyze(
                source.audio,
                segment.start_ms,
                segment.end_ms,
                self.prosody_points,
            )
            .await?
            .conform(self.prosody_points);

        let face = conform_face(
            self.facial
                .analyze(source.video, segment.start_ms, segment.end_ms)
                .await?,
        );

        Ok(SegmentResult::new(
            segment,
            sound,
            face,
            AnalysisMode::FullCompute,
            &self.schema_version,
        ))
    }

    fn cached(&self, segment: &RawSegment, cache: &FeatureCache) -> SegmentResult {
        let start_s = segment.start_s();

        let sound = match cache.lookup_audio(start_s) {
            Some(sound) => sound.conform(self.prosody_points),
            None => SoundFeatures::neutral(self.prosody_points),
        };
        let face = cache.lookup_video(start_s).unwrap_or_else(neutral_face);

        SegmentResult::new(
            segment,
            sound,
            face,
            AnalysisMode::CachedInterpolation,
            &self.schema_version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MmsegError;
    use crate::events::StubEventDetector;
    use crate::features::FaceFeatures;
    use crate::transcribe::SegmentSource;
    use crate::video::StubFacialAnalyzer;
    use async_trait::async_trait;

    struct BrokenFacial;

    #[async_trait]
    impl FacialAnalyzer for BrokenFacial {
        async fn analyze(&self, _video: &Path, _start_ms: u64, _end_ms: u64) -> Result<FaceFeatures> {
            Err(MmsegError::Facial("no landmarks".to_string()))
        }

        async fn sample(&self, _video: &Path, _timestamp_s: f64) -> Result<Option<FaceFeatures>> {
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    struct PanickingFacial;

    #[async_trait]
    impl FacialAnalyzer for PanickingFacial {
        async fn analyze(&self, _video: &Path, _start_ms: u64, _end_ms: u64) -> Result<FaceFeatures> {
            panic!("landmark index out of range");
        }

        async fn sample(&self, _video: &Path, _timestamp_s: f64) -> Result<Option<FaceFeatures>> {
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct Fixture {
        audio: AudioFeatures,
        video: VideoFeatures,
        path: &'static Path,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                audio: AudioFeatures::default(),
                video: VideoFeatures::empty(30.0),
                path: Path::new("/nonexistent/clip.mp4"),
            }
        }

        fn source(&self) -> SourceContext<'_> {
            SourceContext {
                video: self.path,
                audio: self.path,
                audio_features: &self.audio,
                video_features: &self.video,
            }
        }
    }

    fn processor(providers: Providers) -> SegmentProcessor {
        SegmentProcessor::new(&providers, &AnalysisSettings::default())
    }

    fn segment(start_ms: u64, end_ms: u64) -> RawSegment {
        RawSegment::new("text", start_ms, end_ms, SegmentSource::AsrPunct)
    }

    #[tokio::test]
    async fn test_first_segment_full_compute_fills_cache() {
        let settings = AnalysisSettings::default();
        let mut processor = processor(Providers::stub(&settings));
        let mut cache = FeatureCache::new(2.0);
        let fixture = Fixture::new();

        let result = processor
            .process(&segment(0, 3000), fixture.source(), &mut cache)
            .await;

        assert_eq!(result.meta.analysis_mode, AnalysisMode::FullCompute);
        assert_eq!(result.sound.len(), 15);
        assert_eq!(result.face, StubFacialAnalyzer::descriptor());
        assert_eq!(cache.audio_timestamps(), vec![0.0]);
        assert_eq!(cache.video_timestamps(), vec![0.0]);
        assert_eq!(processor.policy().last_full_compute(), Some(0.0));
    }

    #[tokio::test]
    async fn test_quiet_follow_up_reads_cache() {
        let settings = AnalysisSettings::default();
        let mut processor = processor(Providers::stub(&settings));
        let mut cache = FeatureCache::new(2.0);
        let fixture = Fixture::new();

        let first = processor
            .process(&segment(0, 1000), fixture.source(), &mut cache)
            .await;
        let second = processor
            .process(&segment(1000, 2000), fixture.source(), &mut cache)
            .await;

        assert_eq!(second.meta.analysis_mode, AnalysisMode::CachedInterpolation);
        assert_eq!(second.sound, first.sound);
        assert_eq!(second.face, first.face);
        assert_eq!(cache.audio_len(), 1);
    }

    #[tokio::test]
    async fn test_cache_miss_uses_neutral_defaults() {
        let settings = AnalysisSettings {
            min_recompute_interval_s: 100.0,
            ..AnalysisSettings::default()
        };
        let providers = Providers::stub(&settings);
        let mut processor = SegmentProcessor::new(&providers, &settings);
        let mut cache = FeatureCache::new(2.0);
        let fixture = Fixture::new();

        processor
            .process(&segment(0, 1000), fixture.source(), &mut cache)
            .await;
        let far = processor
            .process(&segment(10000, 11000), fixture.source(), &mut cache)
            .await;

        assert_eq!(far.meta.analysis_mode, AnalysisMode::CachedInterpolation);
        assert_eq!(far.sound, SoundFeatures::neutral(15));
        assert_eq!(far.face, neutral_face());
    }

    #[tokio::test]
    async fn test_events_force_full_compute() {
        let settings = AnalysisSettings::default();
        let providers = Providers::stub(&settings)
            .with_events(Arc::new(StubEventDetector::new().with_audio_events(vec![1.2])));
        let mut processor = SegmentProcessor::new(&providers, &settings);
        let mut cache = FeatureCache::new(2.0);
        let fixture = Fixture::new();

        processor
            .process(&segment(0, 1000), fixture.source(), &mut cache)
            .await;
        let result = processor
            .process(&segment(1000, 2000), fixture.source(), &mut cache)
            .await;

        assert_eq!(result.meta.analysis_mode, AnalysisMode::FullCompute);
        assert_eq!(cache.audio_len(), 2);
    }

    #[tokio::test]
    async fn test_analyzer_error_becomes_error_fallback() {
        let settings = AnalysisSettings::default();
        let providers = Providers::stub(&settings).with_facial(Arc::new(BrokenFacial));
        let mut processor = SegmentProcessor::new(&providers, &settings);
        let mut cache = FeatureCache::new(2.0);
        let fixture = Fixture::new();

        let result = processor
            .process(&segment(0, 3000), fixture.source(), &mut cache)
            .await;

        assert_eq!(result.meta.analysis_mode, AnalysisMode::ErrorFallback);
        assert_eq!(result.meta.source, SegmentSource::ErrorFallback);
        assert_eq!((result.start_ms, result.end_ms), (0, 3000));
        assert_eq!(cache.audio_len(), 0);
        // a failed full compute does not count as one
        assert_eq!(processor.policy().last_full_compute(), None);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_fallback() {
        let settings = AnalysisSettings::default();
        let providers = Providers::stub(&settings).with_facial(Arc::new(PanickingFacial));
        let mut processor = SegmentProcessor::new(&providers, &settings);
        let mut cache = FeatureCache::new(2.0);
        let fixture = Fixture::new();

        let result = processor
            .process(&segment(0, 3000), fixture.source(), &mut cache)
            .await;

        assert_eq!(result.meta.analysis_mode, AnalysisMode::ErrorFallback);
        assert_eq!(result.word, "text");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
