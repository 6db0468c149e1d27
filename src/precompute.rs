//! Coarse features and raw segments computed once per media source.
//!
//! Audio features, face sampling and transcription run as three tasks on a
//! bounded worker pool and are joined before segment processing starts. Each
//! task turns its own failures into a typed default.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audio::{probe_duration, probe_video, PauseReport, VideoInfo};
use crate::config::AnalysisSettings;
use crate::events::AudioEnvelope;
use crate::features::FaceFeatures;
use crate::providers::Providers;
use crate::segment::VadTimeline;
use crate::transcribe::{normalize_segments, RawSegment, SegmentSource};

/// Speech/pause intervals and the timeline built from them.
#[derive(Debug, Clone, Default)]
pub struct VadInfo {
    pub report: PauseReport,
    pub timeline: VadTimeline,
}

#[derive(Debug, Clone, Default)]
pub struct AudioFeatures {
    pub duration_s: f64,
    pub envelope: AudioEnvelope,
    /// `None` when no voice-activity provider is configured.
    pub vad: Option<VadInfo>,
    pub error: Option<String>,
}

impl AudioFeatures {
    fn fallback(duration_s: f64, error: String) -> Self {
        Self {
            duration_s,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn timeline(&self) -> Option<&VadTimeline> {
        self.vad.as_ref().map(|v| &v.timeline)
    }
}

/// Sparse face descriptors keyed by frame index.
#[derive(Debug, Clone, Default)]
pub struct VideoFeatures {
    pub face_samples: BTreeMap<u64, FaceFeatures>,
    pub fps: f64,
    pub total_frames: u64,
    pub duration_s: f64,
    pub error: Option<String>,
}

impl VideoFeatures {
    pub fn empty(fps: f64) -> Self {
        Self {
            fps,
            ..Self::default()
        }
    }

    /// Frame index containing `seconds`.
    pub fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.fps).floor() as u64
    }
}

/// Output of the precompute barrier.
#[derive(Debug, Clone)]
pub struct Precomputed {
    pub audio: AudioFeatures,
    pub video: VideoFeatures,
    pub segments: Vec<RawSegment>,
    pub elapsed: Duration,
}

/// Everything one precompute task needs, owned so it can move onto the pool.
#[derive(Clone)]
struct TaskContext {
    providers: Providers,
    settings: Arc<AnalysisSettings>,
    video: PathBuf,
    audio: PathBuf,
}

impl TaskContext {
    async fn duration(&self) -> f64 {
        probe_duration(
            &self.audio,
            self.settings.probe_timeout(),
            self.settings.default_duration_s,
        )
        .await
    }

    async fn audio_features(self) -> AudioFeatures {
        info!("Precomputing audio features");
        let mut errors = Vec::new();

        let envelope = match self.providers.events.precompute_audio(&self.audio).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Audio envelope unavailable: {}", e);
                errors.push(e.to_string());
                AudioEnvelope::default()
            }
        };

        let vad = match self.providers.pauses {
            Some(ref detector) => Some(match detector.detect_pauses(&self.audio).await {
                Ok(report) => {
                    let timeline = VadTimeline::build(&report, self.settings.vad_timeline_step_s);
                    info!(
                        "VAD: {} speech / {} pause intervals, {} timeline buckets",
                        report.speech.len(),
                        report.pauses.len(),
                        timeline.len()
                    );
                    VadInfo { report, timeline }
                }
                Err(e) => {
                    warn!("VAD precompute failed: {}", e);
                    errors.push(e.to_string());
                    VadInfo::default()
                }
            }),
            None => None,
        };

        let duration_s = self.duration().await;

        AudioFeatures {
            duration_s,
            envelope,
            vad,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    async fn video_features(self) -> VideoFeatures {
        info!("Precomputing video features");
        match probe_video(&self.video, self.settings.probe_timeout()).await {
            Ok(info) => self.sample_faces(&info).await,
            Err(e) => {
                warn!("Video precompute failed: {}", e);
                VideoFeatures {
                    error: Some(e.to_string()),
                    ..VideoFeatures::empty(self.settings.default_fps)
                }
            }
        }
    }

    /// Face descriptors every `video_sample_interval_s`; frames that fail are skipped.
    async fn sample_faces(&self, info: &VideoInfo) -> VideoFeatures {
        let fps = if info.fps > 0.0 {
            info.fps
        } else {
            self.settings.default_fps
        };
        let stride = ((fps * self.settings.video_sample_interval_s).floor() as u64).max(1);

        let mut features = VideoFeatures {
            fps,
            total_frames: info.total_frames,
            duration_s: info.duration_secs,
            ..VideoFeatures::default()
        };

        let mut failed = 0usize;
        for frame in (0..info.total_frames).step_by(stride as usize) {
            let timestamp = frame as f64 / fps;
            match self.providers.facial.sample(&self.video, timestamp).await {
                Ok(Some(face)) => {
                    features.face_samples.insert(frame, face);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Face sample at {:.2}s failed: {}", timestamp, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            features.error = Some(format!("{failed} face samples failed"));
        }

        info!(
            "Sampled {} face frames (every {} of {}, {} failed)",
            features.face_samples.len(),
            stride,
            info.total_frames,
            failed
        );
        features
    }

    async fn segments(self) -> Vec<RawSegment> {
        info!(
            "Transcribing with {}",
            self.providers.transcriber.name()
        );
        match self
            .providers
            .transcriber
            .transcribe_and_segment(&self.audio)
            .await
        {
            Ok(segments) => {
                info!("Transcription produced {} segments", segments.len());
                normalize_segments(segments)
            }
            Err(e) => {
                warn!("Transcription failed: {}, falling back to VAD", e);
                self.fallback_segments().await
            }
        }
    }

    /// Pseudo-segments from speech intervals, or one segment over the whole source.
    async fn fallback_segments(&self) -> Vec<RawSegment> {
        let Some(ref detector) = self.providers.pauses else {
            let duration_ms = (self.duration().await * 1000.0) as u64;
            return vec![RawSegment::new(
                "audio could not be transcribed",
                0,
                duration_ms,
                SegmentSource::Fallback,
            )];
        };

        match detector.detect_pauses(&self.audio).await {
            Ok(report) => {
                info!(
                    "Using {} speech intervals as segments",
                    report.speech.len()
                );
                report
                    .speech
                    .iter()
                    .enumerate()
                    .map(|(i, interval)| {
                        RawSegment::new(
                            format!("speech segment {}", i + 1),
                            (interval.start_s * 1000.0) as u64,
                            (interval.end_s * 1000.0) as u64,
                            SegmentSource::VadFallback,
                        )
                    })
                    .collect()
            }
            Err(e) => {
                error!("VAD fallback segmentation failed: {}", e);
                let duration_ms = (self.duration().await * 1000.0) as u64;
                vec![RawSegment::new(
                    "segmentation failed, using whole audio",
                    0,
                    duration_ms,
                    SegmentSource::UltimateFallback,
                )]
            }
        }
    }
}

/// Run `task` on the runtime once a worker slot is free.
fn spawn_on_pool<F>(pool: Arc<Semaphore>, task: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        // the pool is never closed, so the permit is always granted
        let _permit = pool.acquire_owned().await;
        task.await
    })
}

/// Run `task` inline, turning a panic into `None`.
async fn run_inline<F: Future>(task: F) -> Option<F::Output> {
    AssertUnwindSafe(task).catch_unwind().await.ok()
}

/// Runs the three precompute tasks and waits for all of them.
pub struct PrecomputeOrchestrator {
    providers: Providers,
    settings: Arc<AnalysisSettings>,
}

impl PrecomputeOrchestrator {
    pub fn new(providers: Providers, settings: AnalysisSettings) -> Self {
        Self {
            providers,
            settings: Arc::new(settings),
        }
    }

    pub async fn run(&self, video: &Path, audio: &Path) -> Precomputed {
        let start = Instant::now();
        let context = TaskContext {
            providers: self.providers.clone(),
            settings: self.settings.clone(),
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
        };

        let (audio, video, segments) = if self.settings.parallel_precompute {
            info!(
                "Precomputing in parallel with {} workers",
                self.settings.precompute_workers
            );
            let pool = Arc::new(Semaphore::new(self.settings.precompute_workers.max(1)));

            let audio_task = spawn_on_pool(pool.clone(), context.clone().audio_features());
            let video_task = spawn_on_pool(pool.clone(), context.clone().video_features());
            let asr_task = spawn_on_pool(pool, context.clone().segments());

            // barrier: nothing is consumed until the slowest task finishes
            let (audio, video, segments) = tokio::join!(audio_task, video_task, asr_task);
            (audio.ok(), video.ok(), segments.ok())
        } else {
            info!("Precomputing serially");
            let audio = run_inline(context.clone().audio_features()).await;
            let video = run_inline(context.clone().video_features()).await;
            let segments = run_inline(context.clone().segments()).await;
            (audio, video, segments)
        };

        let audio = audio.unwrap_or_else(|| {
            error!("Audio precompute task aborted");
            AudioFeatures::fallback(
                self.settings.default_duration_s,
                "audio precompute task aborted".to_string(),
            )
        });
        let video = video.unwrap_or_else(|| {
            error!("Video precompute task aborted");
            VideoFeatures {
                error: Some("video precompute task aborted".to_string()),
                ..VideoFeatures::empty(self.settings.default_fps)
            }
        });
        let segments = match segments {
            Some(segments) => segments,
            None => {
                error!("Transcription task aborted");
                context.fallback_segments().await
            }
        };

        let elapsed = start.elapsed();
        info!(
            "Precompute complete in {:.2}s: {:.2}s audio, {} face samples, {} segments",
            elapsed.as_secs_f64(),
            audio.duration_s,
            video.face_samples.len(),
            segments.len()
        );

        Precomputed {
            audio,
            video,
            segments,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Interval, PauseDetector};
    use crate::error::{MmsegError, Result};
    use crate::transcribe::SegmentTranscriber;
    use crate::video::{FacialAnalyzer, StubFacialAnalyzer};
    use async_trait::async_trait;

    struct FailingTranscriber;

    #[async_trait]
    impl SegmentTranscriber for FailingTranscriber {
        async fn transcribe_and_segment(&self, _audio: &Path) -> Result<Vec<RawSegment>> {
            Err(MmsegError::Transcription("service down".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct PanickingTranscriber;

    #[async_trait]
    impl SegmentTranscriber for PanickingTranscriber {
        async fn transcribe_and_segment(&self, _audio: &Path) -> Result<Vec<RawSegment>> {
            panic!("transcriber bug");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct FixedPauses(PauseReport);

    #[async_trait]
    impl PauseDetector for FixedPauses {
        async fn detect_pauses(&self, _audio: &Path) -> Result<PauseReport> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingPauses;

    #[async_trait]
    impl PauseDetector for FailingPauses {
        async fn detect_pauses(&self, _audio: &Path) -> Result<PauseReport> {
            Err(MmsegError::Vad("no model".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Fails to sample the frame at `fail_at_s`.
    struct GlitchyFacial {
        fail_at_s: f64,
    }

    #[async_trait]
    impl FacialAnalyzer for GlitchyFacial {
        async fn analyze(&self, _video: &Path, _start_ms: u64, _end_ms: u64) -> Result<FaceFeatures> {
            Ok(StubFacialAnalyzer::descriptor())
        }

        async fn sample(&self, _video: &Path, timestamp_s: f64) -> Result<Option<FaceFeatures>> {
            if timestamp_s == self.fail_at_s {
                return Err(MmsegError::Facial("decode glitch".to_string()));
            }
            Ok(Some(StubFacialAnalyzer::descriptor()))
        }

        fn name(&self) -> &'static str {
            "glitchy"
        }
    }

    const TASK_DELAY: Duration = Duration::from_millis(400);

    struct SlowTranscriber;

    #[async_trait]
    impl SegmentTranscriber for SlowTranscriber {
        async fn transcribe_and_segment(&self, _audio: &Path) -> Result<Vec<RawSegment>> {
            tokio::time::sleep(TASK_DELAY).await;
            Ok(vec![RawSegment::new("slow", 0, 1000, SegmentSource::AsrPunct)])
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    struct SlowPauses;

    #[async_trait]
    impl PauseDetector for SlowPauses {
        async fn detect_pauses(&self, _audio: &Path) -> Result<PauseReport> {
            tokio::time::sleep(TASK_DELAY).await;
            Ok(PauseReport {
                speech: vec![Interval::new(0.0, 1.0)],
                pauses: vec![],
            })
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn slow_providers(settings: &AnalysisSettings) -> Providers {
        Providers::stub(settings)
            .with_transcriber(Arc::new(SlowTranscriber))
            .with_pauses(Some(Arc::new(SlowPauses)))
    }

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            probe_timeout_s: 2,
            ..AnalysisSettings::default()
        }
    }

    fn missing() -> PathBuf {
        PathBuf::from("/nonexistent/mmseg/clip.wav")
    }

    fn silent_wav(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("silence.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..8000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[tokio::test]
    async fn test_stub_precompute_on_missing_media_uses_defaults() {
        let settings = settings();
        let orchestrator = PrecomputeOrchestrator::new(Providers::stub(&settings), settings);

        let pre = orchestrator.run(&missing(), &missing()).await;

        assert_eq!(pre.audio.duration_s, 30.0);
        assert!(pre.audio.vad.is_some());
        assert!(pre.video.face_samples.is_empty());
        assert_eq!(pre.video.fps, 30.0);
        assert!(pre.video.error.is_some());
        assert_eq!(pre.segments.len(), 10);
        assert!(pre
            .segments
            .iter()
            .all(|s| s.source == SegmentSource::MockAsr));
    }

    #[tokio::test]
    async fn test_transcription_failure_falls_back_to_speech_intervals() {
        let settings = settings();
        let report = PauseReport {
            speech: vec![Interval::new(0.0, 2.5), Interval::new(3.0, 6.0)],
            pauses: vec![Interval::new(2.5, 3.0)],
        };
        let providers = Providers::stub(&settings)
            .with_transcriber(Arc::new(FailingTranscriber))
            .with_pauses(Some(Arc::new(FixedPauses(report))));
        let orchestrator = PrecomputeOrchestrator::new(providers, settings);

        let pre = orchestrator.run(&missing(), &missing()).await;

        assert_eq!(pre.segments.len(), 2);
        assert_eq!(pre.segments[0].text, "speech segment 1");
        assert_eq!(pre.segments[1].start_ms, 3000);
        assert_eq!(pre.segments[1].end_ms, 6000);
        assert!(pre
            .segments
            .iter()
            .all(|s| s.source == SegmentSource::VadFallback));
    }

    #[tokio::test]
    async fn test_transcription_failure_without_vad_spans_duration() {
        let settings = settings();
        let providers = Providers::stub(&settings)
            .with_transcriber(Arc::new(FailingTranscriber))
            .with_pauses(None);
        let orchestrator = PrecomputeOrchestrator::new(providers, settings);

        let pre = orchestrator.run(&missing(), &missing()).await;

        assert!(pre.audio.vad.is_none());
        assert_eq!(pre.segments.len(), 1);
        assert_eq!(pre.segments[0].source, SegmentSource::Fallback);
        assert_eq!(pre.segments[0].end_ms, 30000);
    }

    #[tokio::test]
    async fn test_vad_failure_gives_ultimate_fallback() {
        let settings = settings();
        let providers = Providers::stub(&settings)
            .with_transcriber(Arc::new(FailingTranscriber))
            .with_pauses(Some(Arc::new(FailingPauses)));
        let orchestrator = PrecomputeOrchestrator::new(providers, settings);

        let pre = orchestrator.run(&missing(), &missing()).await;

        assert_eq!(pre.segments.len(), 1);
        assert_eq!(pre.segments[0].source, SegmentSource::UltimateFallback);
        // the audio task degrades the same failure to an empty timeline
        let vad = pre.audio.vad.as_ref().unwrap();
        assert!(vad.timeline.is_empty());
        assert!(pre.audio.error.is_some());
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let settings = settings();
        let providers = Providers::stub(&settings)
            .with_transcriber(Arc::new(PanickingTranscriber))
            .with_pauses(None);
        let orchestrator = PrecomputeOrchestrator::new(providers, settings);

        let pre = orchestrator.run(&missing(), &missing()).await;

        assert_eq!(pre.audio.duration_s, 30.0);
        assert_eq!(pre.segments.len(), 1);
        assert_eq!(pre.segments[0].source, SegmentSource::Fallback);
    }

    #[tokio::test]
    async fn test_serial_mode_matches_parallel() {
        let parallel = settings();
        let serial = AnalysisSettings {
            parallel_precompute: false,
            ..settings()
        };

        let a = PrecomputeOrchestrator::new(Providers::stub(&parallel), parallel)
            .run(&missing(), &missing())
            .await;
        let b = PrecomputeOrchestrator::new(Providers::stub(&serial), serial)
            .run(&missing(), &missing())
            .await;

        assert_eq!(a.segments, b.segments);
        assert_eq!(a.audio.duration_s, b.audio.duration_s);
        assert_eq!(a.audio.timeline(), b.audio.timeline());
    }

    #[tokio::test]
    async fn test_failed_face_sample_keeps_the_rest() {
        let settings = settings();
        let context = TaskContext {
            providers: Providers::stub(&settings)
                .with_facial(Arc::new(GlitchyFacial { fail_at_s: 2.0 })),
            settings: Arc::new(settings),
            video: missing(),
            audio: missing(),
        };
        let info = VideoInfo {
            fps: 1.0,
            total_frames: 5,
            duration_secs: 5.0,
        };

        let video = context.sample_faces(&info).await;

        assert_eq!(video.fps, 1.0);
        assert_eq!(video.total_frames, 5);
        assert_eq!(
            video.face_samples.keys().copied().collect::<Vec<_>>(),
            vec![0, 1, 3, 4]
        );
        assert_eq!(video.error.as_deref(), Some("1 face samples failed"));
    }

    #[tokio::test]
    async fn test_sampling_stride_follows_interval() {
        let settings = AnalysisSettings {
            video_sample_interval_s: 0.5,
            ..settings()
        };
        let context = TaskContext {
            providers: Providers::stub(&settings),
            settings: Arc::new(settings),
            video: missing(),
            audio: missing(),
        };
        let info = VideoInfo {
            fps: 25.0,
            total_frames: 60,
            duration_secs: 2.4,
        };

        let video = context.sample_faces(&info).await;

        assert_eq!(
            video.face_samples.keys().copied().collect::<Vec<_>>(),
            vec![0, 12, 24, 36, 48]
        );
        assert!(video.error.is_none());
    }

    #[tokio::test]
    async fn test_tasks_overlap_and_barrier_waits_for_slowest() {
        let dir = tempfile::tempdir().unwrap();
        let audio = silent_wav(&dir);
        let settings = settings();
        let orchestrator = PrecomputeOrchestrator::new(slow_providers(&settings), settings);

        let started = Instant::now();
        let pre = orchestrator.run(&missing(), &audio).await;
        let elapsed = started.elapsed();

        // both slow tasks finished before the barrier released
        assert_eq!(pre.segments[0].text, "slow");
        assert_eq!(pre.audio.vad.as_ref().unwrap().report.speech.len(), 1);
        assert!(elapsed >= TASK_DELAY, "elapsed {elapsed:?}");
        assert!(elapsed < TASK_DELAY * 2 - Duration::from_millis(50), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_single_worker_runs_tasks_one_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let audio = silent_wav(&dir);
        let settings = AnalysisSettings {
            precompute_workers: 1,
            ..settings()
        };
        let orchestrator = PrecomputeOrchestrator::new(slow_providers(&settings), settings);

        let started = Instant::now();
        let pre = orchestrator.run(&missing(), &audio).await;

        assert!(started.elapsed() >= TASK_DELAY * 2);
        assert_eq!(pre.segments.len(), 1);
    }

    #[test]
    fn test_frame_at() {
        let video = VideoFeatures::empty(25.0);
        assert_eq!(video.frame_at(0.0), 0);
        assert_eq!(video.frame_at(2.0), 50);
        assert_eq!(video.frame_at(-1.0), 0);
    }
}
