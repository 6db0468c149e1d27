use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;

use console::style;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use crate::audio::resolve_audio;
use crate::cache::FeatureCache;
use crate::config::{AnalysisSettings, Config};
use crate::error::{MmsegError, Result};
use crate::precompute::{Precomputed, PrecomputeOrchestrator};
use crate::processor::{SegmentProcessor, SourceContext};
use crate::providers::Providers;
use crate::report::{AnalysisReport, CacheStats, RunStatus, SegmentResult, Summary};
use crate::segment::SegmentSplitter;
use crate::transcribe::RawSegment;

/// A media file with its resolved audio track.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub duration_s: f64,
}

/// Runs the whole analysis for one media file at a time.
///
/// The feature cache lives as long as the analyzer, so snapshots from one run
/// stay available (until evicted) to the next.
pub struct Analyzer {
    providers: Providers,
    settings: AnalysisSettings,
    cache: FeatureCache,
    show_progress: bool,
}

impl Analyzer {
    pub fn new(providers: Providers, settings: AnalysisSettings) -> Self {
        Self {
            cache: FeatureCache::new(settings.cache_validity_s),
            providers,
            settings,
            show_progress: false,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Providers::from_config(config)?,
            config.analysis.clone(),
        ))
    }

    /// Show a progress bar over sub-segment processing.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FeatureCache {
        &mut self.cache
    }

    /// Analyse `media`, never failing: errors become a degraded report.
    pub async fn analyze(&mut self, media: &Path, audio: Option<&Path>) -> AnalysisReport {
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.try_analyze(media, audio))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                error!("Analysis failed: {}", e);
                AnalysisReport::failed(e.to_string(), start.elapsed())
            }
            Err(_) => {
                error!("Analysis aborted by a panic");
                AnalysisReport::failed("analysis aborted unexpectedly", start.elapsed())
            }
        }
    }

    /// Analyse `media`, returning fatal input errors to the caller.
    pub async fn try_analyze(
        &mut self,
        media: &Path,
        audio: Option<&Path>,
    ) -> Result<AnalysisReport> {
        let start = Instant::now();

        if !media.exists() {
            return Err(MmsegError::FileNotFound(media.display().to_string()));
        }

        info!("Analysing {} ({})", media.display(), self.providers.describe());

        let audio = resolve_audio(media, audio, self.settings.extraction_timeout()).await;

        info!("Stage 1/3: Precomputing features");
        let pre = PrecomputeOrchestrator::new(self.providers.clone(), self.settings.clone())
            .run(media, &audio)
            .await;

        let source = MediaSource {
            video: media.to_path_buf(),
            audio,
            duration_s: pre.audio.duration_s,
        };

        info!("Stage 2/3: Splitting {} segments", pre.segments.len());
        let splitter = SegmentSplitter::from_settings(&self.settings);
        let sub_segments: Vec<RawSegment> = pre
            .segments
            .iter()
            .flat_map(|segment| splitter.split(segment, pre.audio.timeline()))
            .collect();

        info!("Stage 3/3: Processing {} sub-segments", sub_segments.len());
        let results = self.process_all(&sub_segments, &source, &pre).await;

        // sub-segments tile their parents, so this is also the max over raw segments
        let reference = sub_segments
            .iter()
            .map(RawSegment::end_s)
            .reduce(f64::max)
            .unwrap_or(source.duration_s);
        let evicted = self
            .cache
            .cleanup(reference, self.settings.cache_max_age_s);

        let cache_stats = CacheStats {
            audio_entries: self.cache.audio_len(),
            video_entries: self.cache.video_len(),
            audio_evicted: evicted.audio,
            video_evicted: evicted.video,
        };

        let summary = Summary::completed(
            &results,
            source.duration_s,
            &self.settings.segmentation_mode,
            cache_stats,
            pre.elapsed,
            start.elapsed(),
        );

        info!(
            "Analysis complete: {} segments in {:.2}s ({})",
            summary.segment_count,
            summary.performance.total_time_s,
            summary
                .performance
                .speedup_ratio
                .as_deref()
                .unwrap_or("n/a")
        );

        Ok(AnalysisReport {
            segments: results,
            summary,
        })
    }

    async fn process_all(
        &mut self,
        sub_segments: &[RawSegment],
        source: &MediaSource,
        pre: &Precomputed,
    ) -> Vec<SegmentResult> {
        let context = SourceContext {
            video: &source.video,
            audio: &source.audio,
            audio_features: &pre.audio,
            video_features: &pre.video,
        };

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(sub_segments.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut processor = SegmentProcessor::new(&self.providers, &self.settings);
        let mut results = Vec::with_capacity(sub_segments.len());

        for sub in sub_segments {
            results.push(processor.process(sub, context, &mut self.cache).await);
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Segments analysed");
        }

        results
    }
}

/// Print a human-readable summary of a report.
pub fn print_summary(report: &AnalysisReport, output: &Path) {
    let summary = &report.summary;
    let performance = &summary.performance;

    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                     Multimodal Analysis Report                 ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();

    let status = match performance.status {
        RunStatus::Completed => style("completed").green(),
        RunStatus::Failed => style("failed").red(),
    };
    println!("  Status:     {}", status);
    if let Some(ref error) = summary.error {
        println!("  Error:      {}", error);
    }
    println!("  Output:     {}", output.display());
    println!("  Duration:   {:.2}s source", summary.total_duration);
    println!("  Segments:   {}", summary.segment_count);

    if !summary.source_counts.is_empty() {
        println!();
        println!("  Sources:");
        for (source, count) in &summary.source_counts {
            println!("    {:<18} {}", source, count);
        }
    }

    if !summary.analysis_modes.is_empty() {
        println!();
        println!("  Analysis modes:");
        for (mode, count) in &summary.analysis_modes {
            println!("    {:<22} {}", mode, count);
        }
    }

    if let Some(cache) = summary.cache {
        println!();
        println!(
            "  Cache:      {} sound / {} face entries ({} / {} evicted)",
            cache.audio_entries, cache.video_entries, cache.audio_evicted, cache.video_evicted
        );
    }

    println!();
    println!("  Timing:");
    if let Some(precompute) = performance.precompute_time_s {
        println!("    Precompute:  {:.2}s", precompute);
    }
    if let Some(processing) = performance.processing_time_s {
        println!("    Processing:  {:.2}s", processing);
    }
    println!("    Total:       {:.2}s", performance.total_time_s);
    if let Some(ref ratio) = performance.speedup_ratio {
        println!("    Speed:       {}", style(ratio).cyan());
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}
