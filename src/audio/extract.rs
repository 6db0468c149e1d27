use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MmsegError, Result};

/// Stream parameters of a video file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub total_frames: u64,
    pub duration_secs: f64,
}

/// Run an external tool, killing it if it outlives `limit`.
async fn run_tool(tool: &str, command: &mut Command, limit: Duration) -> Result<Output> {
    command.kill_on_drop(true);

    match tokio::time::timeout(limit, command.output()).await {
        Ok(output) => output.map_err(|e| match tool {
            "ffmpeg" => MmsegError::AudioExtraction(format!("Failed to run FFmpeg: {e}")),
            _ => MmsegError::Probe(format!("Failed to run {tool}: {e}")),
        }),
        Err(_) => {
            warn!("{} timed out after {}s", tool, limit.as_secs());
            Err(MmsegError::Timeout {
                tool: tool.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}

/// Sibling path the extracted audio is written to: `<stem>_extracted.wav`.
pub fn derive_audio_path(video: &Path) -> PathBuf {
    let stem = video.file_stem().unwrap_or_default();
    let mut output = video.to_path_buf();
    output.set_file_name(format!("{}_extracted.wav", stem.to_string_lossy()));
    output
}

/// Extract mono 16-bit PCM at 16kHz from a media container.
pub async fn extract_audio(input: &Path, output: &Path, limit: Duration) -> Result<()> {
    if !input.exists() {
        return Err(MmsegError::FileNotFound(input.display().to_string()));
    }

    info!("Extracting audio from {}", input.display());

    let mut command = Command::new("ffmpeg");
    command
        .arg("-i")
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y"])
        .arg(output);

    let result = run_tool("ffmpeg", &mut command, limit).await?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(MmsegError::AudioExtraction(format!(
            "FFmpeg exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }

    if !output.exists() {
        return Err(MmsegError::AudioExtraction(
            "Output file was not created".to_string(),
        ));
    }

    info!("Audio extracted to {}", output.display());
    Ok(())
}

/// Pick the audio source for a media file.
///
/// An explicit path wins; otherwise an existing `<stem>_extracted.wav` is reused
/// or created. If extraction fails the media file itself is analysed.
pub async fn resolve_audio(video: &Path, audio: Option<&Path>, limit: Duration) -> PathBuf {
    if let Some(audio) = audio {
        return audio.to_path_buf();
    }

    let target = derive_audio_path(video);
    if target.exists() {
        info!("Reusing extracted audio: {}", target.display());
        return target;
    }

    match extract_audio(video, &target, limit).await {
        Ok(()) => target,
        Err(e) => {
            warn!("Audio extraction failed ({}), analysing media file directly", e);
            video.to_path_buf()
        }
    }
}

/// Get media duration using FFprobe.
pub async fn probe_duration_ffprobe(input: &Path, limit: Duration) -> Result<f64> {
    let mut command = Command::new("ffprobe");
    command
        .arg("-i")
        .arg(input)
        .args([
            "-show_entries",
            "format=duration",
            "-v",
            "quiet",
            "-of",
            "csv=p=0",
        ]);

    let output = run_tool("ffprobe", &mut command, limit).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MmsegError::Probe(format!("FFprobe failed: {stderr}")));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    duration_str.trim().parse().map_err(|e| {
        MmsegError::Probe(format!(
            "Failed to parse duration '{}': {e}",
            duration_str.trim()
        ))
    })
}

/// Duration of an audio source: WAV signal length, then FFprobe, then `default`.
pub async fn probe_duration(audio: &Path, limit: Duration, default: f64) -> f64 {
    // header only; the samples are never decoded here
    match hound::WavReader::open(audio) {
        Ok(reader) if reader.spec().sample_rate > 0 => {
            return reader.duration() as f64 / reader.spec().sample_rate as f64;
        }
        Ok(_) => debug!("WAV reports zero sample rate, probing instead"),
        Err(e) => debug!("Could not read {} as WAV: {}", audio.display(), e),
    }

    match probe_duration_ffprobe(audio, limit).await {
        Ok(duration) => duration,
        Err(e) => {
            warn!("Duration probe failed ({}), assuming {:.1}s", e, default);
            default
        }
    }
}

/// Parse an FFprobe rational like `30000/1001`.
fn parse_rate(value: &str) -> Option<f64> {
    let value = value.trim();
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => value.parse().ok(),
    }
}

/// Frame rate, frame count and duration of the first video stream.
pub async fn probe_video(input: &Path, limit: Duration) -> Result<VideoInfo> {
    let mut command = Command::new("ffprobe");
    command
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate,nb_frames,duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(input);

    let output = run_tool("ffprobe", &mut command, limit).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MmsegError::Probe(format!("FFprobe failed: {stderr}")));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_video_info(&text)
}

fn parse_video_info(text: &str) -> Result<VideoInfo> {
    let mut fps = None;
    let mut frames = None;
    let mut duration = None;

    for line in text.lines() {
        match line.trim().split_once('=') {
            Some(("r_frame_rate", v)) => fps = parse_rate(v),
            Some(("nb_frames", v)) => frames = v.trim().parse::<u64>().ok(),
            Some(("duration", v)) => duration = v.trim().parse::<f64>().ok(),
            _ => {}
        }
    }

    let fps = fps
        .filter(|f| *f > 0.0)
        .ok_or_else(|| MmsegError::Probe(format!("No video frame rate in: {}", text.trim())))?;

    let total_frames = match (frames, duration) {
        (Some(n), _) => n,
        (None, Some(d)) => (d * fps).floor() as u64,
        (None, None) => 0,
    };
    let duration_secs = duration.unwrap_or(total_frames as f64 / fps);

    Ok(VideoInfo {
        fps,
        total_frames,
        duration_secs,
    })
}
