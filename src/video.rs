//! Facial feature capability.
//!
//! `analyze` produces the full per-window `[mean, std]` bundle used by the
//! full-compute path; `sample` produces the coarse single-frame descriptor used
//! when precomputing the sparse face map (`None` means no face in that frame).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MmsegError, Result};
use crate::features::{conform_face, FaceFeatures};

#[async_trait]
pub trait FacialAnalyzer: Send + Sync {
    async fn analyze(&self, video: &Path, start_ms: u64, end_ms: u64) -> Result<FaceFeatures>;
    async fn sample(&self, video: &Path, timestamp_s: f64) -> Result<Option<FaceFeatures>>;
    fn name(&self) -> &'static str;
}

/// Runs an external facial tool that prints JSON feature maps.
///
/// Invoked as `<program> [args..] analyze <video> <start_ms> <end_ms>` and
/// `<program> [args..] sample <video> <timestamp_s>`. The sample mode prints
/// `null` when no face is found.
#[derive(Debug, Clone)]
pub struct CommandFacialAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandFacialAnalyzer {
    /// Build from a command line such as `"python3 face_tool.py"`.
    pub fn new(command_line: &str, timeout: Duration) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| MmsegError::Config("Empty facial analysis command".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }

    async fn invoke(&self, mode_args: &[String]) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(mode_args).kill_on_drop(true);

        debug!("Running facial tool: {} {:?}", self.program, mode_args);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output
                .map_err(|e| MmsegError::Facial(format!("Failed to run {}: {e}", self.program)))?,
            Err(_) => {
                warn!(
                    "Facial tool timed out after {}s",
                    self.timeout.as_secs()
                );
                return Err(MmsegError::Timeout {
                    tool: self.program.clone(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MmsegError::Facial(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl FacialAnalyzer for CommandFacialAnalyzer {
    async fn analyze(&self, video: &Path, start_ms: u64, end_ms: u64) -> Result<FaceFeatures> {
        let stdout = self
            .invoke(&[
                "analyze".to_string(),
                video.display().to_string(),
                start_ms.to_string(),
                end_ms.to_string(),
            ])
            .await?;

        let features: FaceFeatures = serde_json::from_str(stdout.trim())?;
        Ok(conform_face(features))
    }

    async fn sample(&self, video: &Path, timestamp_s: f64) -> Result<Option<FaceFeatures>> {
        let stdout = self
            .invoke(&[
                "sample".to_string(),
                video.display().to_string(),
                format!("{:.3}", timestamp_s),
            ])
            .await?;

        let features: Option<FaceFeatures> = serde_json::from_str(stdout.trim())?;
        Ok(features.map(conform_face))
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Fixed plausible descriptors for a single centred face.
#[derive(Debug, Clone, Default)]
pub struct StubFacialAnalyzer;

impl StubFacialAnalyzer {
    pub fn descriptor() -> FaceFeatures {
        [
            ("Smile", [0.5, 0.1]),
            ("Mouth", [0.3, 0.1]),
            ("EAR", [0.25, 0.05]),
            ("Brow", [0.1, 0.02]),
            ("Yaw", [0.0, 2.0]),
            ("Pitch", [0.0, 2.0]),
            ("Roll", [0.0, 1.0]),
            ("FaceSize", [0.2, 0.05]),
        ]
        .into_iter()
        .map(|(name, pair)| (name.to_string(), pair))
        .collect()
    }
}

#[async_trait]
impl FacialAnalyzer for StubFacialAnalyzer {
    async fn analyze(&self, _video: &Path, start_ms: u64, end_ms: u64) -> Result<FaceFeatures> {
        debug!("Stub facial analysis {}-{}ms", start_ms, end_ms);
        Ok(Self::descriptor())
    }

    async fn sample(&self, _video: &Path, _timestamp_s: f64) -> Result<Option<FaceFeatures>> {
        Ok(Some(Self::descriptor()))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FACE_FEATURES;

    #[test]
    fn test_stub_descriptor_covers_vocabulary() {
        let face = StubFacialAnalyzer::descriptor();
        for name in FACE_FEATURES {
            assert!(face.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn test_command_parsing() {
        let analyzer =
            CommandFacialAnalyzer::new("python3 tools/face.py --fast", Duration::from_secs(5))
                .unwrap();
        assert_eq!(analyzer.program, "python3");
        assert_eq!(analyzer.args, vec!["tools/face.py", "--fast"]);
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandFacialAnalyzer::new("   ", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_missing_program_is_facial_error() {
        let analyzer =
            CommandFacialAnalyzer::new("/nonexistent/face-tool", Duration::from_secs(5)).unwrap();
        let result = analyzer.analyze(Path::new("/tmp/v.mp4"), 0, 1000).await;
        assert!(matches!(result, Err(MmsegError::Facial(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_is_parsed_and_conformed() {
        // whitespace splitting cannot express quoting, so build the argv directly
        let analyzer = CommandFacialAnalyzer {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"echo '{"Smile":[0.9,0.1],"Unknown":[1,1]}'"#.to_string(),
                "--".to_string(),
            ],
            timeout: Duration::from_secs(5),
        };

        let face = analyzer
            .analyze(Path::new("/tmp/v.mp4"), 0, 1000)
            .await
            .unwrap();
        assert_eq!(face["Smile"], [0.9, 0.1]);
        assert_eq!(face["Yaw"], [0.0, 0.0]);
        assert!(!face.contains_key("Unknown"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let analyzer = CommandFacialAnalyzer {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string(), "--".to_string()],
            timeout: Duration::from_secs(1),
        };

        let started = std::time::Instant::now();
        let result = analyzer.analyze(Path::new("/tmp/v.mp4"), 0, 1000).await;

        match result {
            Err(MmsegError::Timeout { tool, secs }) => {
                assert_eq!(tool, "sh");
                assert_eq!(secs, 1);
            }
            other => panic!("Expected Timeout error, got: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
