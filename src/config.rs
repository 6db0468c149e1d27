use crate::error::{MmsegError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which implementation backs an external capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Native,
    Stub,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Native => write!(f, "native"),
            Backend::Stub => write!(f, "stub"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(Backend::Native),
            "stub" | "mock" => Ok(Backend::Stub),
            _ => Err(format!("Unknown backend: {}. Use 'native' or 'stub'", s)),
        }
    }
}

/// Backend selection for every capability the analyzer calls out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSelection {
    pub asr: Backend,
    pub vad: Backend,
    pub prosody: Backend,
    pub facial: Backend,
    pub events: Backend,
    /// When false no voice-activity provider is wired at all.
    pub enable_vad: bool,
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self {
            asr: Backend::Stub,
            vad: Backend::Native,
            prosody: Backend::Native,
            facial: Backend::Stub,
            events: Backend::Native,
            enable_vad: true,
        }
    }
}

impl ProviderSelection {
    /// Every capability backed by its deterministic stub.
    pub fn all_stub() -> Self {
        Self {
            asr: Backend::Stub,
            vad: Backend::Stub,
            prosody: Backend::Stub,
            facial: Backend::Stub,
            events: Backend::Stub,
            enable_vad: true,
        }
    }
}

/// Tunables for segmentation, triggering and caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Segments longer than this are considered for VAD splitting.
    pub max_segment_s: f64,
    /// Segments with more characters than this are considered for splitting.
    pub max_chars: usize,
    /// Shortest sub-segment a split may produce.
    pub min_split_s: f64,
    /// Bucket width of the VAD timeline.
    pub vad_timeline_step_s: f64,
    /// Length of each prosody array.
    pub prosody_points: usize,
    /// Maximum distance for a cache hit.
    pub cache_validity_s: f64,
    /// Entries older than `reference - cache_max_age_s` are evicted.
    pub cache_max_age_s: f64,
    /// Without events, recompute once this much time separates a window from the last full compute.
    pub min_recompute_interval_s: f64,
    /// Stride of the coarse face sampling.
    pub video_sample_interval_s: f64,
    pub default_duration_s: f64,
    pub default_fps: f64,
    pub extraction_timeout_s: u64,
    pub probe_timeout_s: u64,
    pub precompute_workers: usize,
    pub parallel_precompute: bool,
    pub segmentation_mode: String,
    pub schema_version: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_segment_s: 12.0,
            max_chars: 30,
            min_split_s: 1.0,
            vad_timeline_step_s: 0.5,
            prosody_points: 15,
            cache_validity_s: 2.0,
            cache_max_age_s: 300.0,
            min_recompute_interval_s: 2.0,
            video_sample_interval_s: 1.0,
            default_duration_s: 30.0,
            default_fps: 30.0,
            extraction_timeout_s: 60,
            probe_timeout_s: 10,
            precompute_workers: 3,
            parallel_precompute: true,
            segmentation_mode: "ASR_PUNCT_FIRST".to_string(),
            schema_version: "1.2.0".to_string(),
        }
    }
}

impl AnalysisSettings {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_s)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub language: Option<String>,
    /// External facial landmark tool used by the native facial backend.
    pub face_command: Option<String>,
    pub providers: ProviderSelection,
    pub analysis: AnalysisSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            language: None,
            face_command: None,
            providers: ProviderSelection::default(),
            analysis: AnalysisSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    MmsegError::Config(format!("{}: {e}", config_path.display()))
                })?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Ok(language) = std::env::var("MMSEG_LANGUAGE") {
            self.language = Some(language);
        }
        if let Ok(command) = std::env::var("MMSEG_FACE_COMMAND") {
            self.face_command = Some(command);
        }

        let overrides: [(&str, &mut Backend); 5] = [
            ("MMSEG_ASR", &mut self.providers.asr),
            ("MMSEG_VAD", &mut self.providers.vad),
            ("MMSEG_PROSODY", &mut self.providers.prosody),
            ("MMSEG_FACIAL", &mut self.providers.facial),
            ("MMSEG_EVENTS", &mut self.providers.events),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = std::env::var(var) {
                if let Ok(backend) = value.parse() {
                    *slot = backend;
                }
            }
        }

        if let Ok(workers) = std::env::var("MMSEG_PRECOMPUTE_WORKERS") {
            if let Ok(w) = workers.parse() {
                self.analysis.precompute_workers = w;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.providers.asr == Backend::Native && self.openai_api_key.is_none() {
            return Err(MmsegError::Config(
                "OPENAI_API_KEY not set. Export it or set MMSEG_ASR=stub".to_string(),
            ));
        }

        if self.providers.facial == Backend::Native && self.face_command.is_none() {
            return Err(MmsegError::Config(
                "MMSEG_FACE_COMMAND not set. Point it at a facial analysis tool or set MMSEG_FACIAL=stub"
                    .to_string(),
            ));
        }

        let analysis = &self.analysis;
        if analysis.precompute_workers == 0 {
            return Err(MmsegError::Config(
                "precompute_workers must be greater than 0".to_string(),
            ));
        }
        if analysis.prosody_points == 0 {
            return Err(MmsegError::Config(
                "prosody_points must be greater than 0".to_string(),
            ));
        }
        if analysis.vad_timeline_step_s <= 0.0 || analysis.video_sample_interval_s <= 0.0 {
            return Err(MmsegError::Config(
                "Timeline step and video sample interval must be positive".to_string(),
            ));
        }
        if analysis.cache_validity_s <= 0.0 || analysis.cache_max_age_s < 0.0 {
            return Err(MmsegError::Config(
                "Cache validity must be positive and max age non-negative".to_string(),
            ));
        }

        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mmseg").join("config.toml"))
    }
}
