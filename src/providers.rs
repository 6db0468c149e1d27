use std::sync::Arc;

use tracing::info;

use crate::audio::{
    EnergyPauseDetector, PauseDetector, ProsodyAnalyzer, StubPauseDetector, StubProsodyAnalyzer,
    WavProsodyAnalyzer,
};
use crate::config::{AnalysisSettings, Backend, Config};
use crate::error::{MmsegError, Result};
use crate::events::{EnergyEventDetector, EventDetector, StubEventDetector};
use crate::transcribe::{SegmentTranscriber, StubTranscriber, WhisperClient};
use crate::video::{CommandFacialAnalyzer, FacialAnalyzer, StubFacialAnalyzer};

/// The external capabilities one analysis run calls out to.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn SegmentTranscriber>,
    /// `None` when voice-activity detection is disabled.
    pub pauses: Option<Arc<dyn PauseDetector>>,
    pub prosody: Arc<dyn ProsodyAnalyzer>,
    pub facial: Arc<dyn FacialAnalyzer>,
    pub events: Arc<dyn EventDetector>,
}

impl Providers {
    /// Build the backend selected for each capability.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = &config.analysis;
        let selection = &config.providers;

        let transcriber: Arc<dyn SegmentTranscriber> = match selection.asr {
            Backend::Native => {
                let api_key = config.openai_api_key.as_ref().ok_or_else(|| {
                    MmsegError::Config(
                        "OpenAI API key not set. Set OPENAI_API_KEY environment variable."
                            .to_string(),
                    )
                })?;
                let mut client = WhisperClient::new(api_key.clone());
                if let Some(ref language) = config.language {
                    client = client.with_language(language.clone());
                }
                Arc::new(client)
            }
            Backend::Stub => Arc::new(StubTranscriber::new(
                settings.probe_timeout(),
                settings.default_duration_s,
            )),
        };

        let pauses: Option<Arc<dyn PauseDetector>> = match (selection.enable_vad, selection.vad) {
            (false, _) => None,
            (true, Backend::Native) => Some(Arc::new(EnergyPauseDetector::default())),
            (true, Backend::Stub) => Some(Arc::new(StubPauseDetector::new(
                settings.probe_timeout(),
                settings.default_duration_s,
            ))),
        };

        let prosody: Arc<dyn ProsodyAnalyzer> = match selection.prosody {
            Backend::Native => Arc::new(WavProsodyAnalyzer),
            Backend::Stub => Arc::new(StubProsodyAnalyzer),
        };

        let facial: Arc<dyn FacialAnalyzer> = match selection.facial {
            Backend::Native => {
                let command = config.face_command.as_deref().ok_or_else(|| {
                    MmsegError::Config(
                        "Facial tool not set. Set MMSEG_FACE_COMMAND environment variable."
                            .to_string(),
                    )
                })?;
                Arc::new(CommandFacialAnalyzer::new(command, settings.extraction_timeout())?)
            }
            Backend::Stub => Arc::new(StubFacialAnalyzer),
        };

        let events: Arc<dyn EventDetector> = match selection.events {
            Backend::Native => Arc::new(EnergyEventDetector::default()),
            Backend::Stub => Arc::new(StubEventDetector::new()),
        };

        let providers = Self {
            transcriber,
            pauses,
            prosody,
            facial,
            events,
        };
        info!("Providers: {}", providers.describe());
        Ok(providers)
    }

    /// Deterministic stubs for every capability.
    pub fn stub(settings: &AnalysisSettings) -> Self {
        Self {
            transcriber: Arc::new(StubTranscriber::new(
                settings.probe_timeout(),
                settings.default_duration_s,
            )),
            pauses: Some(Arc::new(StubPauseDetector::new(
                settings.probe_timeout(),
                settings.default_duration_s,
            ))),
            prosody: Arc::new(StubProsodyAnalyzer),
            facial: Arc::new(StubFacialAnalyzer),
            events: Arc::new(StubEventDetector::new()),
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn SegmentTranscriber>) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn with_pauses(mut self, pauses: Option<Arc<dyn PauseDetector>>) -> Self {
        self.pauses = pauses;
        self
    }

    pub fn with_prosody(mut self, prosody: Arc<dyn ProsodyAnalyzer>) -> Self {
        self.prosody = prosody;
        self
    }

    pub fn with_facial(mut self, facial: Arc<dyn FacialAnalyzer>) -> Self {
        self.facial = facial;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventDetector>) -> Self {
        self.events = events;
        self
    }

    /// One-line `capability=backend` listing for logs.
    pub fn describe(&self) -> String {
        format!(
            "asr={} vad={} prosody={} facial={} events={}",
            self.transcriber.name(),
            self.pauses.as_ref().map_or("disabled", |p| p.name()),
            self.prosody.name(),
            self.facial.name(),
            self.events.name()
        )
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("backends", &self.describe())
            .finish()
    }
}
