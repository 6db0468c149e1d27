use thiserror::Error;

#[derive(Error, Debug)]
pub enum MmsegError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Audio extraction failed: {0}")]
    AudioExtraction(String),

    #[error("Media probe failed: {0}")]
    Probe(String),

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Voice activity detection failed: {0}")]
    Vad(String),

    #[error("Prosody analysis failed: {0}")]
    Prosody(String),

    #[error("Facial analysis failed: {0}")]
    Facial(String),

    #[error("Event detection failed: {0}")]
    EventDetection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, MmsegError>;
