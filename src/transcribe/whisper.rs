use crate::error::{MmsegError, Result};
use crate::transcribe::{RawSegment, SegmentSource, SegmentTranscriber};
use async_trait::async_trait;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const WHISPER_API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Upload limit of the hosted endpoint.
const MAX_FILE_SIZE: usize = 25 * 1024 * 1024;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;

/// Sentence-final and clause punctuation, ASCII and CJK.
const PUNCTUATION: &str = ".!?;。！？；";

fn sentence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[^.!?;。！？；]+[.!?;。！？；]*").expect("sentence pattern is valid")
    })
}

/// Speech-to-text over the hosted Whisper endpoint, segmented at sentence punctuation.
pub struct WhisperClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
    language: Option<String>,
}

/// A failed request, and whether sending it again could help.
struct RequestFailure {
    error: MmsegError,
    retryable: bool,
}

impl From<MmsegError> for RequestFailure {
    fn from(error: MmsegError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }
}

impl WhisperClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            api_url: WHISPER_API_URL.to_string(),
            model: "whisper-1".to_string(),
            language: None,
        }
    }

    /// Point the client at a different endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Hint the spoken language (ISO 639-1).
    pub fn with_language(mut self, language: String) -> Self {
        self.language = Some(language);
        self
    }

    /// Multipart body asking for segment-level timestamps.
    async fn upload_form(&self, audio: &Path) -> Result<Form> {
        let bytes = fs::read(audio).await?;
        let name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let mut form = Form::new()
            .part("file", Part::bytes(bytes).file_name(name).mime_str("audio/wav")?)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }

        Ok(form)
    }

    async fn send(&self, form: Form) -> std::result::Result<WhisperResponse, RequestFailure> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RequestFailure::from(MmsegError::from(e)))?;

        let status = response.status();
        debug!("Transcription endpoint answered {}", status);

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| RequestFailure::from(MmsegError::from(e)))?;
            return serde_json::from_str(&body)
                .map_err(|e| RequestFailure::from(MmsegError::from(e)));
        }

        let body = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(parsed) => format!("{} ({})", parsed.error.message, parsed.error.r#type),
            Err(_) => body,
        };

        Err(RequestFailure {
            error: MmsegError::Api(format!(
                "Whisper API error ({}): {}",
                status.as_u16(),
                detail
            )),
            retryable: !status.is_client_error(),
        })
    }

    /// Up to `MAX_RETRIES` attempts with doubling delays; client errors end it early.
    async fn request(&self, audio: &Path) -> Result<WhisperResponse> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_millis(BASE_DELAY_MS << (attempt - 1));
                debug!("Waiting {:?} before attempt {}", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            // the form is consumed by each send
            let form = self.upload_form(audio).await?;

            match self.send(form).await {
                Ok(response) => return Ok(response),
                Err(failure) if !failure.retryable => return Err(failure.error),
                Err(failure) => {
                    warn!("Transcription attempt {} failed: {}", attempt + 1, failure.error);
                    last_error = Some(failure.error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MmsegError::Api("no attempts made".to_string())))
    }

    /// Sentence-level raw segments from the response.
    fn parse_response(&self, response: WhisperResponse) -> Vec<RawSegment> {
        match response.segments {
            Some(segments) => segments
                .iter()
                .flat_map(|seg| split_at_punctuation(&seg.text, seg.start, seg.end))
                .collect(),
            None => split_at_punctuation(&response.text, 0.0, response.duration),
        }
    }
}

/// Split `text` at punctuation, sharing `[start_s, end_s]` by character count.
pub fn split_at_punctuation(text: &str, start_s: f64, end_s: f64) -> Vec<RawSegment> {
    let pieces: Vec<&str> = sentence_pattern()
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|p| p.chars().any(|c| !PUNCTUATION.contains(c)))
        .collect();

    let total_chars: usize = pieces.iter().map(|p| p.chars().count()).sum();
    if total_chars == 0 {
        return Vec::new();
    }

    let span = (end_s - start_s).max(0.0);
    let mut consumed = 0usize;
    let mut segments = Vec::with_capacity(pieces.len());

    for (i, piece) in pieces.iter().enumerate() {
        let from = start_s + span * consumed as f64 / total_chars as f64;
        consumed += piece.chars().count();
        let to = if i + 1 == pieces.len() {
            end_s.max(start_s)
        } else {
            start_s + span * consumed as f64 / total_chars as f64
        };

        let body = piece.trim_end_matches(|c| PUNCTUATION.contains(c)).trim();
        let punct: String = piece.chars().rev().take_while(|c| PUNCTUATION.contains(*c)).collect();

        segments.push(
            RawSegment::new(
                body,
                (from * 1000.0).round() as u64,
                (to * 1000.0).round() as u64,
                SegmentSource::AsrPunct,
            )
            .with_punct(punct.chars().rev().collect::<String>()),
        );
    }

    segments
}

#[async_trait]
impl SegmentTranscriber for WhisperClient {
    async fn transcribe_and_segment(&self, audio: &Path) -> Result<Vec<RawSegment>> {
        let metadata = fs::metadata(audio).await?;
        if metadata.len() as usize > MAX_FILE_SIZE {
            return Err(MmsegError::Transcription(format!(
                "{} is {} bytes, over the {} byte upload limit",
                audio.display(),
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }

        let response = self.request(audio).await?;
        let segments = self.parse_response(response);

        info!("Whisper returned {} punctuation segments", segments.len());
        Ok(segments)
    }

    fn name(&self) -> &'static str {
        "OpenAI Whisper"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    r#type: String,
}
