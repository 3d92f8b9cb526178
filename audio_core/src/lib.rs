mod encode;

pub use encode::{encode_base64, truncate_chars};

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The speech endpoint rejects longer input.
pub const MAX_SPEECH_INPUT_CHARS: usize = 4096;

/// Models and voice used for the audio endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechOptions {
    pub tts_model: String,
    pub voice: String,
    pub stt_model: String,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            tts_model: "tts-1".to_string(),
            voice: "echo".to_string(),
            stt_model: "whisper-1".to_string(),
        }
    }
}

/// An uploaded audio (or video) file to transcribe.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub data: Bytes,
    pub file_name: String,
    pub content_type: Option<String>,
}

impl AudioUpload {
    pub fn new(data: impl Into<Bytes>, file_name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            file_name: file_name.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for the provider's speech synthesis and transcription endpoints.
#[derive(Debug, Clone)]
pub struct SpeechClient {
    api_key: String,
    base_url: String,
    client: Client,
    options: SpeechOptions,
}

impl SpeechClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
            options: SpeechOptions::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(self)
    }

    pub fn with_options(mut self, options: SpeechOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SpeechOptions {
        &self.options
    }

    /// Synthesize `text` as MPEG audio. Input past [`MAX_SPEECH_INPUT_CHARS`] is dropped.
    pub async fn synthesize(&self, text: &str) -> Result<Bytes> {
        let input = truncate_chars(text, MAX_SPEECH_INPUT_CHARS);
        if input.len() < text.len() {
            debug!(original_chars = text.chars().count(), "truncated speech input");
        }

        let body = SpeechRequest {
            model: &self.options.tts_model,
            input,
            voice: &self.options.voice,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("speech request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("speech synthesis failed with HTTP {status}: {body}");
        }

        let audio = response
            .bytes()
            .await
            .context("failed to read synthesized audio")?;
        debug!(bytes = audio.len(), voice = %self.options.voice, "speech synthesized");
        Ok(audio)
    }

    /// Transcribe an uploaded file and return its text.
    pub async fn transcribe(&self, upload: AudioUpload) -> Result<String> {
        if upload.is_empty() {
            anyhow::bail!("audio upload is empty");
        }

        let size = upload.data.len();
        let mut part = Part::bytes(upload.data.to_vec()).file_name(upload.file_name);
        if let Some(ref content_type) = upload.content_type {
            part = part
                .mime_str(content_type)
                .with_context(|| format!("invalid content type: {content_type}"))?;
        }

        let form = Form::new()
            .part("file", part)
            .text("model", self.options.stt_model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("transcription failed with HTTP {status}: {body}");
        }

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .context("invalid transcription response")?;
        debug!(audio_bytes = size, text_len = transcription.text.len(), "transcription complete");
        Ok(transcription.text)
    }
}
