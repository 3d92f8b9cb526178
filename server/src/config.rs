// Configuration for the server and the upstream provider

use std::time::Duration;

use audio_core::SpeechOptions;

use crate::error::ApiError;

/// How `/audio` hands synthesized speech back to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// Raw `audio/mpeg` body.
    #[default]
    Binary,
    /// JSON `{ "base64": ... }`.
    Base64,
    /// Raw body served as a `message.mp3` attachment.
    Blob,
}

impl std::str::FromStr for AudioFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" | "mpeg" => Ok(AudioFormat::Binary),
            "base64" | "json" => Ok(AudioFormat::Base64),
            "blob" => Ok(AudioFormat::Blob),
            other => Err(ApiError::InvalidInput(format!(
                "Unknown audio format: {other}. Expected binary, base64 or blob"
            ))),
        }
    }
}

/// `/translation` waits on a transcription and then on the completion to open
/// before it can send anything.
const UPSTREAM_CALLS_BEFORE_FIRST_BYTE: u64 = 2;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub upstream_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub max_upload_mb: usize,
    pub audio_format: AudioFormat,
    pub translation_language: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub system_prompt: Option<String>,
    pub speech: SpeechOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            rate_limit_per_minute: 60,
            upstream_timeout_secs: 120,
            request_timeout_secs: 120 * UPSTREAM_CALLS_BEFORE_FIRST_BYTE,
            cors_allowed_origins: None,
            max_upload_mb: 25,
            audio_format: AudioFormat::Binary,
            translation_language: "Spanish".to_string(),
            openai_api_key: String::new(),
            openai_base_url: llm_core::DEFAULT_BASE_URL.to_string(),
            chat_model: llm_core::DEFAULT_CHAT_MODEL.to_string(),
            system_prompt: None,
            speech: SpeechOptions::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let openai_api_key = env_string("OPENAI_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY must be set in the environment"))?;

        let audio_format = match env_string("AUDIO_RESPONSE_FORMAT") {
            Some(v) => v.parse().map_err(|e: ApiError| anyhow::anyhow!("{e}"))?,
            None => defaults.audio_format,
        };

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let speech = SpeechOptions {
            tts_model: env_string("TTS_MODEL").unwrap_or(defaults.speech.tts_model),
            voice: env_string("TTS_VOICE").unwrap_or(defaults.speech.voice),
            stt_model: env_string("STT_MODEL").unwrap_or(defaults.speech.stt_model),
        };

        let upstream_timeout_secs = env_or("UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout_secs);

        Ok(Self {
            port: env_or("PORT", defaults.port),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            upstream_timeout_secs,
            request_timeout_secs: env_or(
                "REQUEST_TIMEOUT_SECS",
                upstream_timeout_secs * UPSTREAM_CALLS_BEFORE_FIRST_BYTE,
            ),
            cors_allowed_origins,
            max_upload_mb: env_or("MAX_UPLOAD_MB", defaults.max_upload_mb),
            audio_format,
            translation_language: env_string("TRANSLATION_LANGUAGE")
                .unwrap_or(defaults.translation_language),
            openai_api_key,
            openai_base_url: env_string("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            chat_model: env_string("LLM_MODEL").unwrap_or(defaults.chat_model),
            system_prompt: env_string("SYSTEM_PROMPT"),
            speech,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Longest a request can legitimately wait on the provider before its first byte.
    pub fn upstream_budget(&self) -> Duration {
        self.upstream_timeout() * UPSTREAM_CALLS_BEFORE_FIRST_BYTE as u32
    }

    /// Whether the request timeout leaves every route its full upstream budget.
    pub fn request_timeout_covers_upstream(&self) -> bool {
        self.request_timeout() >= self.upstream_budget()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}
