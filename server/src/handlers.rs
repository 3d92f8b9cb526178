//! Route handlers.
//!
//! Every provider-backed route follows the same shape: validate the input,
//! make one or two upstream calls, and relay the result. Streamed routes
//! return as soon as the provider accepts the request; tokens are then
//! forwarded as they arrive.

use std::convert::Infallible;
use std::time::Instant;

use audio_core::{encode_base64, AudioUpload};
use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, Query, State,
    },
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use llm_core::{Message, TokenStream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AudioFormat;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::metrics::{EndpointMetrics, MetricsResponse, UpstreamMetrics};
use crate::validation::{validate_chat_messages, validate_speech_text, validate_upload_size};
use crate::AppState;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// File name offered for downloaded speech
const AUDIO_FILE_NAME: &str = "message.mp3";

/// `text` is read loosely: anything but a non-empty string is "No text provided".
#[derive(Deserialize)]
pub struct AudioRequest {
    #[serde(default)]
    text: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct AudioQuery {
    format: Option<String>,
}

#[derive(Serialize)]
pub struct AudioBase64Response {
    base64: String,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    messages: Vec<Message>,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(state.metrics.snapshot())
}

fn track<T>(metrics: &EndpointMetrics, start: Instant, result: Result<T, ApiError>) -> Result<T, ApiError> {
    match &result {
        Ok(_) => metrics.record_request(start.elapsed().as_millis() as u64),
        Err(e) => {
            warn!(status = %e.status(), "request failed: {e}");
            metrics.record_error();
        }
    }
    result
}

pub async fn audio_endpoint(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
    body: Result<JsonBody<AudioRequest>, ApiError>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let result = match body {
        Ok(JsonBody(req)) => synthesize_audio(&state, query, req).await,
        Err(e) => Err(e),
    };
    track(&state.metrics.audio, start, result)
}

async fn synthesize_audio(
    state: &AppState,
    query: AudioQuery,
    req: AudioRequest,
) -> Result<Response, ApiError> {
    let text = validate_speech_text(req.text.as_ref().and_then(serde_json::Value::as_str))?;
    let format = match query.format.as_deref() {
        Some(f) => f.parse::<AudioFormat>()?,
        None => state.config.audio_format,
    };

    info!(chars = text.chars().count(), ?format, "Speech request received");

    let audio = state.speech.synthesize(text).await;
    state.metrics.upstream.record_call(audio.is_ok());
    let audio = audio?;
    state.metrics.upstream.record_audio(audio.len());

    Ok(audio_response(audio, format))
}

fn audio_response(audio: Bytes, format: AudioFormat) -> Response {
    match format {
        AudioFormat::Binary => ([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response(),
        AudioFormat::Base64 => Json(AudioBase64Response {
            base64: encode_base64(&audio),
        })
        .into_response(),
        AudioFormat::Blob => (
            [
                (header::CONTENT_TYPE, "audio/mpeg".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{AUDIO_FILE_NAME}\""),
                ),
            ],
            audio,
        )
            .into_response(),
    }
}

pub async fn chat_endpoint(
    State(state): State<AppState>,
    body: Result<JsonBody<ChatRequest>, ApiError>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let result: Result<Response, ApiError> = async {
        let JsonBody(req) = body?;
        validate_chat_messages(&req.messages)?;
        info!(
            messages = req.messages.len(),
            model = %state.llm.model(),
            "Chat request received"
        );
        let tokens = open_completion(&state, &req.messages).await?;
        Ok(stream_text_response(tokens, state.metrics.upstream.clone()))
    }
    .await;
    track(&state.metrics.chat, start, result)
}

pub async fn translation_endpoint(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let result: Result<Response, ApiError> = async {
        let mut multipart = multipart.map_err(|e| {
            debug!("translation request is not multipart: {e}");
            ApiError::InvalidInput("No file provided".to_string())
        })?;
        let upload = read_audio_upload(&mut multipart, state.config.max_upload_bytes()).await?;
        info!(
            file = %upload.file_name,
            bytes = upload.data.len(),
            "Translation request received"
        );

        let transcript = state.speech.transcribe(upload).await;
        state.metrics.upstream.record_call(transcript.is_ok());
        let transcript = transcript?;
        debug!(chars = transcript.chars().count(), "transcription received");

        let prompt = translation_prompt(&state.config.translation_language, &transcript);
        let tokens = open_completion(&state, &[Message::user(prompt)]).await?;
        Ok(stream_text_response(tokens, state.metrics.upstream.clone()))
    }
    .await;
    track(&state.metrics.translation, start, result)
}

pub fn translation_prompt(language: &str, transcript: &str) -> String {
    format!("Translate this into {language}: {transcript}")
}

/// Pull the `file` field out of a multipart form, enforcing the upload limit.
async fn read_audio_upload(multipart: &mut Multipart, max_bytes: usize) -> Result<AudioUpload, ApiError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("audio").to_string();
        let content_type = field.content_type().map(str::to_string);

        let mut data: Vec<u8> = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            data.extend_from_slice(&chunk);
            validate_upload_size(data.len(), max_bytes)?;
        }
        if data.is_empty() {
            break;
        }

        let upload = AudioUpload::new(data, file_name);
        return Ok(match content_type {
            Some(ct) => upload.with_content_type(ct),
            None => upload,
        });
    }
    Err(ApiError::InvalidInput("No file provided".to_string()))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::InvalidInput(format!("Failed to read multipart body: {}", e.body_text()))
    }
}

async fn open_completion(state: &AppState, messages: &[Message]) -> Result<TokenStream, ApiError> {
    let timeout = state.config.upstream_timeout();
    let result = tokio::time::timeout(timeout, state.llm.chat_stream(messages)).await;

    let outcome = match result {
        Ok(Ok(tokens)) => Ok(tokens),
        Ok(Err(e)) => Err(ApiError::Upstream(e)),
        Err(_) => Err(ApiError::Upstream(anyhow::anyhow!(
            "chat completion timed out after {} seconds",
            timeout.as_secs()
        ))),
    };
    state.metrics.upstream.record_call(outcome.is_ok());
    outcome
}

/// Relay completion tokens as a plain-text body.
///
/// A provider failure after the first byte cannot change the status any
/// more, so it is logged and the body simply ends.
fn stream_text_response(mut tokens: TokenStream, upstream: UpstreamMetrics) -> Response {
    let body = async_stream::stream! {
        while let Some(token) = tokens.next().await {
            match token {
                Ok(text) => {
                    upstream.record_streamed(text.len());
                    yield Ok::<Bytes, Infallible>(Bytes::from(text));
                }
                Err(e) => {
                    upstream.record_interrupted();
                    warn!("completion stream interrupted: {e:#}");
                    break;
                }
            }
        }
    };

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}
