//! Tests: audio upload -> transcription -> streamed translation

use axum::http::{header, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, body_string_contains, method, path},
    Mock, ResponseTemplate,
};

use crate::common::*;

#[tokio::test]
async fn test_complete_translation_pipeline() {
    let (provider, app) = create_mocked_app().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(body_string_contains("filename=\"greeting.mp3\""))
        .and(body_string_contains("whisper-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "Good morning, everyone" })))
        .expect(1)
        .mount(&provider)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4-turbo-preview",
            "stream": true,
            "messages": [{
                "role": "user",
                "content": "Translate this into Spanish: Good morning, everyone"
            }]
        })))
        .respond_with(sse_completion(&["Buenos días", ", a todos"]))
        .expect(1)
        .mount(&provider)
        .await;

    let response = app
        .oneshot(multipart_request(
            "/api/translation",
            &[FormField::file("file", "greeting.mp3", "audio/mpeg", FAKE_MP3)],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(body_text(response).await, "Buenos días, a todos");
}

#[tokio::test]
async fn test_translation_target_language_is_configurable() {
    let provider = wiremock::MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "Hello" })))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{ "role": "user", "content": "Translate this into French: Hello" }]
        })))
        .respond_with(sse_completion(&["Bonjour"]))
        .expect(1)
        .mount(&provider)
        .await;

    let mut config = test_config(&provider.uri());
    config.translation_language = "French".to_string();
    let app = create_test_app(config);

    let response = app
        .oneshot(multipart_request(
            "/api/translation",
            &[
                FormField::text("note", "ignored"),
                FormField::file("file", "hello.webm", "video/webm", FAKE_MP3),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Bonjour");
}

#[tokio::test]
async fn test_transcription_failure_skips_translation() {
    let (provider, app) = create_mocked_app().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Invalid file format. Supported formats: ['flac', 'mp3', 'wav']" }
        })))
        .mount(&provider)
        .await;
    Mock::given(path("/chat/completions"))
        .respond_with(sse_completion(&["unused"]))
        .expect(0)
        .mount(&provider)
        .await;

    let response = app
        .clone()
        .oneshot(multipart_request(
            "/api/translation",
            &[FormField::file("file", "notes.txt", "text/plain", b"not audio")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("Invalid file format"));

    let metrics = body_json(app.oneshot(get_request("/api/metrics")).await.unwrap()).await;
    assert_eq!(metrics["endpoints"]["translation"]["error_count"], 1);
    assert_eq!(metrics["upstream"]["failures"], 1);
}
