//! Tests: conversation turns -> streamed replies -> speech for the last message

use axum::http::{header, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, ResponseTemplate,
};

use crate::common::*;

#[tokio::test]
async fn test_conversation_round_trip_and_speech() {
    let (provider, app) = create_mocked_app().await;

    // Turn 1
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{ "role": "user", "content": "¿Cuál es la capital de Francia?" }]
        })))
        .respond_with(sse_completion(&["La capital", " es París."]))
        .up_to_n_times(1)
        .expect(1)
        .mount(&provider)
        .await;

    let history = json!([
        { "id": "u1", "role": "user", "content": "¿Cuál es la capital de Francia?", "createdAt": "2024-03-01T10:00:00.000Z" }
    ]);
    let response = app
        .clone()
        .oneshot(json_request("/api/chat", json!({ "messages": history })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first_reply = body_text(response).await;
    assert_eq!(first_reply, "La capital es París.");

    // Turn 2 carries the whole history, as the page sends it
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "user", "content": "¿Cuál es la capital de Francia?" },
                { "role": "assistant", "content": "La capital es París." },
                { "role": "user", "content": "¿Y de Italia?" }
            ]
        })))
        .respond_with(sse_completion(&["Roma."]))
        .expect(1)
        .mount(&provider)
        .await;

    let history = json!([
        { "id": "u1", "role": "user", "content": "¿Cuál es la capital de Francia?" },
        { "id": "a1", "role": "assistant", "content": first_reply },
        { "id": "u2", "role": "user", "content": "¿Y de Italia?" }
    ]);
    let response = app
        .clone()
        .oneshot(json_request("/api/chat", json!({ "messages": history })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second_reply = body_text(response).await;
    assert_eq!(second_reply, "Roma.");

    // Speech for the last message, downloaded the way the page does it
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .and(body_partial_json(json!({ "input": "Roma." })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(FAKE_MP3))
        .expect(1)
        .mount(&provider)
        .await;

    let response = app
        .oneshot(json_request("/api/audio?format=blob", json!({ "text": second_reply })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(&body_bytes(response).await[..], FAKE_MP3);
}

#[tokio::test]
async fn test_chat_with_system_prompt() {
    let provider = wiremock::MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system", "content": "Responde siempre en español." },
                { "role": "user", "content": "Hello" }
            ]
        })))
        .respond_with(sse_completion(&["Hola"]))
        .expect(1)
        .mount(&provider)
        .await;

    let mut config = test_config(&provider.uri());
    config.system_prompt = Some("Responde siempre en español.".to_string());
    let app = create_test_app(config);

    let response = app
        .oneshot(json_request("/chat", json!({ "messages": [{ "role": "user", "content": "Hello" }] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Hola");
}

#[tokio::test]
async fn test_interrupted_stream_keeps_partial_reply() {
    let (provider, app) = create_mocked_app().await;
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Parcial\"}}]}\n\n\
                data: {\"error\":{\"message\":\"The server had an error\"}}\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&provider)
        .await;

    let response = app
        .clone()
        .oneshot(json_request("/api/chat", json!({ "messages": [{ "role": "user", "content": "Hi" }] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Parcial");

    let metrics = body_json(app.oneshot(get_request("/api/metrics")).await.unwrap()).await;
    assert_eq!(metrics["upstream"]["interrupted_streams"], 1);
}
