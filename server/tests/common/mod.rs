//! Common utilities for integration tests
#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body, Bytes},
    http::Request,
    response::Response,
    Router,
};
use server::{build_router, config::ServerConfig, AppState};
use wiremock::{MockServer, ResponseTemplate};

pub const FAKE_MP3: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00fake-mpeg-frames";

pub fn test_config(base_url: &str) -> ServerConfig {
    ServerConfig {
        openai_api_key: "test-key".to_string(),
        openai_base_url: base_url.to_string(),
        rate_limit_per_minute: 6000,
        upstream_timeout_secs: 5,
        request_timeout_secs: 10,
        ..ServerConfig::default()
    }
}

/// Create a test app talking to the given config's provider
pub fn create_test_app(config: ServerConfig) -> Router {
    let state = AppState::from_config(config).expect("Failed to build app state for tests");
    build_router(state).expect("Failed to build router for tests")
}

/// Start a mock provider and an app pointed at it
pub async fn create_mocked_app() -> (MockServer, Router) {
    let provider = MockServer::start().await;
    let app = create_test_app(test_config(&provider.uri()));
    (provider, app)
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// POST `body` as-is, optionally labelled with `content_type`
pub fn raw_request(uri: &str, content_type: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub struct FormField<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> FormField<'a> {
    pub fn file(name: &'a str, file_name: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            content_type: Some(content_type),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            content_type: None,
            data: value.as_bytes(),
        }
    }
}

const BOUNDARY: &str = "----relay-test-boundary";

pub fn multipart_request(uri: &str, fields: &[FormField<'_>]) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    for field in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", field.name);
        if let Some(file_name) = field.file_name {
            disposition.push_str(&format!("; filename=\"{file_name}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = field.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(field.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

/// A provider reply streaming `tokens` as chat completion chunks
pub fn sse_completion(tokens: &[&str]) -> ResponseTemplate {
    let mut body = String::from(
        "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    );
    for token in tokens {
        let chunk = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{ "index": 0, "delta": { "content": token }, "finish_reason": null }]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");

    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

pub async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}
