mod message;
mod stream;

pub use message::{Message, Role};
pub use stream::{parse_delta, Delta, SseDecoder};

use std::{pin::Pin, time::Duration};

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::message::WireMessage;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4-turbo-preview";

/// Completion tokens in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Structure for the OpenAI Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
    model: String,
    system_prompt: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
            model: model.into(),
            system_prompt: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bounds connection setup and headers only; a streaming body may take longer.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(self)
    }

    /// Prepended to every conversation sent upstream.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Ask for a streaming completion and return its tokens.
    ///
    /// Fails before yielding anything if the provider rejects the request.
    pub async fn chat_stream(&self, messages: &[Message]) -> Result<TokenStream> {
        let system = self.system_prompt.as_deref().map(|content| WireMessage {
            role: Role::System.as_str(),
            content,
        });
        let req_body = ChatRequest {
            model: &self.model,
            messages: system
                .into_iter()
                .chain(messages.iter().map(WireMessage::from))
                .collect(),
            stream: true,
        };

        debug!(model = %self.model, messages = req_body.messages.len(), "requesting chat completion");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion failed with HTTP {status}: {body}");
        }

        Ok(token_stream(response))
    }
}

fn token_stream(response: reqwest::Response) -> TokenStream {
    let mut bytes = Box::pin(response.bytes_stream());

    let tokens = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut done = false;
        while !done {
            let chunk = match bytes.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    yield Err(anyhow::Error::new(e).context("error reading completion stream"));
                    return;
                }
                None => break,
            };
            for data in decoder.push(&chunk) {
                match parse_delta(&data) {
                    Ok(Delta::Token(token)) => yield Ok(token),
                    Ok(Delta::Empty) => {}
                    Ok(Delta::Done) => {
                        done = true;
                        break;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
        if !done {
            for data in decoder.finish() {
                match parse_delta(&data) {
                    Ok(Delta::Token(token)) => yield Ok(token),
                    Ok(_) => {}
                    Err(e) => warn!("ignoring trailing stream data: {e}"),
                }
            }
        }
    };

    Box::pin(tokens)
}
