//! Decoding of streamed chat completions.
//!
//! The provider answers `stream: true` requests with a `text/event-stream`
//! body. Network chunks do not line up with events, so [`SseDecoder`] keeps
//! the trailing partial line between calls and only hands out complete
//! `data` payloads. [`parse_delta`] turns one payload into a text token.

use serde::Deserialize;

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the `data` payload of every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            self.handle_line(&line, &mut events);
        }
        events
    }

    /// Flush an event left open when the body ends without a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            self.handle_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

/// What a single event payload means for the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Token(String),
    /// Role-only or empty chunk.
    Empty,
    Done,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorChunk {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

pub fn parse_delta(data: &str) -> anyhow::Result<Delta> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Delta::Done);
    }
    if let Ok(err) = serde_json::from_str::<ErrorChunk>(data) {
        anyhow::bail!("provider stream error: {}", err.error.message);
    }
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| anyhow::anyhow!("invalid completion chunk: {e}"))?;

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(content) if !content.is_empty() => Ok(Delta::Token(content)),
        _ => Ok(Delta::Empty),
    }
}
