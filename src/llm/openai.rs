//! `OpenAI`-compatible streaming chat completions

use super::{CompletionSource, FragmentStream, LlmError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

/// Streaming client for any `/chat/completions` endpoint speaking the
/// `OpenAI` wire format (`OpenRouter` by default)
pub struct OpenAiCompatSource {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatSource {
    pub fn new(base_url: &str, model: &str, api_key: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl CompletionSource for OpenAiCompatSource {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "AI Chat Bot")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|r| r.error.message)
                .unwrap_or(body);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| LlmError::network(format!("Stream error: {e}"))));
        Ok(sse_fragments(bytes).boxed())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// One parsed server-sent event line
#[derive(Debug, PartialEq, Eq)]
enum SseItem {
    Fragment(String),
    Done,
}

/// Drain every complete line from `buffer`, leaving a trailing partial line.
///
/// Works on bytes so a multi-byte character split across chunks survives.
fn drain_sse_lines(buffer: &mut Vec<u8>) -> Result<Vec<SseItem>, LlmError> {
    let mut items = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\r', '\n']);

        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            items.push(SseItem::Done);
            break;
        }

        let json: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| LlmError::unknown(format!("Malformed stream event: {e}")))?;
        if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
            if !content.is_empty() {
                items.push(SseItem::Fragment(content.to_string()));
            }
        }
    }
    Ok(items)
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

/// Turn a raw byte stream of server-sent events into content fragments
fn sse_fragments<S, B>(bytes: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, LlmError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    match drain_sse_lines(&mut state.buffer) {
                        Ok(items) => {
                            for item in items {
                                match item {
                                    SseItem::Fragment(text) => state.pending.push_back(Ok(text)),
                                    SseItem::Done => state.finished = true,
                                }
                            }
                        }
                        Err(e) => {
                            state.pending.push_back(Err(e));
                            state.finished = true;
                        }
                    }
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e));
                    state.finished = true;
                }
                None => state.finished = true,
            }
        }
    })
}
