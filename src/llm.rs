//! Completion sources
//!
//! The chat engine only needs "stream text fragments for a prompt". Model
//! selection and transport live behind [`CompletionSource`].

mod echo;
mod error;
mod openai;

pub use echo::EchoSource;
pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAiCompatSource;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Finite, one-shot sequence of response fragments
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// Something that can answer a prompt with streamed text
#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Start a completion. Errors here mean the stream never opened; errors
    /// yielded by the stream are mid-response transport faults.
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, LlmError>;

    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: CompletionSource + ?Sized> CompletionSource for Arc<T> {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, LlmError> {
        (**self).stream(prompt).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Completion endpoint settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-oss-20b:free".to_string(),
            api_key: None,
        }
    }
}

/// Build the configured source: the HTTP endpoint when a key is present,
/// otherwise the offline echo source.
pub fn source_from_config(config: &LlmConfig) -> Arc<dyn CompletionSource> {
    let inner: Arc<dyn CompletionSource> = match &config.api_key {
        Some(key) => Arc::new(OpenAiCompatSource::new(&config.base_url, &config.model, key.clone())),
        None => {
            tracing::warn!("No completion API key configured. Set OPENROUTER_API_KEY; using offline echo.");
            Arc::new(EchoSource::new())
        }
    };
    Arc::new(LoggingSource::new(inner))
}

/// Logging wrapper for completion sources
pub struct LoggingSource {
    inner: Arc<dyn CompletionSource>,
    model_id: String,
}

impl LoggingSource {
    pub fn new(inner: Arc<dyn CompletionSource>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl CompletionSource for LoggingSource {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, LlmError> {
        let start = Instant::now();
        let model = self.model_id.clone();

        match self.inner.stream(prompt).await {
            Ok(stream) => {
                tracing::debug!(model = %model, "Completion stream opened");
                let mut fragments = 0usize;
                let logged = stream.inspect(move |item| match item {
                    Ok(_) => fragments += 1,
                    Err(e) => tracing::error!(
                        model = %model,
                        duration_ms = %start.elapsed().as_millis(),
                        fragments,
                        error = %e.message,
                        "Completion stream failed"
                    ),
                });
                Ok(logged.boxed())
            }
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Completion request failed"
                );
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
