//! Offline completion source

use super::{CompletionSource, FragmentStream, LlmError};
use async_trait::async_trait;
use futures::StreamExt;

/// Streams the prompt back, one word per fragment
#[derive(Debug, Clone, Default)]
pub struct EchoSource;

impl EchoSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionSource for EchoSource {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, LlmError> {
        let fragments: Vec<Result<String, LlmError>> = prompt
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(futures::stream::iter(fragments).boxed())
    }

    fn model_id(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_reassembles_prompt() {
        let stream = EchoSource::new().stream("hello there world").await.unwrap();
        let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(fragments, vec!["hello ", "there ", "world"]);
        assert_eq!(fragments.concat(), "hello there world");
    }
}
