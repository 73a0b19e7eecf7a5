//! Generation capability consumed by the orchestrator.

use crate::types::{Message, Role};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// One entry of generation input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ContextMessage {
    /// The generator always sees `model_content`.
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.model_content.clone())
    }
}

/// A complete, non-streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub role: Role,
    pub content: String,
}

impl Generation {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Errors reported by a generator. Display is the upstream message as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("{0}")]
    Upstream(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Incremental text fragments in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Language-model completion service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce one complete response.
    async fn generate(&self, context: &[ContextMessage]) -> Result<Generation, GenerationError>;

    /// Produce a token stream. The default wraps [`Generator::generate`] as a
    /// single-token stream.
    async fn generate_stream(
        &self,
        context: &[ContextMessage],
    ) -> Result<TokenStream, GenerationError> {
        let generation = self.generate(context).await?;
        Ok(Box::pin(futures_util::stream::once(async move {
            Ok(generation.content)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextMessage, Generation, GenerationError, Generator};
    use crate::types::{Message, Role};
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        async fn generate(
            &self,
            context: &[ContextMessage],
        ) -> Result<Generation, GenerationError> {
            let last = context.last().map(|entry| entry.content.clone());
            Ok(Generation::assistant(last.unwrap_or_default()))
        }
    }

    #[tokio::test]
    async fn default_stream_yields_one_token() {
        let context = [ContextMessage::new(Role::User, "ping")];
        let tokens: Vec<_> = Echo
            .generate_stream(&context)
            .await
            .expect("stream")
            .collect()
            .await;
        assert_eq!(tokens, vec![Ok("ping".to_string())]);
    }

    #[test]
    fn context_uses_model_content() {
        let message = Message::new(Uuid::new_v4(), Role::User, "hi").with_model_content("Say: hi");
        assert_eq!(
            ContextMessage::from(&message),
            ContextMessage::new(Role::User, "Say: hi")
        );
    }

    #[test]
    fn upstream_error_display_is_verbatim() {
        assert_eq!(
            GenerationError::Upstream("rate limited".to_string()).to_string(),
            "rate limited"
        );
    }
}
