//! Routes model specs to registered providers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ChatMessage, ChatOptions, GenerateOptions, Generation, Generator, LlmClient, ModelSpec};

/// [`Generator`] backed by one or more named [`LlmClient`] providers.
#[derive(Default, Clone)]
pub struct LlmRouter {
    providers: HashMap<String, Arc<dyn LlmClient>>,
}

impl LlmRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.providers.insert(name.into(), client);
        self
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl Generator for LlmRouter {
    async fn generate(
        &self,
        model: &ModelSpec,
        prompt: &str,
        options: &GenerateOptions,
    ) -> anyhow::Result<Generation> {
        let client = self.providers.get(&model.provider).ok_or_else(|| {
            anyhow::anyhow!(
                "No LLM provider registered for '{}' (available: {})",
                model.provider,
                self.provider_names().join(", ")
            )
        })?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let response = client
            .chat_completion(
                &model.model,
                &messages,
                ChatOptions {
                    temperature: options.temperature,
                    max_tokens: options.max_tokens,
                },
            )
            .await?;

        let content = response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Model {} returned an empty response", model))?;

        Ok(Generation {
            content,
            tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, Role, TokenUsage};
    use std::sync::Mutex;

    struct EchoClient {
        seen: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn chat_completion(
            &self,
            model: &str,
            messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> anyhow::Result<ChatResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((model.to_string(), messages.to_vec()));
            Ok(ChatResponse {
                content: Some(format!("echo from {}", model)),
                finish_reason: Some("stop".into()),
                usage: Some(TokenUsage::new(12, 8)),
                model: Some(model.to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_routes_by_provider() {
        let client = Arc::new(EchoClient {
            seen: Mutex::new(Vec::new()),
        });
        let router = LlmRouter::new().with_provider("openai", client.clone());

        let generation = router
            .generate(
                &ModelSpec::new("openai", "gpt-4o-mini"),
                "hello",
                &GenerateOptions::system("be brief"),
            )
            .await
            .unwrap();

        assert_eq!(generation.content, "echo from gpt-4o-mini");
        assert_eq!(generation.tokens_used, 20);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].1.len(), 2);
        assert_eq!(seen[0].1[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_an_error() {
        let router = LlmRouter::new();
        let err = router
            .generate(
                &ModelSpec::new("nope", "m"),
                "hello",
                &GenerateOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
