//! LLM client module for interacting with language models.
//!
//! Two layers:
//! - [`LlmClient`]: a provider speaking the chat-completions protocol
//!   ([`OpenAiCompatibleClient`] covers OpenRouter, OpenAI and any compatible
//!   endpoint).
//! - [`Generator`]: the single-prompt collaborator the orchestration core uses,
//!   `generate(model, prompt, options) -> Generation`. [`LlmRouter`] implements
//!   it by dispatching each [`ModelSpec`] to the provider it names.

mod error;
mod openai_compat;
mod router;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use openai_compat::OpenAiCompatibleClient;
pub use router::LlmRouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Response from a chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

/// Token usage information (if provided by the upstream provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Optional parameters for chat completions.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: Option<f64>,
    /// Maximum output tokens to generate.
    pub max_tokens: Option<u64>,
}

/// Trait for LLM providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse>;
}

/// The orchestration roles that each get their own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Planner,
    Executor,
    Checker,
    Summarizer,
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Checker => "checker",
            Self::Summarizer => "summarizer",
        };
        f.write_str(s)
    }
}

/// A provider plus a model id, written `provider:model`
/// (e.g. `openrouter:anthropic/claude-sonnet-4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse `provider:model`. A bare model id defaults to the `openrouter` provider.
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Self::new(provider.trim(), model.trim())
            }
            _ => Self::new("openrouter", s.trim()),
        }
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Per-role model selection, persisted with each plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub planner: ModelSpec,
    pub executor: ModelSpec,
    pub checker: ModelSpec,
    pub summarizer: ModelSpec,
}

impl ModelConfig {
    pub fn for_role(&self, role: ModelRole) -> &ModelSpec {
        match role {
            ModelRole::Planner => &self.planner,
            ModelRole::Executor => &self.executor,
            ModelRole::Checker => &self.checker,
            ModelRole::Summarizer => &self.summarizer,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let spec = ModelSpec::new("openrouter", "anthropic/claude-sonnet-4");
        Self {
            planner: spec.clone(),
            executor: spec.clone(),
            checker: spec.clone(),
            summarizer: spec,
        }
    }
}

/// Options for a single generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl GenerateOptions {
    pub fn system(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Text produced by one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub content: String,
    pub tokens_used: u64,
}

/// Single-prompt LLM collaborator used by planner, executor, checker and summarizer.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        model: &ModelSpec,
        prompt: &str,
        options: &GenerateOptions,
    ) -> anyhow::Result<Generation>;
}
