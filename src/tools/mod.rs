//! Tool collaborator interface and registry.
//!
//! Tools are opaque to the orchestration core: it only needs a success signal,
//! a textual result and optional artifact metadata to forward upstream. The
//! embedding application supplies the implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::context::ExecutionContext;
use crate::plan::Artifact;

/// Tool that renders a document artifact.
pub const DOCUMENT_TOOL: &str = "generate_document";
/// Tool that renders an image artifact.
pub const IMAGE_TOOL: &str = "generate_image";
/// Tool that queries a web search backend.
pub const WEB_SEARCH_TOOL: &str = "web_search";

/// What a tool returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub content: String,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// A tool the executor can dispatch to.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used for dispatch.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, ctx: &ExecutionContext, args: Value) -> anyhow::Result<ToolOutput>;
}

/// Named tools, constructed once per process and shared by reference.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    initialized: Mutex<bool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tools produced by `load`, once. Later calls do nothing
    /// and return `false`.
    pub async fn init<F>(&self, load: F) -> bool
    where
        F: FnOnce() -> Vec<Arc<dyn Tool>>,
    {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return false;
        }
        let loaded = load();
        let mut tools = self.tools.write().await;
        for tool in loaded {
            tracing::debug!("Registering tool {}", tool.name());
            tools.insert(tool.name().to_string(), tool);
        }
        *initialized = true;
        tracing::info!("Tool registry initialized with {} tools", tools.len());
        true
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    /// Add or replace a single tool.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        self.tools
            .write()
            .await
            .insert(tool.name().to_string(), tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a tool by name.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        args: Value,
    ) -> anyhow::Result<ToolOutput> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;
        tool.execute(ctx, args).await
    }
}
