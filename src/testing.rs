//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::context::ExecutionContext;
use crate::events::PlanEvent;
use crate::llm::{GenerateOptions, Generation, Generator, ModelSpec};
use crate::plan::Artifact;
use crate::tools::{Tool, ToolOutput};

/// Tokens reported for every scripted generation.
pub const SCRIPTED_TOKENS: u64 = 10;

/// Replays canned responses in order. Responses can be scripted per model
/// name; anything without its own script pulls from the default queue.
#[derive(Default)]
pub struct ScriptedGenerator {
    default: Mutex<VecDeque<anyhow::Result<String>>>,
    by_model: Mutex<HashMap<String, VecDeque<anyhow::Result<String>>>>,
    prompts: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<anyhow::Result<String>>) -> Self {
        Self {
            default: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub fn with_model(self, model: &str, responses: Vec<anyhow::Result<String>>) -> Self {
        self.by_model
            .lock()
            .unwrap()
            .insert(model.to_string(), responses.into());
        self
    }

    /// Sleep before answering (pair with a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Model names in call order.
    pub fn models(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    fn next(&self, model: &str) -> anyhow::Result<String> {
        if let Some(queue) = self.by_model.lock().unwrap().get_mut(model) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        self.default
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted for {}", model)))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        model: &ModelSpec,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> anyhow::Result<Generation> {
        self.prompts
            .lock()
            .unwrap()
            .push((model.model.clone(), prompt.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.next(&model.model)?;
        Ok(Generation {
            content,
            tokens_used: SCRIPTED_TOKENS,
        })
    }
}

/// A tool that records its calls and answers with fixed content.
pub struct RecordingTool {
    name: String,
    content: String,
    success: bool,
    fail_with: Option<String>,
    delay: Option<Duration>,
    artifacts: Vec<Artifact>,
    calls: Mutex<Vec<(ExecutionContext, Value)>>,
}

impl RecordingTool {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
            success: true,
            fail_with: None,
            delay: None,
            artifacts: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report `success: false` instead of succeeding.
    pub fn unsuccessful(mut self) -> Self {
        self.success = false;
        self
    }

    /// Return an error from `execute`.
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn calls(&self) -> Vec<(ExecutionContext, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "recording test tool"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, ctx: &ExecutionContext, args: Value) -> anyhow::Result<ToolOutput> {
        self.calls.lock().unwrap().push((ctx.clone(), args));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{}", message);
        }
        let mut output = if self.success {
            ToolOutput::ok(self.content.clone())
        } else {
            ToolOutput::failed(self.content.clone())
        };
        output.artifacts = self.artifacts.clone();
        Ok(output)
    }
}

/// Sink plus a receiver to drain what was emitted.
pub fn event_channel() -> (
    mpsc::UnboundedSender<PlanEvent>,
    mpsc::UnboundedReceiver<PlanEvent>,
) {
    mpsc::unbounded_channel()
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<PlanEvent>) -> Vec<PlanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
