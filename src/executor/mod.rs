//! Executor - runs one task to completion.
//!
//! # Key Concepts
//! - Idempotent: the persisted status is re-read first and anything that is
//!   not `pending` returns immediately without touching a collaborator
//! - Fail-fast: a tool error, LLM error or timeout moves the task to `skipped`
//!   with the error recorded. No retries
//! - Checker-gated: a successful result is only `done` once the checker
//!   approves it, otherwise it ends in `needs_review`
//! - Usage is reported for every outcome, including timeouts

mod detect;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::checker::{CheckStatus, Checker};
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{EventSink, PlanEvent};
use crate::llm::{GenerateOptions, Generator, ModelRole};
use crate::plan::{Artifact, BudgetUsage, Task, TaskPlan, TaskStatus, TaskTransition};
use crate::store::{PlanStore, StoreError};
use crate::tools::{ToolRegistry, WEB_SEARCH_TOOL};

pub use detect::{detect_tool, tool_args, Dispatch};

/// Longest dependency result quoted into a prompt.
const MAX_DEPENDENCY_CHARS: usize = 4_000;

const EXECUTOR_SYSTEM_PROMPT: &str =
    "You carry out one step of a larger plan. Answer with the result of this step only.";

/// What happened to one task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionResult {
    pub success: bool,
    /// Status the task ended in, if it could be recorded
    pub status: Option<TaskStatus>,
    /// Set when the task was not run at all
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub confidence_score: Option<u8>,
    pub usage: BudgetUsage,
}

/// Usage counters that survive a cancelled (timed out) future.
#[derive(Debug, Default)]
struct UsageMeter {
    llm_calls: AtomicU64,
    tokens_used: AtomicU64,
    web_searches: AtomicU64,
}

impl UsageMeter {
    fn record(&self, usage: BudgetUsage) {
        self.llm_calls.fetch_add(usage.llm_calls, Ordering::Relaxed);
        self.tokens_used
            .fetch_add(usage.tokens_used, Ordering::Relaxed);
        self.web_searches
            .fetch_add(usage.web_searches, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BudgetUsage {
        BudgetUsage::new(
            self.llm_calls.load(Ordering::Relaxed),
            self.tokens_used.load(Ordering::Relaxed),
            self.web_searches.load(Ordering::Relaxed),
        )
    }
}

/// Raw output of a task before checking.
struct WorkOutput {
    content: String,
    artifacts: Vec<Artifact>,
}

pub struct Executor {
    store: Arc<dyn PlanStore>,
    generator: Arc<dyn Generator>,
    tools: Arc<ToolRegistry>,
    checker: Checker,
    events: Arc<dyn EventSink>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn PlanStore>,
        generator: Arc<dyn Generator>,
        tools: Arc<ToolRegistry>,
        checker: Checker,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            generator,
            tools,
            checker,
            events,
        }
    }

    /// Run `task` of `plan`.
    ///
    /// Only store reads propagate as errors. Everything that goes wrong while
    /// working on the task ends up in the task's state and the returned result.
    pub async fn execute_task(
        &self,
        ctx: &ExecutionContext,
        plan: &TaskPlan,
        task: &Task,
    ) -> OrchestratorResult<ExecutionResult> {
        let current = self
            .store
            .get_plan(plan.id)
            .await?
            .ok_or(OrchestratorError::PlanNotFound(plan.id))?;
        let task = current.task(task.id).cloned().ok_or_else(|| {
            OrchestratorError::Execution(format!("Task {} not found in plan {}", task.id, plan.id))
        })?;

        if task.status != TaskStatus::Pending {
            tracing::info!(
                "Task {} of plan {} is already {}, not running it again",
                task.id,
                plan.id,
                task.status
            );
            return Ok(already(task.status));
        }

        match self
            .store
            .transition_task_state(
                plan.id,
                task.id,
                TaskTransition::to(TaskStatus::Running).details("Execution started"),
            )
            .await
        {
            Ok(_) => {}
            // Another worker claimed the task between the read and the write
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::info!(
                    "Task {} of plan {} was claimed elsewhere ({}), not running it",
                    task.id,
                    plan.id,
                    from
                );
                return Ok(already(from));
            }
            Err(e) => {
                tracing::error!("Could not mark task {} running: {}", task.id, e);
                let message = format!("Failed to start task: {}", e);
                return Ok(self
                    .record_skip(&current, &task, message, BudgetUsage::default())
                    .await);
            }
        }

        self.events.emit(PlanEvent::TaskStarted {
            plan_id: plan.id,
            task_id: task.id,
            target: task.target.clone(),
        });
        tracing::info!("Executing task {} ({}): {}", task.id, task.task_type, task.target);

        let meter = UsageMeter::default();
        let ctx = ctx.for_plan(&current);
        let timeout_minutes = current.budget_limits.task_timeout_minutes;
        let work = self.perform(&ctx, &current, &task, &meter);

        let outcome = if timeout_minutes == 0 {
            work.await
        } else {
            match tokio::time::timeout(Duration::from_secs(timeout_minutes * 60), work).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!(
                    "Task timed out after {} minute(s)",
                    timeout_minutes
                )),
            }
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Task {} failed: {}", task.id, e);
                return Ok(self
                    .record_skip(&current, &task, e.to_string(), meter.snapshot())
                    .await);
            }
        };

        let check = self
            .checker
            .check(&task, &output.content, current.model_config.for_role(ModelRole::Checker))
            .await;
        meter.record(BudgetUsage::new(check.llm_calls, check.tokens_used, 0));
        let usage = meter.snapshot();

        let status = match check.status {
            CheckStatus::Approved => TaskStatus::Done,
            CheckStatus::NeedsReview => TaskStatus::NeedsReview,
        };
        let mut transition = TaskTransition::to(status)
            .details(format!("Checker confidence {}", check.confidence_score))
            .result(output.content)
            .confidence(check.confidence_score)
            .usage(usage)
            .artifacts(output.artifacts);
        if let Some(notes) = check.notes {
            if status == TaskStatus::NeedsReview {
                transition = transition.review_notes(notes);
            }
        }

        match self
            .store
            .transition_task_state(plan.id, task.id, transition)
            .await
        {
            Ok(_) => {
                if status == TaskStatus::NeedsReview {
                    tracing::warn!(
                        "Task {} flagged for review (confidence {})",
                        task.id,
                        check.confidence_score
                    );
                } else {
                    tracing::info!(
                        "Task {} done (confidence {})",
                        task.id,
                        check.confidence_score
                    );
                }
                self.events.emit(PlanEvent::TaskCompleted {
                    plan_id: plan.id,
                    task_id: task.id,
                    status,
                    confidence_score: Some(check.confidence_score),
                    skip_reason: None,
                });
                Ok(ExecutionResult {
                    success: true,
                    status: Some(status),
                    confidence_score: Some(check.confidence_score),
                    usage,
                    ..Default::default()
                })
            }
            Err(e) => {
                tracing::error!("Could not record result of task {}: {}", task.id, e);
                Ok(ExecutionResult {
                    success: false,
                    error: Some(format!("Failed to record task result: {}", e)),
                    usage,
                    ..Default::default()
                })
            }
        }
    }

    /// Move the task to `skipped` with `error`.
    async fn record_skip(
        &self,
        plan: &TaskPlan,
        task: &Task,
        error: String,
        usage: BudgetUsage,
    ) -> ExecutionResult {
        let transition = TaskTransition::to(TaskStatus::Skipped)
            .details("Execution failed")
            .error(error.clone())
            .usage(usage);

        let status = match self
            .store
            .transition_task_state(plan.id, task.id, transition)
            .await
        {
            Ok(_) => {
                self.events.emit(PlanEvent::TaskCompleted {
                    plan_id: plan.id,
                    task_id: task.id,
                    status: TaskStatus::Skipped,
                    confidence_score: None,
                    skip_reason: Some(error.clone()),
                });
                Some(TaskStatus::Skipped)
            }
            Err(e) => {
                tracing::error!("Could not mark task {} skipped: {}", task.id, e);
                None
            }
        };

        ExecutionResult {
            success: false,
            status,
            error: Some(error),
            usage,
            ..Default::default()
        }
    }

    async fn perform(
        &self,
        ctx: &ExecutionContext,
        plan: &TaskPlan,
        task: &Task,
        meter: &UsageMeter,
    ) -> anyhow::Result<WorkOutput> {
        let context = dependency_context(plan, task);

        if let Dispatch::Tool(tool) = detect_tool(task) {
            if self.tools.contains(tool).await {
                return self.run_tool(ctx, plan, task, tool, &context, meter).await;
            }
            tracing::warn!(
                "Task {} matched tool {} which is not registered, using the LLM instead",
                task.id,
                tool
            );
        }

        self.run_llm(plan, task, &context, meter).await
    }

    async fn run_tool(
        &self,
        ctx: &ExecutionContext,
        plan: &TaskPlan,
        task: &Task,
        tool: &str,
        context: &str,
        meter: &UsageMeter,
    ) -> anyhow::Result<WorkOutput> {
        self.events.emit(PlanEvent::ToolStart {
            plan_id: plan.id,
            task_id: task.id,
            tool: tool.to_string(),
        });
        if tool == WEB_SEARCH_TOOL {
            meter.record(BudgetUsage::new(0, 0, 1));
        }

        let result = self
            .tools
            .execute(ctx, tool, tool_args(tool, task, context))
            .await;

        let success = matches!(&result, Ok(output) if output.success);
        self.events.emit(PlanEvent::ToolEnd {
            plan_id: plan.id,
            task_id: task.id,
            tool: tool.to_string(),
            success,
        });

        let output = result?;
        if !output.success {
            anyhow::bail!("Tool {} failed: {}", tool, output.content);
        }

        for artifact in &output.artifacts {
            self.events.emit(PlanEvent::ArtifactProduced {
                plan_id: plan.id,
                task_id: task.id,
                artifact: artifact.clone(),
            });
        }

        Ok(WorkOutput {
            content: output.content,
            artifacts: output.artifacts,
        })
    }

    async fn run_llm(
        &self,
        plan: &TaskPlan,
        task: &Task,
        context: &str,
        meter: &UsageMeter,
    ) -> anyhow::Result<WorkOutput> {
        let mut prompt = format!(
            "Plan: {}\nTask type: {}\nTarget: {}\nInstructions: {}\n",
            plan.title, task.task_type, task.target, task.description
        );
        if !context.is_empty() {
            prompt.push_str(&format!("\nResults of earlier steps:\n{}", context));
        }

        // Counted before the call so a timeout still charges it
        meter.record(BudgetUsage::new(1, 0, 0));
        let generation = self
            .generator
            .generate(
                plan.model_config.for_role(ModelRole::Executor),
                &prompt,
                &GenerateOptions::system(EXECUTOR_SYSTEM_PROMPT),
            )
            .await?;
        meter.record(BudgetUsage::new(0, generation.tokens_used, 0));

        if generation.content.trim().is_empty() {
            anyhow::bail!("Model returned an empty result");
        }

        Ok(WorkOutput {
            content: generation.content,
            artifacts: Vec::new(),
        })
    }
}

/// Idempotent no-op result for a task that is no longer `pending`.
fn already(status: TaskStatus) -> ExecutionResult {
    ExecutionResult {
        success: true,
        status: Some(status),
        skip_reason: Some(format!("Task already {}", status)),
        ..Default::default()
    }
}

/// Results of the task's dependencies, one block per dependency.
fn dependency_context(plan: &TaskPlan, task: &Task) -> String {
    task.dependencies
        .iter()
        .filter_map(|id| plan.task(*id))
        .filter_map(|dep| {
            dep.result.as_deref().map(|result| {
                let truncated: String = result.chars().take(MAX_DEPENDENCY_CHARS).collect();
                format!("[Task {}: {}]\n{}\n", dep.id, dep.target, truncated)
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelConfig, ModelSpec};
    use crate::plan::{BudgetLimits, PlanMode, PlanOutcome, TaskType};
    use crate::store::{InMemoryPlanStore, StoreResult};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;
    use crate::testing::{drain, event_channel, RecordingTool, ScriptedGenerator};
    use crate::tools::{Tool, DOCUMENT_TOOL};
    use tokio::sync::mpsc;

    fn models() -> ModelConfig {
        ModelConfig {
            planner: ModelSpec::new("test", "planner"),
            executor: ModelSpec::new("test", "executor"),
            checker: ModelSpec::new("test", "checker"),
            summarizer: ModelSpec::new("test", "summarizer"),
        }
    }

    async fn setup(
        tasks: Vec<Task>,
        generator: ScriptedGenerator,
        tools: Vec<Arc<dyn Tool>>,
    ) -> (
        Executor,
        Arc<InMemoryPlanStore>,
        Arc<ScriptedGenerator>,
        TaskPlan,
        mpsc::UnboundedReceiver<PlanEvent>,
    ) {
        let store = Arc::new(InMemoryPlanStore::new());
        let plan = TaskPlan::new("thread", "user", "Test plan", tasks, BudgetLimits::default(), models());
        store.create_plan(&plan).await.unwrap();

        let generator = Arc::new(generator);
        let registry = Arc::new(ToolRegistry::new());
        registry.init(|| tools).await;
        let (tx, rx) = event_channel();
        let executor = Executor::new(
            store.clone(),
            generator.clone(),
            registry,
            Checker::new(generator.clone(), 80),
            Arc::new(tx),
        );
        (executor, store, generator, plan, rx)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("thread", "user")
    }

    /// Reads return a snapshot taken before another worker claimed the task.
    struct StaleReadStore {
        inner: InMemoryPlanStore,
        snapshot: TaskPlan,
    }

    #[async_trait]
    impl PlanStore for StaleReadStore {
        async fn create_plan(&self, plan: &TaskPlan) -> StoreResult<()> {
            self.inner.create_plan(plan).await
        }

        async fn get_plan(&self, _plan_id: Uuid) -> StoreResult<Option<TaskPlan>> {
            Ok(Some(self.snapshot.clone()))
        }

        async fn transition_task_state(
            &self,
            plan_id: Uuid,
            task_id: u32,
            transition: TaskTransition,
        ) -> StoreResult<Task> {
            self.inner
                .transition_task_state(plan_id, task_id, transition)
                .await
        }

        async fn increment_budget_usage(
            &self,
            plan_id: Uuid,
            delta: &BudgetUsage,
        ) -> StoreResult<()> {
            self.inner.increment_budget_usage(plan_id, delta).await
        }

        async fn finish_plan(&self, plan_id: Uuid, outcome: PlanOutcome) -> StoreResult<bool> {
            self.inner.finish_plan(plan_id, outcome).await
        }

        async fn list_active_plans(&self, mode: PlanMode) -> StoreResult<Vec<TaskPlan>> {
            self.inner.list_active_plans(mode).await
        }

        async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
            self.inner.delete_finished_before(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_llm_task_approved() {
        let generator = ScriptedGenerator::new(vec![])
            .with_model("executor", vec![Ok("three tiers found".into())])
            .with_model("checker", vec![Ok(r#"{"confidence": 92, "notes": "good"}"#.into())]);
        let task = Task::new(1, TaskType::Analyze, "pricing", "analyze pricing", vec![]);
        let (executor, store, _, plan, mut rx) = setup(vec![task.clone()], generator, vec![]).await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, Some(TaskStatus::Done));
        assert_eq!(result.usage.llm_calls, 2);

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        let stored = stored.task(1).unwrap();
        assert_eq!(stored.status, TaskStatus::Done);
        assert_eq!(stored.result.as_deref(), Some("three tiers found"));
        assert_eq!(stored.confidence_score, Some(92));
        assert_eq!(stored.state_history.len(), 2);

        let events = drain(&mut rx);
        assert!(matches!(events[0], PlanEvent::TaskStarted { task_id: 1, .. }));
        assert!(matches!(
            events.last(),
            Some(PlanEvent::TaskCompleted {
                status: TaskStatus::Done,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_second_call_is_a_no_op() {
        let generator = ScriptedGenerator::new(vec![])
            .with_model("executor", vec![Ok("result".into())])
            .with_model("checker", vec![Ok(r#"{"confidence": 95}"#.into())]);
        let task = Task::new(1, TaskType::Analyze, "x", "y", vec![]);
        let (executor, _, generator, plan, _rx) = setup(vec![task.clone()], generator, vec![]).await;

        executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        let calls = generator.calls();

        let again = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert!(again.success);
        assert_eq!(again.skip_reason.as_deref(), Some("Task already done"));
        assert_eq!(generator.calls(), calls);
    }

    #[tokio::test]
    async fn test_low_confidence_needs_review() {
        let generator = ScriptedGenerator::new(vec![])
            .with_model("executor", vec![Ok("partial answer".into())])
            .with_model("checker", vec![Ok(r#"{"confidence": 60, "notes": "incomplete"}"#.into())]);
        let task = Task::new(1, TaskType::Compare, "a vs b", "compare", vec![]);
        let (executor, store, _, plan, _rx) = setup(vec![task.clone()], generator, vec![]).await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, Some(TaskStatus::NeedsReview));

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        let stored = stored.task(1).unwrap();
        assert_eq!(stored.confidence_score, Some(60));
        assert_eq!(stored.review_notes.as_deref(), Some("incomplete"));
        assert_eq!(stored.result.as_deref(), Some("partial answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_skips_task() {
        let generator = ScriptedGenerator::new(vec![Ok("too late".into())])
            .with_delay(Duration::from_secs(10 * 60));
        let task = Task::new(1, TaskType::Analyze, "slow", "slow", vec![]);
        let (executor, store, _, plan, _rx) = setup(vec![task.clone()], generator, vec![]).await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, Some(TaskStatus::Skipped));
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(result.usage.llm_calls, 1);

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.task(1).unwrap().status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_llm_error_skips_task() {
        let generator =
            ScriptedGenerator::new(vec![]).with_model("executor", vec![Err(anyhow::anyhow!("503"))]);
        let task = Task::new(1, TaskType::Analyze, "x", "y", vec![]);
        let (executor, store, generator, plan, _rx) =
            setup(vec![task.clone()], generator, vec![]).await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert_eq!(result.status, Some(TaskStatus::Skipped));
        // Fail-fast: the executor model was called exactly once, the checker never
        assert_eq!(generator.models(), vec!["executor".to_string()]);

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.task(1).unwrap().error.as_deref(), Some("503"));
    }

    #[tokio::test]
    async fn test_search_tool_dispatch() {
        let tool = Arc::new(RecordingTool::new(WEB_SEARCH_TOOL, "ten results"));
        let generator = ScriptedGenerator::new(vec![])
            .with_model("checker", vec![Ok(r#"{"confidence": 85}"#.into())]);
        let task = Task::new(1, TaskType::Search, "rust jobs", "find openings", vec![]);
        let (executor, store, _, plan, mut rx) =
            setup(vec![task.clone()], generator, vec![tool.clone() as Arc<dyn Tool>]).await;

        let result = executor
            .execute_task(&ctx().with_category("careers"), &plan, &task)
            .await
            .unwrap();
        assert_eq!(result.status, Some(TaskStatus::Done));
        assert_eq!(result.usage.web_searches, 1);

        let calls = tool.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.plan_id, Some(plan.id));
        assert_eq!(calls[0].0.category_id.as_deref(), Some("careers"));
        assert_eq!(calls[0].1["query"], "rust jobs");

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.task(1).unwrap().web_searches, 1);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, PlanEvent::ToolEnd { success: true, .. })));
    }

    #[tokio::test]
    async fn test_document_tool_artifacts_forwarded() {
        let artifact = Artifact {
            kind: "document".into(),
            name: Some("report.pdf".into()),
            uri: Some("files/report.pdf".into()),
            metadata: serde_json::Value::Null,
        };
        let tool = Arc::new(RecordingTool::new(DOCUMENT_TOOL, "report.pdf created").with_artifact(artifact.clone()));
        let generator = ScriptedGenerator::new(vec![])
            .with_model("checker", vec![Ok(r#"{"confidence": 90}"#.into())]);
        let task = Task::new(1, TaskType::GenerateDocument, "Q3 report", "write it", vec![]);
        let (executor, store, _, plan, mut rx) = setup(vec![task.clone()], generator, vec![tool as Arc<dyn Tool>]).await;

        executor.execute_task(&ctx(), &plan, &task).await.unwrap();

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.task(1).unwrap().artifacts, vec![artifact.clone()]);
        let events = drain(&mut rx);
        assert!(events.contains(&PlanEvent::ArtifactProduced {
            plan_id: plan.id,
            task_id: 1,
            artifact,
        }));
    }

    #[tokio::test]
    async fn test_unsuccessful_tool_skips_task() {
        let tool = Arc::new(RecordingTool::new(DOCUMENT_TOOL, "renderer offline").unsuccessful());
        let task = Task::new(1, TaskType::GenerateDocument, "doc", "doc", vec![]);
        let (executor, store, generator, plan, _rx) =
            setup(vec![task.clone()], ScriptedGenerator::new(vec![]), vec![tool as Arc<dyn Tool>]).await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert_eq!(result.status, Some(TaskStatus::Skipped));
        assert_eq!(generator.calls(), 0);
        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        assert!(stored
            .task(1)
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .contains("renderer offline"));
    }

    #[tokio::test]
    async fn test_unregistered_tool_falls_back_to_llm() {
        let generator = ScriptedGenerator::new(vec![])
            .with_model("executor", vec![Ok("described image".into())])
            .with_model("checker", vec![Ok(r#"{"confidence": 81}"#.into())]);
        let task = Task::new(1, TaskType::GenerateImage, "logo", "a fox", vec![]);
        let (executor, _, generator, plan, _rx) = setup(vec![task.clone()], generator, vec![]).await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert_eq!(result.status, Some(TaskStatus::Done));
        assert_eq!(generator.models()[0], "executor");
    }

    #[tokio::test]
    async fn test_dependency_results_in_prompt() {
        let generator = ScriptedGenerator::new(vec![])
            .with_model("executor", vec![Ok("first".into()), Ok("second".into())])
            .with_model(
                "checker",
                vec![Ok(r#"{"confidence": 90}"#.into()), Ok(r#"{"confidence": 90}"#.into())],
            );
        let first = Task::new(1, TaskType::Analyze, "market", "size it", vec![]);
        let second = Task::new(2, TaskType::Compare, "players", "compare", vec![1]);
        let (executor, _, generator, plan, _rx) =
            setup(vec![first.clone(), second.clone()], generator, vec![]).await;

        executor.execute_task(&ctx(), &plan, &first).await.unwrap();
        executor.execute_task(&ctx(), &plan, &second).await.unwrap();

        let prompts = generator.prompts();
        let second_prompt = &prompts[2];
        assert!(second_prompt.contains("[Task 1: market]"));
        assert!(second_prompt.contains("first"));
    }

    #[tokio::test]
    async fn test_task_claimed_elsewhere_is_left_alone() {
        let task = Task::new(1, TaskType::Analyze, "x", "y", vec![]);
        let plan = TaskPlan::new("thread", "user", "Race", vec![task.clone()], BudgetLimits::default(), models());
        let inner = InMemoryPlanStore::new();
        inner.create_plan(&plan).await.unwrap();
        inner
            .transition_task_state(plan.id, 1, TaskTransition::to(TaskStatus::Running))
            .await
            .unwrap();
        let store = Arc::new(StaleReadStore {
            inner,
            snapshot: plan.clone(),
        });

        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let (tx, mut rx) = event_channel();
        let executor = Executor::new(
            store.clone(),
            generator.clone(),
            Arc::new(ToolRegistry::new()),
            Checker::new(generator.clone(), 80),
            Arc::new(tx),
        );

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, Some(TaskStatus::Running));
        assert_eq!(result.skip_reason.as_deref(), Some("Task already running"));
        assert_eq!(generator.calls(), 0);
        assert!(drain(&mut rx).is_empty());

        let stored = store.inner.get_plan(plan.id).await.unwrap().unwrap();
        let stored = stored.task(1).unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.error, None);
        assert_eq!(stored.state_history.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_error_skips_task_and_keeps_usage() {
        let tool = Arc::new(RecordingTool::new(WEB_SEARCH_TOOL, "").failing("search quota exhausted"));
        let task = Task::new(1, TaskType::Search, "rust jobs", "find openings", vec![]);
        let (executor, store, generator, plan, mut rx) = setup(
            vec![task.clone()],
            ScriptedGenerator::new(vec![]),
            vec![tool.clone() as Arc<dyn Tool>],
        )
        .await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, Some(TaskStatus::Skipped));
        assert_eq!(result.error.as_deref(), Some("search quota exhausted"));
        assert_eq!(result.usage.web_searches, 1);
        assert_eq!(tool.calls().len(), 1);
        assert_eq!(generator.calls(), 0);

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        let stored = stored.task(1).unwrap();
        assert_eq!(stored.status, TaskStatus::Skipped);
        assert_eq!(stored.error.as_deref(), Some("search quota exhausted"));
        assert_eq!(stored.web_searches, 1);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, PlanEvent::ToolEnd { success: false, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tool_times_out() {
        let tool = Arc::new(
            RecordingTool::new(WEB_SEARCH_TOOL, "late results").with_delay(Duration::from_secs(10 * 60)),
        );
        let task = Task::new(1, TaskType::Search, "rust jobs", "find openings", vec![]);
        let (executor, store, generator, plan, _rx) = setup(
            vec![task.clone()],
            ScriptedGenerator::new(vec![]),
            vec![tool as Arc<dyn Tool>],
        )
        .await;

        let result = executor.execute_task(&ctx(), &plan, &task).await.unwrap();
        assert_eq!(result.status, Some(TaskStatus::Skipped));
        assert_eq!(
            result.error.as_deref(),
            Some("Task timed out after 5 minute(s)")
        );
        assert_eq!(result.usage.web_searches, 1);
        assert_eq!(generator.calls(), 0);

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        let stored = stored.task(1).unwrap();
        assert_eq!(stored.status, TaskStatus::Skipped);
        assert!(stored.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(stored.web_searches, 1);
    }
}
