//! Planner - turns a free-text request into a validated task DAG.
//!
//! The planner model answers with `{title, tasks: [...], context?}`. The answer
//! goes through the response parser (one repair attempt), is converted into
//! pending [`Task`]s and then has to pass graph validation. Nothing is
//! persisted here; a failure at any step means no plan exists.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::llm::{GenerateOptions, Generator, ModelSpec};
use crate::parser::{parse_with_repair, Field, RepairOptions, Schema};
use crate::plan::{validate, BudgetUsage, Task, TaskPriority, TaskType};

/// Upper bound on tasks per plan.
pub const MAX_TASKS: usize = 10;

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant. Break the user's request \
into a small set of concrete tasks with explicit dependencies. Respond with JSON only.";

/// Input to the planner.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub text: String,
    /// Excerpt from retrieved documents, if any
    pub retrieval_excerpt: Option<String>,
    /// Recent conversation turns, oldest first
    pub history: Vec<String>,
    pub category_hints: Vec<String>,
}

impl PlanRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A validated task list, ready to become a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTasks {
    pub title: String,
    pub tasks: Vec<Task>,
    pub context: Option<String>,
    pub warnings: Vec<String>,
    /// What planning cost, repair included
    pub usage: BudgetUsage,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    title: String,
    tasks: Vec<RawTask>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: u32,
    #[serde(rename = "type")]
    task_type: TaskType,
    target: String,
    description: String,
    #[serde(default)]
    priority: Option<TaskPriority>,
    #[serde(default)]
    dependencies: Vec<u32>,
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        Task::new(
            raw.id,
            raw.task_type,
            raw.target,
            raw.description,
            raw.dependencies,
        )
        .with_priority(raw.priority.unwrap_or_default())
    }
}

fn plan_schema() -> Schema {
    let task = Schema::Object(vec![
        Field::required("id", Schema::positive_integer()),
        Field::required("type", Schema::one_of(TaskType::ALL.iter().map(|t| t.as_str()))),
        Field::required("target", Schema::non_empty_string()),
        Field::required("description", Schema::non_empty_string()),
        Field::optional("priority", Schema::one_of(["high", "medium", "low"])),
        Field::optional("dependencies", Schema::array(Schema::positive_integer())),
    ]);
    Schema::Object(vec![
        Field::required("title", Schema::non_empty_string()),
        Field::required("tasks", Schema::bounded_array(task, 1, MAX_TASKS)),
        Field::optional("context", Schema::string()),
    ])
}

fn planning_prompt(request: &PlanRequest) -> String {
    let mut prompt = format!("Request:\n{}\n", request.text.trim());

    if let Some(excerpt) = request.retrieval_excerpt.as_deref().filter(|e| !e.is_empty()) {
        prompt.push_str(&format!("\nRelevant documents:\n{}\n", excerpt));
    }
    if !request.history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for turn in &request.history {
            prompt.push_str(&format!("- {}\n", turn));
        }
    }
    if !request.category_hints.is_empty() {
        prompt.push_str(&format!(
            "\nCategory hints: {}\n",
            request.category_hints.join(", ")
        ));
    }

    let types: Vec<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
    prompt.push_str(&format!(
        "\nProduce between 3 and {} tasks. Task types: {}.\n\
         Each task has a unique positive integer id. `dependencies` lists the ids \
         of tasks that must finish first; at least one task must have none.\n\
         Respond with JSON only:\n\
         {{\"title\": \"...\", \"tasks\": [{{\"id\": 1, \"type\": \"search\", \"target\": \"...\", \
         \"description\": \"...\", \"priority\": \"high|medium|low\", \"dependencies\": []}}], \
         \"context\": \"...\"}}",
        MAX_TASKS,
        types.join(", ")
    ));
    prompt
}

pub struct Planner {
    generator: Arc<dyn Generator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Plan `request` with `model`. Returns a validated task list or an error;
    /// never a partial plan.
    pub async fn plan(
        &self,
        request: &PlanRequest,
        model: &ModelSpec,
    ) -> OrchestratorResult<PlannedTasks> {
        let prompt = planning_prompt(request);
        tracing::debug!("Planner prompt ({} chars) to {}", prompt.len(), model);

        let generation = self
            .generator
            .generate(
                model,
                &prompt,
                &GenerateOptions::system(PLANNER_SYSTEM_PROMPT).temperature(0.2),
            )
            .await
            .map_err(|e| OrchestratorError::Llm(e.to_string()))?;

        let parsed = parse_with_repair::<RawPlan>(
            &generation.content,
            &plan_schema(),
            RepairOptions::with_repairer(self.generator.as_ref(), model),
        )
        .await?;

        let usage = BudgetUsage::new(
            1 + parsed.repair_calls,
            generation.tokens_used + parsed.repair_tokens,
            0,
        );

        let RawPlan {
            title,
            tasks,
            context,
        } = parsed.value;
        let tasks: Vec<Task> = tasks.into_iter().map(Task::from).collect();

        let report = validate(&tasks);
        if !report.valid {
            tracing::warn!("Planner produced an invalid graph: {}", report.error_message());
            return Err(OrchestratorError::Validation(report.errors));
        }
        for warning in &report.warnings {
            tracing::warn!("Plan '{}': {}", title, warning);
        }

        tracing::info!("Planned '{}' with {} tasks", title, tasks.len());
        Ok(PlannedTasks {
            title,
            tasks,
            context,
            warnings: report.warnings,
            usage,
        })
    }
}
