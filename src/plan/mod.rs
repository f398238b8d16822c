//! Plan module - task plans, tasks, and their lifecycle states.
//!
//! A [`TaskPlan`] is created once, after the planner produced a task list and the
//! dependency graph validated. From then on it only changes through named
//! transitions applied by a [`crate::store::PlanStore`]:
//! - [`TaskTransition`] moves a single task forward and appends to its history
//! - [`BudgetUsage`] deltas are added to the plan's counters
//! - [`PlanOutcome`] moves the plan into a terminal status exactly once

pub mod graph;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::ModelConfig;

pub use graph::{
    detect_stuck_plan, find_ready_tasks, select_next_task, topological_sort, validate, GraphError,
    StuckPlanReport, ValidationReport,
};

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Analyze,
    Search,
    Compare,
    Generate,
    Summarize,
    Extract,
    Validate,
    /// Produce a document artifact through the document tool
    GenerateDocument,
    /// Produce an image artifact through the image tool
    GenerateImage,
}

impl TaskType {
    pub const ALL: [TaskType; 9] = [
        Self::Analyze,
        Self::Search,
        Self::Compare,
        Self::Generate,
        Self::Summarize,
        Self::Extract,
        Self::Validate,
        Self::GenerateDocument,
        Self::GenerateImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Search => "search",
            Self::Compare => "compare",
            Self::Generate => "generate",
            Self::Summarize => "summarize",
            Self::Extract => "extract",
            Self::Validate => "validate",
            Self::GenerateDocument => "generate_document",
            Self::GenerateImage => "generate_image",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
    NeedsReview,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::NeedsReview => "needs_review",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Skipped | Self::NeedsReview
        )
    }

    /// Statuses that satisfy a dependency.
    ///
    /// `NeedsReview` is included: a low-confidence result unblocks dependents
    /// exactly like an approved one.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::NeedsReview)
    }

    /// Forward-only transition table.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (Running, Done)
                | (Running, NeedsReview)
                | (Running, Skipped)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Used as the primary tie-break among ready tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// Lifecycle status of a plan. Everything except `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a plan is driven. Only autonomous plans count toward the global budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    #[default]
    Autonomous,
    Interactive,
}

impl PlanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Interactive => "interactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "autonomous" => Some(Self::Autonomous),
            "interactive" => Some(Self::Interactive),
            _ => None,
        }
    }
}

/// Resource ceilings. A ceiling of 0 disables that check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub max_llm_calls: u64,
    pub max_tokens: u64,
    pub max_web_searches: u64,
    pub max_duration_minutes: u64,
    pub task_timeout_minutes: u64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_llm_calls: 50,
            max_tokens: 200_000,
            max_web_searches: 20,
            max_duration_minutes: 30,
            task_timeout_minutes: 5,
        }
    }
}

/// Accumulated resource usage. Counters only ever grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub llm_calls: u64,
    pub tokens_used: u64,
    pub web_searches: u64,
}

impl BudgetUsage {
    pub fn new(llm_calls: u64, tokens_used: u64, web_searches: u64) -> Self {
        Self {
            llm_calls,
            tokens_used,
            web_searches,
        }
    }

    pub fn add(&mut self, other: &BudgetUsage) {
        self.llm_calls = self.llm_calls.saturating_add(other.llm_calls);
        self.tokens_used = self.tokens_used.saturating_add(other.tokens_used);
        self.web_searches = self.web_searches.saturating_add(other.web_searches);
    }

    pub fn is_zero(&self) -> bool {
        self.llm_calls == 0 && self.tokens_used == 0 && self.web_searches == 0
    }
}

impl std::iter::Sum for BudgetUsage {
    fn sum<I: Iterator<Item = BudgetUsage>>(iter: I) -> Self {
        iter.fold(BudgetUsage::default(), |mut acc, u| {
            acc.add(&u);
            acc
        })
    }
}

/// One entry in a task's append-only state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Opaque artifact metadata produced by a tool and forwarded upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// A unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub target: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_calls: Option<u64>,
    #[serde(default)]
    pub web_searches: u64,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub state_history: Vec<StateTransition>,
}

impl Task {
    /// Create a pending task with an empty history.
    pub fn new(
        id: u32,
        task_type: TaskType,
        target: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<u32>,
    ) -> Self {
        Self {
            id,
            task_type,
            target: target.into(),
            description: description.into(),
            dependencies,
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            result: None,
            error: None,
            confidence_score: None,
            review_notes: None,
            tokens_used: None,
            llm_calls: None,
            web_searches: 0,
            artifacts: Vec::new(),
            state_history: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// The most recent history entry, if any.
    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.state_history.last()
    }

    /// Apply a transition in place.
    ///
    /// Rejects anything the forward-only table does not allow and leaves the
    /// task untouched in that case. On success exactly one history entry is
    /// appended.
    pub fn apply(&mut self, transition: TaskTransition) -> Result<(), TaskStatus> {
        if !self.status.can_transition_to(transition.status) {
            return Err(self.status);
        }

        self.status = transition.status;
        if let Some(result) = transition.result {
            self.result = Some(result);
        }
        if let Some(error) = transition.error {
            self.error = Some(error);
        }
        if let Some(score) = transition.confidence_score {
            self.confidence_score = Some(score.min(100));
        }
        if let Some(notes) = transition.review_notes {
            self.review_notes = Some(notes);
        }
        if let Some(usage) = transition.usage {
            self.tokens_used = Some(self.tokens_used.unwrap_or(0).saturating_add(usage.tokens_used));
            self.llm_calls = Some(self.llm_calls.unwrap_or(0).saturating_add(usage.llm_calls));
            self.web_searches = self.web_searches.saturating_add(usage.web_searches);
        }
        self.artifacts.extend(transition.artifacts);
        self.state_history.push(StateTransition {
            status: transition.status,
            timestamp: transition.timestamp,
            details: transition.details,
        });
        Ok(())
    }
}

/// A forward move of one task, with whatever fields the move records.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub confidence_score: Option<u8>,
    pub review_notes: Option<String>,
    pub usage: Option<BudgetUsage>,
    pub artifacts: Vec<Artifact>,
}

impl TaskTransition {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            details: None,
            result: None,
            error: None,
            confidence_score: None,
            review_notes: None,
            usage: None,
            artifacts: Vec::new(),
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn confidence(mut self, score: u8) -> Self {
        self.confidence_score = Some(score);
        self
    }

    pub fn review_notes(mut self, notes: impl Into<String>) -> Self {
        self.review_notes = Some(notes.into());
        self
    }

    pub fn usage(mut self, usage: BudgetUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// How a plan leaves the `active` status.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Completed { summary: String },
    Failed { reason: String },
    Cancelled { reason: String },
}

impl PlanOutcome {
    pub fn status(&self) -> PlanStatus {
        match self {
            Self::Completed { .. } => PlanStatus::Completed,
            Self::Failed { .. } => PlanStatus::Failed,
            Self::Cancelled { .. } => PlanStatus::Cancelled,
        }
    }
}

/// A persisted plan: an ordered task DAG plus budget and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: Uuid,
    pub thread_id: String,
    pub user_id: String,
    pub title: String,
    pub tasks: Vec<Task>,
    pub status: PlanStatus,
    #[serde(default)]
    pub mode: PlanMode,
    pub budget_limits: BudgetLimits,
    #[serde(default)]
    pub budget_used: BudgetUsage,
    pub model_config: ModelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPlan {
    pub fn new(
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        tasks: Vec<Task>,
        budget_limits: BudgetLimits,
        model_config: ModelConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            title: title.into(),
            tasks,
            status: PlanStatus::Active,
            mode: PlanMode::Autonomous,
            budget_limits,
            budget_used: BudgetUsage::default(),
            model_config,
            summary: None,
            status_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn task(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u32) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Apply a terminal outcome. Returns `false` if the plan was already terminal.
    pub fn finish(&mut self, outcome: PlanOutcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = outcome.status();
        match outcome {
            PlanOutcome::Completed { summary } => self.summary = Some(summary),
            PlanOutcome::Failed { reason } | PlanOutcome::Cancelled { reason } => {
                self.status_message = Some(reason)
            }
        }
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    /// Per-status task counts, in a fixed order.
    pub fn stats(&self) -> PlanStats {
        let mut stats = PlanStats {
            total: self.tasks.len(),
            ..Default::default()
        };
        let mut confidence_sum = 0u64;
        let mut scored = 0u64;
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
                TaskStatus::NeedsReview => stats.needs_review += 1,
            }
            if let Some(score) = task.confidence_score {
                confidence_sum += score as u64;
                scored += 1;
            }
        }
        if scored > 0 {
            stats.average_confidence = Some((confidence_sum / scored) as u8);
        }
        stats
    }
}

/// Aggregate task counts for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub needs_review: usize,
    pub average_confidence: Option<u8>,
}
