//! Plan persistence.
//!
//! Every mutation is a named, individually persisted operation: a task moves
//! forward, usage counters grow, or a plan reaches a terminal outcome. There
//! is no batching and no authoritative in-memory cache above the store, so a
//! restarted process sees exactly what was last written.

mod memory;
mod sqlite;

pub use memory::InMemoryPlanStore;
pub use sqlite::SqlitePlanStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::plan::{BudgetUsage, PlanMode, PlanOutcome, Task, TaskPlan, TaskStatus, TaskTransition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Plan {0} not found")]
    PlanNotFound(Uuid),

    #[error("Task {task_id} not found in plan {plan_id}")]
    TaskNotFound { plan_id: Uuid, task_id: u32 },

    #[error("Plan {0} already exists")]
    DuplicatePlan(Uuid),

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: u32,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Plan {0} is no longer active")]
    PlanNotActive(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable plan and task state.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Persist a freshly created plan.
    async fn create_plan(&self, plan: &TaskPlan) -> StoreResult<()>;

    async fn get_plan(&self, plan_id: Uuid) -> StoreResult<Option<TaskPlan>>;

    /// Move one task forward and append to its history. Transitions the
    /// forward-only table rejects fail with [`StoreError::InvalidTransition`]
    /// and leave the task untouched.
    async fn transition_task_state(
        &self,
        plan_id: Uuid,
        task_id: u32,
        transition: TaskTransition,
    ) -> StoreResult<Task>;

    /// Atomically add `delta` to the plan's usage counters.
    async fn increment_budget_usage(&self, plan_id: Uuid, delta: &BudgetUsage) -> StoreResult<()>;

    /// Move the plan into a terminal status. Returns `false` and writes
    /// nothing if it is already terminal.
    async fn finish_plan(&self, plan_id: Uuid, outcome: PlanOutcome) -> StoreResult<bool>;

    /// All plans with `status=active` in the given mode.
    async fn list_active_plans(&self, mode: PlanMode) -> StoreResult<Vec<TaskPlan>>;

    /// Hard-delete terminal plans finished before `cutoff`. Used by retention
    /// sweeps only.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Shared apply step for backends that load a task, mutate it and write it back.
pub(crate) fn apply_transition(
    task: &mut Task,
    transition: TaskTransition,
) -> StoreResult<()> {
    let to = transition.status;
    task.apply(transition)
        .map_err(|from| StoreError::InvalidTransition {
            task_id: task.id,
            from,
            to,
        })
}
