//! Plan-level error taxonomy.
//!
//! Task-level failures never show up here: the executor turns them into task
//! state. These are the conditions that stop a plan (or stop one from being
//! created).

use thiserror::Error;
use uuid::Uuid;

use crate::budget::BudgetType;
use crate::parser::ParseFailure;
use crate::plan::GraphError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed or cyclic task graph. Not retryable.
    #[error("Invalid task graph: {}", join_errors(.0))]
    Validation(Vec<GraphError>),

    /// Model output stayed unparseable after the repair attempt.
    #[error("Could not parse model output: {0}")]
    Parse(#[from] ParseFailure),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Budget exceeded ({budget_type}): {message}")]
    BudgetExceeded {
        budget_type: BudgetType,
        message: String,
    },

    #[error("Plan is stuck: {reason}")]
    StuckPlan {
        reason: String,
        stuck_task_ids: Vec<u32>,
        suggestions: Vec<String>,
    },

    #[error("Summary failed: {0}")]
    Summary(String),

    #[error("Plan {0} not found")]
    PlanNotFound(Uuid),

    #[error("Plan did not finish within {0} iterations")]
    IterationLimit(usize),

    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join_errors(errors: &[GraphError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
