//! Orchestrator - the plan lifecycle and the main control loop.
//!
//! # Key Concepts
//! - Plan states: `active` moves to `completed`, `failed` or `cancelled`
//!   exactly once
//! - The loop reloads the plan from the store at the top of every iteration
//!   and holds no state of its own, so a restarted process can pick any plan
//!   up again
//! - One task in flight per plan; the global budget is checked before and
//!   after every task, the duration ceiling against the current run's clock
//! - Fatal conditions always leave the plan terminal with a readable message

mod recovery;
mod summarizer;

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::budget::{BudgetCheck, BudgetTracker};
use crate::checker::Checker;
use crate::config::OrchestratorConfig;
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{EventSink, PlanEvent};
use crate::executor::Executor;
use crate::llm::{Generator, ModelRole};
use crate::plan::{
    detect_stuck_plan, select_next_task, PlanOutcome, PlanStatus, TaskPlan, TaskStatus,
};
use crate::planner::{PlanRequest, Planner};
use crate::store::{PlanStore, StoreError};
use crate::tools::ToolRegistry;

pub use recovery::{recover_stalled_tasks, RecoveryReport};
pub use summarizer::{PlanSummary, Summarizer};

pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn PlanStore>,
    planner: Planner,
    executor: Executor,
    summarizer: Summarizer,
    budget: BudgetTracker,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn PlanStore>,
        generator: Arc<dyn Generator>,
        tools: Arc<ToolRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let checker = Checker::new(generator.clone(), config.approval_threshold);
        Self {
            planner: Planner::new(generator.clone()),
            executor: Executor::new(
                store.clone(),
                generator.clone(),
                tools,
                checker,
                events.clone(),
            ),
            summarizer: Summarizer::new(generator),
            budget: BudgetTracker::new(config.budget, store.clone()),
            config,
            store,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// Plan `request` and persist the result. Nothing is written unless the
    /// planner output parsed and the graph validated.
    pub async fn create_plan(
        &self,
        ctx: &ExecutionContext,
        request: &PlanRequest,
    ) -> OrchestratorResult<TaskPlan> {
        let check = self.budget.check_budget(None, None).await?;
        if check.exceeded {
            let error = budget_error(&check);
            self.events.emit(PlanEvent::Error {
                plan_id: None,
                message: error.to_string(),
            });
            return Err(error);
        }

        let planned = match self
            .planner
            .plan(request, self.config.models.for_role(ModelRole::Planner))
            .await
        {
            Ok(planned) => planned,
            Err(e) => {
                tracing::error!("Plan creation failed: {}", e);
                self.events.emit(PlanEvent::Error {
                    plan_id: None,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut plan = TaskPlan::new(
            ctx.thread_id.clone(),
            ctx.user_id.clone(),
            planned.title,
            planned.tasks,
            self.config.budget,
            self.config.models.clone(),
        );
        plan.budget_used = planned.usage;
        self.store.create_plan(&plan).await?;

        tracing::info!(
            "Created plan {} '{}' with {} tasks",
            plan.id,
            plan.title,
            plan.tasks.len()
        );
        self.events.emit(PlanEvent::PlanCreated {
            plan_id: plan.id,
            title: plan.title.clone(),
            task_count: plan.tasks.len(),
        });
        Ok(plan)
    }

    /// Plan and run `request` in one go.
    pub async fn run_request(
        &self,
        ctx: &ExecutionContext,
        request: &PlanRequest,
    ) -> OrchestratorResult<TaskPlan> {
        let plan = self.create_plan(ctx, request).await?;
        self.run_plan(ctx, plan.id).await
    }

    /// Drive `plan_id` until it is terminal. Returns the final snapshot for
    /// completed and cancelled plans. Any fatal error marks the plan failed
    /// before it is returned. The duration ceiling is measured from this call.
    pub async fn run_plan(
        &self,
        ctx: &ExecutionContext,
        plan_id: Uuid,
    ) -> OrchestratorResult<TaskPlan> {
        let started_at = Instant::now();
        match self.drive(ctx, plan_id, started_at).await {
            Ok(plan) => Ok(plan),
            Err(e @ OrchestratorError::PlanNotFound(_)) => Err(e),
            Err(e) => Err(self.abort(plan_id, e).await),
        }
    }

    async fn drive(
        &self,
        ctx: &ExecutionContext,
        plan_id: Uuid,
        started_at: Instant,
    ) -> OrchestratorResult<TaskPlan> {
        for iteration in 0..self.config.max_iterations {
            let plan = self.load(plan_id).await?;
            if plan.status.is_terminal() {
                tracing::info!("Plan {} is {}, stopping", plan_id, plan.status);
                return Ok(plan);
            }

            let check = self.budget.check_budget(None, Some(started_at)).await?;
            self.emit_warnings(plan_id, &check);
            if check.exceeded {
                return Err(self.budget_exceeded(plan_id, &check));
            }

            let Some(task) = select_next_task(&plan.tasks).cloned() else {
                if plan.all_tasks_terminal() {
                    return self.complete(plan).await;
                }
                let report = detect_stuck_plan(&plan.tasks);
                let error = if report.is_stuck {
                    OrchestratorError::StuckPlan {
                        reason: report.reason.unwrap_or_default(),
                        stuck_task_ids: report.stuck_task_ids,
                        suggestions: report.suggestions,
                    }
                } else {
                    OrchestratorError::Execution(
                        "No task is ready but the plan is neither finished nor stuck".to_string(),
                    )
                };
                return Err(error);
            };

            tracing::debug!(
                "Plan {} iteration {}: running task {}",
                plan_id,
                iteration,
                task.id
            );
            let result = self.executor.execute_task(ctx, &plan, &task).await?;

            if !result.usage.is_zero() {
                self.store
                    .increment_budget_usage(plan_id, &result.usage)
                    .await?;
            }

            let check = self.budget.check_budget(None, Some(started_at)).await?;
            self.emit_warnings(plan_id, &check);
            if check.exceeded {
                return Err(self.budget_exceeded(plan_id, &check));
            }

            match result.status {
                Some(TaskStatus::Done) => {}
                Some(TaskStatus::Skipped) | Some(TaskStatus::NeedsReview) => {
                    tracing::info!(
                        "Task {} ended {}, continuing plan {}",
                        task.id,
                        result.status.map(|s| s.as_str()).unwrap_or_default(),
                        plan_id
                    );
                }
                _ if result.success && result.skip_reason.is_some() => {
                    tracing::info!(
                        "Task {}: {}",
                        task.id,
                        result.skip_reason.as_deref().unwrap_or_default()
                    );
                }
                _ => {
                    let message = result
                        .error
                        .unwrap_or_else(|| format!("Task {} ended in an unexpected state", task.id));
                    return Err(OrchestratorError::Execution(message));
                }
            }
        }

        Err(OrchestratorError::IterationLimit(self.config.max_iterations))
    }

    /// Cancel an active plan. A task already executing finishes, nothing new
    /// is started. Returns `false` if the plan was already terminal.
    pub async fn cancel_plan(&self, plan_id: Uuid, reason: &str) -> OrchestratorResult<bool> {
        let cancelled = self
            .store
            .finish_plan(
                plan_id,
                PlanOutcome::Cancelled {
                    reason: reason.to_string(),
                },
            )
            .await
            .map_err(not_found)?;
        if cancelled {
            tracing::info!("Plan {} cancelled: {}", plan_id, reason);
            self.events.emit(PlanEvent::PlanCompleted {
                plan_id,
                status: PlanStatus::Cancelled,
                summary: None,
            });
        }
        Ok(cancelled)
    }

    /// Startup sweep: skip tasks left `running` longer than the grace period.
    pub async fn recover_stalled_tasks(&self) -> OrchestratorResult<RecoveryReport> {
        Ok(recover_stalled_tasks(
            self.store.as_ref(),
            self.config.recovery_grace(),
            Utc::now(),
        )
        .await?)
    }

    /// Hard-delete terminal plans that finished more than `retention` ago.
    pub async fn purge_finished_plans(
        &self,
        retention: chrono::Duration,
    ) -> OrchestratorResult<usize> {
        let deleted = self
            .store
            .delete_finished_before(Utc::now() - retention)
            .await?;
        if deleted > 0 {
            tracing::info!("Purged {} finished plan(s)", deleted);
        }
        Ok(deleted)
    }

    async fn load(&self, plan_id: Uuid) -> OrchestratorResult<TaskPlan> {
        self.store
            .get_plan(plan_id)
            .await?
            .ok_or(OrchestratorError::PlanNotFound(plan_id))
    }

    async fn complete(&self, plan: TaskPlan) -> OrchestratorResult<TaskPlan> {
        let summary = self.summarizer.summarize(&plan).await?;
        self.store
            .increment_budget_usage(plan.id, &summary.usage)
            .await?;

        let finished = self
            .store
            .finish_plan(
                plan.id,
                PlanOutcome::Completed {
                    summary: summary.text.clone(),
                },
            )
            .await?;
        let plan = self.load(plan.id).await?;
        if finished {
            let stats = plan.stats();
            tracing::info!(
                "Plan {} completed: {} done, {} need review, {} skipped",
                plan.id,
                stats.done,
                stats.needs_review,
                stats.skipped
            );
            self.events.emit(PlanEvent::PlanCompleted {
                plan_id: plan.id,
                status: PlanStatus::Completed,
                summary: Some(summary.text),
            });
        }
        Ok(plan)
    }

    fn emit_warnings(&self, plan_id: Uuid, check: &BudgetCheck) {
        for warning in &check.warnings {
            self.events.emit(PlanEvent::BudgetWarning {
                plan_id,
                budget_type: warning.budget_type,
                level: warning.level,
                ratio: warning.ratio,
            });
        }
    }

    fn budget_exceeded(&self, plan_id: Uuid, check: &BudgetCheck) -> OrchestratorError {
        let error = budget_error(check);
        if let OrchestratorError::BudgetExceeded {
            budget_type,
            message,
        } = &error
        {
            self.events.emit(PlanEvent::BudgetExceeded {
                plan_id,
                budget_type: *budget_type,
                message: message.clone(),
            });
        }
        error
    }

    /// Mark the plan failed with `error` and hand the error back.
    async fn abort(&self, plan_id: Uuid, error: OrchestratorError) -> OrchestratorError {
        tracing::error!("Plan {} failed: {}", plan_id, error);
        match self
            .store
            .finish_plan(
                plan_id,
                PlanOutcome::Failed {
                    reason: error.to_string(),
                },
            )
            .await
        {
            Ok(true) => {
                self.events.emit(PlanEvent::Error {
                    plan_id: Some(plan_id),
                    message: error.to_string(),
                });
                self.events.emit(PlanEvent::PlanCompleted {
                    plan_id,
                    status: PlanStatus::Failed,
                    summary: None,
                });
            }
            Ok(false) => {}
            Err(e) => tracing::error!("Could not mark plan {} failed: {}", plan_id, e),
        }
        error
    }
}

fn budget_error(check: &BudgetCheck) -> OrchestratorError {
    match check.budget_type {
        Some(budget_type) => OrchestratorError::BudgetExceeded {
            budget_type,
            message: check
                .message
                .clone()
                .unwrap_or_else(|| format!("{} budget exceeded", budget_type)),
        },
        None => OrchestratorError::Execution("Budget check failed".to_string()),
    }
}

fn not_found(e: StoreError) -> OrchestratorError {
    match e {
        StoreError::PlanNotFound(id) => OrchestratorError::PlanNotFound(id),
        other => OrchestratorError::Store(other),
    }
}
