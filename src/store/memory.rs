//! In-process plan store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{apply_transition, PlanStore, StoreError, StoreResult};
use crate::plan::{BudgetUsage, PlanMode, PlanOutcome, PlanStatus, Task, TaskPlan, TaskTransition};

/// Plans held in a map behind a lock. Each operation takes the write lock
/// for its whole read-modify-write, which makes it atomic per call.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<HashMap<Uuid, TaskPlan>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plans.read().await.is_empty()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn create_plan(&self, plan: &TaskPlan) -> StoreResult<()> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(StoreError::DuplicatePlan(plan.id));
        }
        plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> StoreResult<Option<TaskPlan>> {
        Ok(self.plans.read().await.get(&plan_id).cloned())
    }

    async fn transition_task_state(
        &self,
        plan_id: Uuid,
        task_id: u32,
        transition: TaskTransition,
    ) -> StoreResult<Task> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        let task = plan
            .task_mut(task_id)
            .ok_or(StoreError::TaskNotFound { plan_id, task_id })?;
        apply_transition(task, transition)?;
        let task = task.clone();
        plan.updated_at = Utc::now();
        Ok(task)
    }

    async fn increment_budget_usage(&self, plan_id: Uuid, delta: &BudgetUsage) -> StoreResult<()> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        plan.budget_used.add(delta);
        plan.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_plan(&self, plan_id: Uuid, outcome: PlanOutcome) -> StoreResult<bool> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        Ok(plan.finish(outcome))
    }

    async fn list_active_plans(&self, mode: PlanMode) -> StoreResult<Vec<TaskPlan>> {
        let plans = self.plans.read().await;
        let mut active: Vec<TaskPlan> = plans
            .values()
            .filter(|p| p.status == PlanStatus::Active && p.mode == mode)
            .cloned()
            .collect();
        active.sort_by_key(|p| p.created_at);
        Ok(active)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut plans = self.plans.write().await;
        let before = plans.len();
        plans.retain(|_, p| {
            !(p.status.is_terminal() && p.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok(before - plans.len())
    }
}
