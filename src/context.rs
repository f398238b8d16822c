//! Request context passed explicitly through the orchestration chain.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::TaskPlan;

/// Who a plan runs for. Handed to every executor and tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub plan_id: Option<Uuid>,
    pub thread_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

impl ExecutionContext {
    pub fn new(thread_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            plan_id: None,
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            category_id: None,
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    /// The same context scoped to a plan.
    pub fn for_plan(&self, plan: &TaskPlan) -> Self {
        Self {
            plan_id: Some(plan.id),
            thread_id: plan.thread_id.clone(),
            user_id: plan.user_id.clone(),
            category_id: self.category_id.clone(),
        }
    }
}
