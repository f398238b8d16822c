//! Progress events for a transport layer (live stream, logs, UI).

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::budget::{BudgetType, WarningLevel};
use crate::plan::{Artifact, PlanStatus, TaskStatus};

/// Something observable happened while a plan was being created or run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    PlanCreated {
        plan_id: Uuid,
        title: String,
        task_count: usize,
    },
    TaskStarted {
        plan_id: Uuid,
        task_id: u32,
        target: String,
    },
    TaskCompleted {
        plan_id: Uuid,
        task_id: u32,
        status: TaskStatus,
        confidence_score: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip_reason: Option<String>,
    },
    ToolStart {
        plan_id: Uuid,
        task_id: u32,
        tool: String,
    },
    ToolEnd {
        plan_id: Uuid,
        task_id: u32,
        tool: String,
        success: bool,
    },
    ArtifactProduced {
        plan_id: Uuid,
        task_id: u32,
        artifact: Artifact,
    },
    BudgetWarning {
        plan_id: Uuid,
        budget_type: BudgetType,
        level: WarningLevel,
        ratio: f64,
    },
    BudgetExceeded {
        plan_id: Uuid,
        budget_type: BudgetType,
        message: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan_id: Option<Uuid>,
        message: String,
    },
    PlanCompleted {
        plan_id: Uuid,
        status: PlanStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

/// Receiver of [`PlanEvent`]s. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PlanEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: PlanEvent) {}
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<PlanEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: PlanEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl EventSink for mpsc::UnboundedSender<PlanEvent> {
    fn emit(&self, event: PlanEvent) {
        if self.send(event).is_err() {
            tracing::debug!("Event receiver dropped");
        }
    }
}
