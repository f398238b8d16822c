//! Startup sweep for tasks left `running` by a previous process.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::plan::{PlanMode, TaskStatus, TaskTransition};
use crate::store::{PlanStore, StoreError, StoreResult};

/// What a recovery sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub plans_scanned: usize,
    /// `(plan_id, task_id)` of every task forced to `skipped`
    pub recovered: Vec<(Uuid, u32)>,
}

/// Skip every task of an active autonomous plan that entered `running` more
/// than `grace` before `now` and has no later history entry.
pub async fn recover_stalled_tasks(
    store: &dyn PlanStore,
    grace: chrono::Duration,
    now: DateTime<Utc>,
) -> StoreResult<RecoveryReport> {
    let plans = store.list_active_plans(PlanMode::Autonomous).await?;
    let mut report = RecoveryReport {
        plans_scanned: plans.len(),
        ..Default::default()
    };

    for plan in &plans {
        for task in plan.tasks.iter().filter(|t| t.status == TaskStatus::Running) {
            let stale = match task.last_transition() {
                Some(entry) => entry.status == TaskStatus::Running && now - entry.timestamp > grace,
                None => true,
            };
            if !stale {
                continue;
            }

            let transition = TaskTransition::to(TaskStatus::Skipped)
                .details("Recovered after restart")
                .error(format!(
                    "Recovery timeout: task was still running after {} minute(s) when the process restarted",
                    grace.num_minutes()
                ));
            match store
                .transition_task_state(plan.id, task.id, transition)
                .await
            {
                Ok(_) => {
                    tracing::warn!(
                        "Recovered stalled task {} of plan {} as skipped",
                        task.id,
                        plan.id
                    );
                    report.recovered.push((plan.id, task.id));
                }
                // Finished between the scan and the write
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
    }

    if !report.recovered.is_empty() {
        tracing::info!(
            "Recovery skipped {} task(s) across {} active plan(s)",
            report.recovered.len(),
            report.plans_scanned
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{contract, InMemoryPlanStore};

    async fn start(store: &dyn PlanStore, plan_id: Uuid, task_id: u32, at: DateTime<Utc>) {
        let mut transition = TaskTransition::to(TaskStatus::Running);
        transition.timestamp = at;
        store
            .transition_task_state(plan_id, task_id, transition)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_skips_only_stale_running_tasks() {
        let store = InMemoryPlanStore::new();
        let stale = contract::sample_plan();
        let fresh = contract::sample_plan();
        store.create_plan(&stale).await.unwrap();
        store.create_plan(&fresh).await.unwrap();

        let now = Utc::now();
        start(&store, stale.id, 1, now - chrono::Duration::minutes(10)).await;
        start(&store, fresh.id, 1, now - chrono::Duration::minutes(1)).await;

        let report = recover_stalled_tasks(&store, chrono::Duration::minutes(5), now)
            .await
            .unwrap();
        assert_eq!(report.plans_scanned, 2);
        assert_eq!(report.recovered, vec![(stale.id, 1)]);

        let plan = store.get_plan(stale.id).await.unwrap().unwrap();
        let task = plan.task(1).unwrap();
        assert_eq!(task.status, TaskStatus::Skipped);
        assert!(task.error.as_deref().unwrap().starts_with("Recovery timeout"));
        assert_eq!(task.state_history.len(), 2);

        let plan = store.get_plan(fresh.id).await.unwrap().unwrap();
        assert_eq!(plan.task(1).unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_ignores_finished_plans() {
        let store = InMemoryPlanStore::new();
        let plan = contract::sample_plan();
        store.create_plan(&plan).await.unwrap();
        start(&store, plan.id, 1, Utc::now() - chrono::Duration::hours(1)).await;
        store
            .finish_plan(
                plan.id,
                crate::plan::PlanOutcome::Cancelled {
                    reason: "user".into(),
                },
            )
            .await
            .unwrap();

        let report = recover_stalled_tasks(&store, chrono::Duration::minutes(5), Utc::now())
            .await
            .unwrap();
        assert_eq!(report, RecoveryReport::default());
    }
}
