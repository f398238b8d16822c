//! SQLite-backed plan store.
//!
//! Plans and tasks live in separate tables so each operation touches a single
//! row: a task transition rewrites one `tasks` row, a usage increment is one
//! `UPDATE ... SET x = x + ?`, and the terminal-status guard is part of the
//! `UPDATE ... WHERE status = 'active'` itself.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{apply_transition, PlanStore, StoreError, StoreResult};
use crate::plan::{
    BudgetUsage, PlanMode, PlanOutcome, PlanStatus, Task, TaskPlan, TaskTransition,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    mode TEXT NOT NULL,
    budget_limits TEXT NOT NULL,
    llm_calls INTEGER NOT NULL DEFAULT 0,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    web_searches INTEGER NOT NULL DEFAULT 0,
    model_config TEXT NOT NULL,
    summary TEXT,
    status_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_plans_status_mode ON plans(status, mode);
CREATE TABLE IF NOT EXISTS tasks (
    plan_id TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
    task_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (plan_id, task_id)
);
"#;

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Columns of a `plans` row before JSON fields are decoded.
struct PlanRow {
    id: String,
    thread_id: String,
    user_id: String,
    title: String,
    status: String,
    mode: String,
    budget_limits: String,
    llm_calls: i64,
    tokens_used: i64,
    web_searches: i64,
    model_config: String,
    summary: Option<String>,
    status_message: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl PlanRow {
    fn into_plan(self, tasks: Vec<Task>) -> StoreResult<TaskPlan> {
        Ok(TaskPlan {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| StoreError::Backend(format!("Invalid plan id: {}", e)))?,
            thread_id: self.thread_id,
            user_id: self.user_id,
            title: self.title,
            tasks,
            status: PlanStatus::parse(&self.status)
                .ok_or_else(|| StoreError::Backend(format!("Unknown plan status '{}'", self.status)))?,
            mode: PlanMode::parse(&self.mode)
                .ok_or_else(|| StoreError::Backend(format!("Unknown plan mode '{}'", self.mode)))?,
            budget_limits: serde_json::from_str(&self.budget_limits)?,
            budget_used: BudgetUsage::new(
                self.llm_calls.max(0) as u64,
                self.tokens_used.max(0) as u64,
                self.web_searches.max(0) as u64,
            ),
            model_config: serde_json::from_str(&self.model_config)?,
            summary: self.summary,
            status_message: self.status_message,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

/// Plan store persisted in a single SQLite database file.
#[derive(Clone)]
pub struct SqlitePlanStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlanStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!("Opened plan database at {}", path.display());
        Self::from_connection(conn)
    }

    /// A throwaway in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Backend("Connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Database task failed: {}", e)))?
    }

    fn load_plan(conn: &Connection, plan_id: &str) -> StoreResult<Option<TaskPlan>> {
        let row = conn
            .query_row(
                "SELECT id, thread_id, user_id, title, status, mode, budget_limits,
                        llm_calls, tokens_used, web_searches, model_config, summary,
                        status_message, created_at, updated_at, completed_at
                 FROM plans WHERE id = ?1",
                params![plan_id],
                |r| {
                    Ok(PlanRow {
                        id: r.get(0)?,
                        thread_id: r.get(1)?,
                        user_id: r.get(2)?,
                        title: r.get(3)?,
                        status: r.get(4)?,
                        mode: r.get(5)?,
                        budget_limits: r.get(6)?,
                        llm_calls: r.get(7)?,
                        tokens_used: r.get(8)?,
                        web_searches: r.get(9)?,
                        model_config: r.get(10)?,
                        summary: r.get(11)?,
                        status_message: r.get(12)?,
                        created_at: r.get(13)?,
                        updated_at: r.get(14)?,
                        completed_at: r.get(15)?,
                    })
                },
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT data FROM tasks WHERE plan_id = ?1 ORDER BY position")?;
        let tasks = stmt
            .query_map(params![plan_id], |r| r.get::<_, String>(0))?
            .map(|data| -> StoreResult<Task> { Ok(serde_json::from_str(&data?)?) })
            .collect::<StoreResult<Vec<Task>>>()?;

        row.into_plan(tasks).map(Some)
    }

    fn plan_exists(conn: &Connection, plan_id: &str) -> StoreResult<bool> {
        Ok(conn
            .query_row("SELECT 1 FROM plans WHERE id = ?1", params![plan_id], |_| Ok(()))
            .optional()?
            .is_some())
    }
}

#[async_trait]
impl PlanStore for SqlitePlanStore {
    async fn create_plan(&self, plan: &TaskPlan) -> StoreResult<()> {
        let plan = plan.clone();
        self.with_conn(move |conn| {
            let id = plan.id.to_string();
            if Self::plan_exists(conn, &id)? {
                return Err(StoreError::DuplicatePlan(plan.id));
            }

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO plans (id, thread_id, user_id, title, status, mode, budget_limits,
                                    llm_calls, tokens_used, web_searches, model_config, summary,
                                    status_message, created_at, updated_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    id,
                    plan.thread_id,
                    plan.user_id,
                    plan.title,
                    plan.status.as_str(),
                    plan.mode.as_str(),
                    serde_json::to_string(&plan.budget_limits)?,
                    plan.budget_used.llm_calls as i64,
                    plan.budget_used.tokens_used as i64,
                    plan.budget_used.web_searches as i64,
                    serde_json::to_string(&plan.model_config)?,
                    plan.summary,
                    plan.status_message,
                    ts(plan.created_at),
                    ts(plan.updated_at),
                    plan.completed_at.map(ts),
                ],
            )?;
            for (position, task) in plan.tasks.iter().enumerate() {
                tx.execute(
                    "INSERT INTO tasks (plan_id, task_id, position, data) VALUES (?1, ?2, ?3, ?4)",
                    params![id, task.id, position as i64, serde_json::to_string(task)?],
                )?;
            }
            tx.commit()?;
            tracing::debug!("Persisted plan {} with {} tasks", plan.id, plan.tasks.len());
            Ok(())
        })
        .await
    }

    async fn get_plan(&self, plan_id: Uuid) -> StoreResult<Option<TaskPlan>> {
        self.with_conn(move |conn| Self::load_plan(conn, &plan_id.to_string()))
            .await
    }

    async fn transition_task_state(
        &self,
        plan_id: Uuid,
        task_id: u32,
        transition: TaskTransition,
    ) -> StoreResult<Task> {
        self.with_conn(move |conn| {
            let id = plan_id.to_string();
            let tx = conn.transaction()?;
            let data: Option<String> = tx
                .query_row(
                    "SELECT data FROM tasks WHERE plan_id = ?1 AND task_id = ?2",
                    params![id, task_id],
                    |r| r.get(0),
                )
                .optional()?;

            let Some(data) = data else {
                return if Self::plan_exists(&tx, &id)? {
                    Err(StoreError::TaskNotFound { plan_id, task_id })
                } else {
                    Err(StoreError::PlanNotFound(plan_id))
                };
            };

            let mut task: Task = serde_json::from_str(&data)?;
            apply_transition(&mut task, transition)?;

            tx.execute(
                "UPDATE tasks SET data = ?1 WHERE plan_id = ?2 AND task_id = ?3",
                params![serde_json::to_string(&task)?, id, task_id],
            )?;
            tx.execute(
                "UPDATE plans SET updated_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), id],
            )?;
            tx.commit()?;
            Ok(task)
        })
        .await
    }

    async fn increment_budget_usage(&self, plan_id: Uuid, delta: &BudgetUsage) -> StoreResult<()> {
        let delta = *delta;
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE plans
                 SET llm_calls = llm_calls + ?1,
                     tokens_used = tokens_used + ?2,
                     web_searches = web_searches + ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    delta.llm_calls as i64,
                    delta.tokens_used as i64,
                    delta.web_searches as i64,
                    ts(Utc::now()),
                    plan_id.to_string(),
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::PlanNotFound(plan_id));
            }
            Ok(())
        })
        .await
    }

    async fn finish_plan(&self, plan_id: Uuid, outcome: PlanOutcome) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let id = plan_id.to_string();
            let now = ts(Utc::now());
            let status = outcome.status();
            let (summary, message) = match outcome {
                PlanOutcome::Completed { summary } => (Some(summary), None),
                PlanOutcome::Failed { reason } | PlanOutcome::Cancelled { reason } => {
                    (None, Some(reason))
                }
            };

            let updated = conn.execute(
                "UPDATE plans
                 SET status = ?1, summary = COALESCE(?2, summary), status_message = ?3,
                     updated_at = ?4, completed_at = ?4
                 WHERE id = ?5 AND status = 'active'",
                params![status.as_str(), summary, message, now, id],
            )?;

            if updated == 0 && !Self::plan_exists(conn, &id)? {
                return Err(StoreError::PlanNotFound(plan_id));
            }
            Ok(updated == 1)
        })
        .await
    }

    async fn list_active_plans(&self, mode: PlanMode) -> StoreResult<Vec<TaskPlan>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM plans WHERE status = 'active' AND mode = ?1 ORDER BY created_at",
            )?;
            let ids = stmt
                .query_map(params![mode.as_str()], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut plans = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(plan) = Self::load_plan(conn, &id)? {
                    plans.push(plan);
                }
            }
            Ok(plans)
        })
        .await
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM plans
                 WHERE status != 'active' AND completed_at IS NOT NULL AND completed_at < ?1",
                params![ts(cutoff)],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{TaskStatus, TaskTransition};
    use crate::store::contract;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_roundtrip_and_transitions() {
        let store = SqlitePlanStore::open_in_memory().unwrap();
        contract::roundtrip_and_transitions(&store).await;
    }

    #[tokio::test]
    async fn test_usage_and_terminal_status() {
        let store = SqlitePlanStore::open_in_memory().unwrap();
        contract::usage_and_terminal_status(&store).await;
    }

    #[tokio::test]
    async fn test_retention_cascades_tasks() {
        let store = SqlitePlanStore::open_in_memory().unwrap();
        contract::retention(&store).await;
        let orphans: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE plan_id NOT IN (SELECT id FROM plans)",
                    [],
                    |r| r.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_unknown_plan() {
        let store = SqlitePlanStore::open_in_memory().unwrap();
        let missing = Uuid::new_v4();
        tokio_test::block_on(async {
            assert!(store.get_plan(missing).await.unwrap().is_none());
            assert!(matches!(
                store
                    .increment_budget_usage(missing, &BudgetUsage::new(1, 0, 0))
                    .await,
                Err(StoreError::PlanNotFound(id)) if id == missing
            ));
        });
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("plans.db");
        let plan = contract::sample_plan();

        {
            let store = SqlitePlanStore::open(&path).unwrap();
            store.create_plan(&plan).await.unwrap();
            store
                .transition_task_state(plan.id, 1, TaskTransition::to(TaskStatus::Running))
                .await
                .unwrap();
        }

        let reopened = SqlitePlanStore::open(&path).unwrap();
        let loaded = reopened.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(loaded.task(1).unwrap().status, TaskStatus::Running);
        assert_eq!(loaded.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            reopened
                .list_active_plans(PlanMode::Autonomous)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
