//! Dependency graph analysis over a plan's task list.
//!
//! Everything here is pure: no IO, no clocks, no collaborators. Dependencies
//! point from a task to the tasks it waits on.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::{Task, TaskStatus};

/// More leaf tasks than this produces a warning.
const LEAF_WARNING_THRESHOLD: usize = 3;

/// A structural defect that makes a task graph unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate task id {0}")]
    DuplicateId(u32),

    #[error("Task {task} depends on unknown task {dependency}")]
    MissingDependency { task: u32, dependency: u32 },

    #[error("Task {0} depends on itself")]
    SelfDependency(u32),

    #[error("Circular dependency detected: {}", format_cycle(.0))]
    Cycle(Vec<u32>),

    #[error("No root task: every task waits on another task, so the plan can never start")]
    NoRootTask,
}

fn format_cycle(cycle: &[u32]) -> String {
    cycle
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<GraphError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// All error messages joined for display.
    pub fn error_message(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Check a task list for duplicate ids, dangling or self references, cycles,
/// and a missing root.
pub fn validate(tasks: &[Task]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.id) {
            errors.push(GraphError::DuplicateId(task.id));
        }
    }

    for task in tasks {
        for &dep in &task.dependencies {
            if dep == task.id {
                errors.push(GraphError::SelfDependency(task.id));
            } else if !seen.contains(&dep) {
                errors.push(GraphError::MissingDependency {
                    task: task.id,
                    dependency: dep,
                });
            }
        }
    }

    if let Some(cycle) = find_cycle(tasks) {
        errors.push(GraphError::Cycle(cycle));
    }

    if tasks.is_empty() {
        warnings.push("Plan has no tasks".to_string());
    } else {
        if !tasks.iter().any(|t| t.dependencies.is_empty()) {
            errors.push(GraphError::NoRootTask);
        }

        let depended_on: HashSet<u32> = tasks
            .iter()
            .flat_map(|t| t.dependencies.iter().copied())
            .collect();
        let leaves = tasks
            .iter()
            .filter(|t| !depended_on.contains(&t.id))
            .count();
        if tasks.len() > 1 && leaves > LEAF_WARNING_THRESHOLD {
            warnings.push(format!(
                "{} tasks have no dependents; results may not be combined into a final output",
                leaves
            ));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Depth-first search with a recursion stack. Returns the cyclic id sequence,
/// closed on its first id (e.g. `[3, 4, 3]`).
///
/// Self-edges and edges to unknown ids are ignored here; [`validate`] reports
/// them separately.
fn find_cycle(tasks: &[Task]) -> Option<Vec<u32>> {
    let index: HashMap<u32, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    let mut on_stack = HashSet::new();

    fn visit(
        id: u32,
        index: &HashMap<u32, &Task>,
        visited: &mut HashSet<u32>,
        stack: &mut Vec<u32>,
        on_stack: &mut HashSet<u32>,
    ) -> Option<Vec<u32>> {
        visited.insert(id);
        stack.push(id);
        on_stack.insert(id);

        if let Some(task) = index.get(&id) {
            for &dep in &task.dependencies {
                if dep == id || !index.contains_key(&dep) {
                    continue;
                }
                if on_stack.contains(&dep) {
                    let start = stack.iter().position(|&s| s == dep).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                if !visited.contains(&dep) {
                    if let Some(cycle) = visit(dep, index, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(&id);
        None
    }

    for task in tasks {
        if !visited.contains(&task.id) {
            if let Some(cycle) = visit(task.id, &index, &mut visited, &mut stack, &mut on_stack)
            {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm. Returns `None` whenever the graph has a cycle, so callers
/// can tell "cyclic" apart from "valid but trivial".
pub fn topological_sort(tasks: &[Task]) -> Option<Vec<&Task>> {
    if find_cycle(tasks).is_some() || tasks.iter().any(|t| t.dependencies.contains(&t.id)) {
        return None;
    }

    let ids: HashSet<u32> = tasks.iter().map(|t| t.id).collect();
    let mut in_degree: HashMap<u32, usize> = HashMap::new();
    let mut dependents: HashMap<u32, Vec<usize>> = HashMap::new();

    for (i, task) in tasks.iter().enumerate() {
        let known: HashSet<u32> = task
            .dependencies
            .iter()
            .copied()
            .filter(|d| ids.contains(d))
            .collect();
        in_degree.insert(task.id, known.len());
        for dep in known {
            dependents.entry(dep).or_default().push(i);
        }
    }

    let mut queue: VecDeque<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| in_degree.get(&t.id).copied().unwrap_or(0) == 0)
        .map(|(i, _)| i)
        .collect();
    let mut ordered = Vec::with_capacity(tasks.len());

    while let Some(i) = queue.pop_front() {
        let task = &tasks[i];
        ordered.push(task);
        if let Some(children) = dependents.get(&task.id) {
            for &child in children {
                if let Some(degree) = in_degree.get_mut(&tasks[child].id) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
    }

    if ordered.len() == tasks.len() {
        Some(ordered)
    } else {
        None
    }
}

fn dependencies_settled(task: &Task, status_by_id: &HashMap<u32, TaskStatus>) -> bool {
    task.dependencies.iter().all(|dep| {
        status_by_id
            .get(dep)
            .map(|s| s.is_settled())
            .unwrap_or(false)
    })
}

/// Pending tasks whose every dependency is settled, in array order.
pub fn find_ready_tasks(tasks: &[Task]) -> Vec<&Task> {
    let status_by_id: HashMap<u32, TaskStatus> = tasks.iter().map(|t| (t.id, t.status)).collect();
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && dependencies_settled(t, &status_by_id))
        .collect()
}

/// The next task to run: highest priority among ready tasks, array order
/// among equals.
pub fn select_next_task(tasks: &[Task]) -> Option<&Task> {
    find_ready_tasks(tasks)
        .into_iter()
        .min_by_key(|t| t.priority)
}

/// Result of [`detect_stuck_plan`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StuckPlanReport {
    pub is_stuck: bool,
    pub reason: Option<String>,
    pub stuck_task_ids: Vec<u32>,
    pub suggestions: Vec<String>,
}

/// A plan is stuck iff there are pending tasks, none running, and none ready.
pub fn detect_stuck_plan(tasks: &[Task]) -> StuckPlanReport {
    let pending: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .collect();
    let running = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Running)
        .count();

    if pending.is_empty() || running > 0 || !find_ready_tasks(tasks).is_empty() {
        return StuckPlanReport::default();
    }

    let status_by_id: HashMap<u32, TaskStatus> = tasks.iter().map(|t| (t.id, t.status)).collect();
    let mut suggestions = Vec::new();
    let mut reasons = Vec::new();

    for task in &pending {
        for &dep in &task.dependencies {
            match status_by_id.get(&dep) {
                Some(TaskStatus::Failed) => suggestions.push(format!(
                    "Task {} waits on failed task {}: mark task {} as skipped to unblock it",
                    task.id, dep, dep
                )),
                None => suggestions.push(format!(
                    "Task {} waits on unknown task {}: remove the dependency",
                    task.id, dep
                )),
                _ => {}
            }
        }
    }

    if let Some(cycle) = find_cycle(tasks) {
        reasons.push(format!(
            "probable circular dependency: {}",
            format_cycle(&cycle)
        ));
        suggestions.push("Break the circular dependency by removing one of its edges".to_string());
    }

    let mut reason = format!(
        "{} pending task(s) but none are ready and none are running",
        pending.len()
    );
    if !reasons.is_empty() {
        reason.push_str(&format!(" ({})", reasons.join(", ")));
    }
    if suggestions.is_empty() {
        suggestions.push("Inspect the blocked tasks' dependencies".to_string());
    }

    StuckPlanReport {
        is_stuck: true,
        reason: Some(reason),
        stuck_task_ids: pending.iter().map(|t| t.id).collect(),
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{TaskPriority, TaskType};

    fn task(id: u32, deps: &[u32]) -> Task {
        Task::new(id, TaskType::Analyze, format!("t{}", id), "work", deps.to_vec())
    }

    fn with_status(mut task: Task, status: TaskStatus) -> Task {
        task.status = status;
        task
    }

    #[test]
    fn test_valid_chain() {
        let tasks = vec![task(1, &[]), task(2, &[1]), task(3, &[1, 2])];
        let report = validate(&tasks);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_cycle_reported_with_path() {
        // A, B(A), C(B, D), D(C)
        let tasks = vec![task(1, &[]), task(2, &[1]), task(3, &[2, 4]), task(4, &[3])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(report.errors.contains(&GraphError::Cycle(vec![3, 4, 3])));
        assert_eq!(
            GraphError::Cycle(vec![3, 4, 3]).to_string(),
            "Circular dependency detected: 3 → 4 → 3"
        );
    }

    #[test]
    fn test_duplicate_missing_and_self_dependency() {
        let tasks = vec![task(1, &[]), task(1, &[]), task(2, &[9]), task(3, &[3])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(report.errors.contains(&GraphError::DuplicateId(1)));
        assert!(report.errors.contains(&GraphError::MissingDependency {
            task: 2,
            dependency: 9
        }));
        assert!(report.errors.contains(&GraphError::SelfDependency(3)));
        // A self edge is not double-reported as a cycle
        assert!(!report
            .errors
            .iter()
            .any(|e| matches!(e, GraphError::Cycle(_))));
    }

    #[test]
    fn test_no_root_is_an_error() {
        let tasks = vec![task(1, &[2]), task(2, &[1])];
        let report = validate(&tasks);
        assert!(report.errors.contains(&GraphError::NoRootTask));
    }

    #[test]
    fn test_many_leaves_is_only_a_warning() {
        let tasks = vec![task(1, &[]), task(2, &[]), task(3, &[]), task(4, &[]), task(5, &[])];
        let report = validate(&tasks);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_topological_sort_respects_dependencies() {
        let tasks = vec![task(3, &[1, 2]), task(2, &[1]), task(1, &[]), task(4, &[])];
        let order: Vec<u32> = topological_sort(&tasks)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(order.len(), 4);
        let pos = |id: u32| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn test_topological_sort_rejects_cycles() {
        let tasks = vec![task(1, &[]), task(2, &[1, 3]), task(3, &[2])];
        assert!(topological_sort(&tasks).is_none());
        assert_eq!(topological_sort(&[]).map(|v| v.len()), Some(0));
    }

    #[test]
    fn test_ready_tasks_treat_needs_review_as_settled() {
        let tasks = vec![
            with_status(task(1, &[]), TaskStatus::NeedsReview),
            with_status(task(2, &[]), TaskStatus::Failed),
            task(3, &[1]),
            task(4, &[2]),
            task(5, &[]),
        ];
        let ready: Vec<u32> = find_ready_tasks(&tasks).iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![3, 5]);
    }

    #[test]
    fn test_select_next_prefers_priority_then_order() {
        let tasks = vec![
            task(1, &[]),
            task(2, &[]).with_priority(TaskPriority::High),
            task(3, &[]).with_priority(TaskPriority::High),
        ];
        assert_eq!(select_next_task(&tasks).map(|t| t.id), Some(2));

        let tasks = vec![task(1, &[]), task(2, &[])];
        assert_eq!(select_next_task(&tasks).map(|t| t.id), Some(1));
    }

    #[test]
    fn test_stuck_on_failed_dependency() {
        let tasks = vec![
            with_status(task(1, &[]), TaskStatus::Failed),
            task(2, &[1]),
        ];
        let report = detect_stuck_plan(&tasks);
        assert!(report.is_stuck);
        assert_eq!(report.stuck_task_ids, vec![2]);
        assert!(report.suggestions[0].contains("mark task 1 as skipped"));
    }

    #[test]
    fn test_not_stuck_while_running_or_ready() {
        let running = vec![
            with_status(task(1, &[]), TaskStatus::Running),
            task(2, &[1]),
        ];
        assert!(!detect_stuck_plan(&running).is_stuck);

        let ready = vec![with_status(task(1, &[]), TaskStatus::Done), task(2, &[1])];
        assert!(!detect_stuck_plan(&ready).is_stuck);

        let finished = vec![with_status(task(1, &[]), TaskStatus::Done)];
        assert!(!detect_stuck_plan(&finished).is_stuck);
    }

    #[test]
    fn test_stuck_flags_cycle() {
        let tasks = vec![
            with_status(task(1, &[]), TaskStatus::Done),
            task(2, &[3]),
            task(3, &[2]),
        ];
        let report = detect_stuck_plan(&tasks);
        assert!(report.is_stuck);
        assert!(report.reason.unwrap().contains("circular"));
    }
}
