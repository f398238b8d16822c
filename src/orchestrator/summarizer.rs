//! Final summary over a finished plan.

use std::sync::Arc;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::llm::{GenerateOptions, Generator, ModelRole};
use crate::plan::{BudgetUsage, TaskPlan};

/// Longest slice of a single task result quoted into the summary prompt.
const MAX_TASK_RESULT_CHARS: usize = 3_000;

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You write the final answer for a multi-step plan from the results of its steps.";

#[derive(Debug, Clone, PartialEq)]
pub struct PlanSummary {
    pub text: String,
    pub usage: BudgetUsage,
}

pub struct Summarizer {
    generator: Arc<dyn Generator>,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Summarize every task of `plan`. A plan cannot complete without this.
    pub async fn summarize(&self, plan: &TaskPlan) -> OrchestratorResult<PlanSummary> {
        let prompt = summary_prompt(plan);
        let generation = self
            .generator
            .generate(
                plan.model_config.for_role(ModelRole::Summarizer),
                &prompt,
                &GenerateOptions::system(SUMMARIZER_SYSTEM_PROMPT).temperature(0.3),
            )
            .await
            .map_err(|e| OrchestratorError::Summary(e.to_string()))?;

        let text = generation.content.trim();
        if text.is_empty() {
            return Err(OrchestratorError::Summary(
                "Summarizer returned an empty summary".to_string(),
            ));
        }

        Ok(PlanSummary {
            text: text.to_string(),
            usage: BudgetUsage::new(1, generation.tokens_used, 0),
        })
    }
}

fn summary_prompt(plan: &TaskPlan) -> String {
    let stats = plan.stats();
    let mut prompt = format!(
        "Plan: {}\n\
         Tasks: {} total, {} done, {} need review, {} skipped, {} failed",
        plan.title, stats.total, stats.done, stats.needs_review, stats.skipped, stats.failed
    );
    if let Some(avg) = stats.average_confidence {
        prompt.push_str(&format!(", average confidence {}", avg));
    }
    prompt.push_str("\n\n");

    for task in &plan.tasks {
        prompt.push_str(&format!(
            "## Task {} [{}] {} ({})\n",
            task.id, task.task_type, task.target, task.status
        ));
        if let Some(score) = task.confidence_score {
            prompt.push_str(&format!("Confidence: {}\n", score));
        }
        if let Some(notes) = &task.review_notes {
            prompt.push_str(&format!("Review notes: {}\n", notes));
        }
        match (&task.result, &task.error) {
            (Some(result), _) => {
                let truncated: String = result.chars().take(MAX_TASK_RESULT_CHARS).collect();
                prompt.push_str(&truncated);
                prompt.push('\n');
            }
            (None, Some(error)) => prompt.push_str(&format!("Error: {}\n", error)),
            (None, None) => {}
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Write the final answer to the original request. Point out results that were \
         flagged for review or steps that were skipped.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelConfig;
    use crate::plan::{BudgetLimits, Task, TaskStatus, TaskTransition, TaskType};
    use crate::testing::ScriptedGenerator;

    fn finished_plan() -> TaskPlan {
        let mut done = Task::new(1, TaskType::Analyze, "market", "size", vec![]);
        done.apply(TaskTransition::to(TaskStatus::Running)).unwrap();
        done.apply(
            TaskTransition::to(TaskStatus::Done)
                .result("the market is large")
                .confidence(90),
        )
        .unwrap();
        let mut skipped = Task::new(2, TaskType::Search, "news", "find news", vec![]);
        skipped
            .apply(TaskTransition::to(TaskStatus::Skipped).error("search offline"))
            .unwrap();
        TaskPlan::new(
            "t",
            "u",
            "Market study",
            vec![done, skipped],
            BudgetLimits::default(),
            ModelConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_prompt_covers_every_task() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("  Final answer.  ".into())]));
        let summary = Summarizer::new(generator.clone())
            .summarize(&finished_plan())
            .await
            .unwrap();
        assert_eq!(summary.text, "Final answer.");
        assert_eq!(summary.usage.llm_calls, 1);

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("the market is large"));
        assert!(prompt.contains("Error: search offline"));
        assert!(prompt.contains("1 done"));
    }

    #[tokio::test]
    async fn test_empty_summary_is_an_error() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("   ".into())]));
        let err = Summarizer::new(generator)
            .summarize(&finished_plan())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Summary(_)));
    }
}
