//! Quality checker for task results.
//!
//! Scores a result with the checker model and approves it only when the score
//! reaches the configured threshold. Anything ambiguous (a parse failure, a
//! provider error, a panic-free but unexpected shape) resolves to
//! `needs_review` with confidence 0.

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{GenerateOptions, Generator, ModelSpec};
use crate::parser::{parse_with_repair, Field, RepairOptions, Schema};
use crate::plan::{Task, TaskType};

pub const DEFAULT_APPROVAL_THRESHOLD: u8 = 80;

/// Longest slice of a result sent for evaluation.
const MAX_RESULT_CHARS: usize = 12_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Approved,
    NeedsReview,
}

/// Checker verdict for one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub confidence_score: u8,
    pub notes: Option<String>,
    pub tokens_used: u64,
    pub llm_calls: u64,
}

impl CheckOutcome {
    fn fail_closed(notes: String, tokens_used: u64, llm_calls: u64) -> Self {
        Self {
            status: CheckStatus::NeedsReview,
            confidence_score: 0,
            notes: Some(notes),
            tokens_used,
            llm_calls,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Evaluation {
    confidence: f64,
    #[serde(default)]
    notes: Option<String>,
}

fn evaluation_schema() -> Schema {
    Schema::Object(vec![
        Field::required("confidence", Schema::number(0.0, 100.0)),
        Field::optional("notes", Schema::string()),
    ])
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct Checker {
    generator: Arc<dyn Generator>,
    threshold: u8,
}

impl Checker {
    pub fn new(generator: Arc<dyn Generator>, threshold: u8) -> Self {
        Self {
            generator,
            threshold: threshold.min(100),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    fn evaluation_prompt(&self, task: &Task, result: &str) -> String {
        format!(
            "Evaluate how well the result below accomplishes the task.\n\n\
             Task type: {}\n\
             Target: {}\n\
             Description: {}\n\n\
             Result:\n{}\n\n\
             Results scoring {} or more are accepted without review.\n\
             Respond with JSON only: {{\"confidence\": <0-100>, \"notes\": \"<short justification>\"}}",
            task.task_type,
            task.target,
            task.description,
            truncate(result, MAX_RESULT_CHARS),
            self.threshold
        )
    }

    /// Score `result` for `task`.
    pub async fn check(&self, task: &Task, result: &str, model: &ModelSpec) -> CheckOutcome {
        if task.task_type == TaskType::Summarize {
            return CheckOutcome {
                status: CheckStatus::Approved,
                confidence_score: 100,
                notes: Some("Summaries are approved without evaluation".to_string()),
                tokens_used: 0,
                llm_calls: 0,
            };
        }

        let prompt = self.evaluation_prompt(task, result);
        let generation = match self
            .generator
            .generate(
                model,
                &prompt,
                &GenerateOptions::system("You are a strict reviewer of task results.")
                    .temperature(0.0),
            )
            .await
        {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!("Checker call failed for task {}: {}", task.id, e);
                return CheckOutcome::fail_closed(format!("Quality check failed: {}", e), 0, 1);
            }
        };

        let parsed = parse_with_repair::<Evaluation>(
            &generation.content,
            &evaluation_schema(),
            RepairOptions::with_repairer(self.generator.as_ref(), model),
        )
        .await;

        match parsed {
            Ok(parsed) => {
                let tokens = generation.tokens_used + parsed.repair_tokens;
                let calls = 1 + parsed.repair_calls;
                let confidence = parsed.value.confidence.round().clamp(0.0, 100.0) as u8;
                let status = if confidence >= self.threshold {
                    CheckStatus::Approved
                } else {
                    CheckStatus::NeedsReview
                };
                tracing::debug!(
                    "Task {} scored {} (threshold {}): {:?}",
                    task.id,
                    confidence,
                    self.threshold,
                    status
                );
                CheckOutcome {
                    status,
                    confidence_score: confidence,
                    notes: parsed.value.notes,
                    tokens_used: tokens,
                    llm_calls: calls,
                }
            }
            Err(failure) => {
                tracing::warn!(
                    "Checker output for task {} unparseable: {}",
                    task.id,
                    failure
                );
                CheckOutcome::fail_closed(
                    format!("Quality check output could not be parsed: {}", failure.error),
                    generation.tokens_used + failure.repair_tokens,
                    1 + failure.repair_calls,
                )
            }
        }
    }
}
