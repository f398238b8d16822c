//! Cross-plan budget tracking.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::plan::{BudgetLimits, BudgetUsage, PlanMode};
use crate::store::{PlanStore, StoreResult};

const HIGH_WARNING_RATIO: f64 = 0.75;
const MEDIUM_WARNING_RATIO: f64 = 0.5;

/// Which ceiling a signal is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetType {
    LlmCalls,
    Tokens,
    WebSearches,
    Duration,
}

impl std::fmt::Display for BudgetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LlmCalls => "llm_calls",
            Self::Tokens => "tokens",
            Self::WebSearches => "web_searches",
            Self::Duration => "duration",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Medium,
    High,
}

/// A countable metric crossed 50% or 75% of its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetWarning {
    pub budget_type: BudgetType,
    pub level: WarningLevel,
    pub ratio: f64,
}

/// Outcome of one budget check.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCheck {
    pub exceeded: bool,
    /// First ceiling found at or above 100%
    pub budget_type: Option<BudgetType>,
    pub message: Option<String>,
    pub usage: BudgetUsage,
    pub elapsed: Duration,
    pub warnings: Vec<BudgetWarning>,
}

/// `used / max`, or `None` when the ceiling is disabled.
fn ratio(used: u64, max: u64) -> Option<f64> {
    (max > 0).then(|| used as f64 / max as f64)
}

/// Holds the configured ceilings and checks usage against them. The
/// duration clock belongs to each run, see [`BudgetTracker::check_budget`].
pub struct BudgetTracker {
    limits: BudgetLimits,
    store: Arc<dyn PlanStore>,
}

impl BudgetTracker {
    pub fn new(limits: BudgetLimits, store: Arc<dyn PlanStore>) -> Self {
        Self { limits, store }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Usage summed over every active autonomous plan.
    pub async fn aggregate_usage(&self) -> StoreResult<BudgetUsage> {
        let plans = self.store.list_active_plans(PlanMode::Autonomous).await?;
        Ok(plans.iter().map(|p| p.budget_used).sum())
    }

    /// Check `usage`, or the aggregate over active plans when `None`.
    /// The duration ceiling is measured from `started_at`; with no start
    /// time nothing has run yet and only the countable ceilings apply.
    pub async fn check_budget(
        &self,
        usage: Option<BudgetUsage>,
        started_at: Option<Instant>,
    ) -> StoreResult<BudgetCheck> {
        let usage = match usage {
            Some(usage) => usage,
            None => self.aggregate_usage().await?,
        };
        let elapsed = started_at.map(|t| t.elapsed()).unwrap_or_default();
        Ok(self.evaluate(&usage, elapsed))
    }

    /// Pure evaluation against the ceilings and the elapsed wall clock.
    pub fn evaluate(&self, usage: &BudgetUsage, elapsed: Duration) -> BudgetCheck {
        let countable = [
            (
                BudgetType::LlmCalls,
                usage.llm_calls,
                self.limits.max_llm_calls,
            ),
            (
                BudgetType::Tokens,
                usage.tokens_used,
                self.limits.max_tokens,
            ),
            (
                BudgetType::WebSearches,
                usage.web_searches,
                self.limits.max_web_searches,
            ),
        ];

        let mut exceeded: Option<(BudgetType, String)> = None;
        let mut warnings = Vec::new();

        for (budget_type, used, max) in countable {
            let Some(r) = ratio(used, max) else {
                continue;
            };
            if r >= 1.0 {
                if exceeded.is_none() {
                    exceeded = Some((
                        budget_type,
                        format!("Budget exceeded: {} used {} of {}", budget_type, used, max),
                    ));
                }
            } else if r >= HIGH_WARNING_RATIO {
                warnings.push(BudgetWarning {
                    budget_type,
                    level: WarningLevel::High,
                    ratio: r,
                });
            } else if r >= MEDIUM_WARNING_RATIO {
                warnings.push(BudgetWarning {
                    budget_type,
                    level: WarningLevel::Medium,
                    ratio: r,
                });
            }
        }

        if exceeded.is_none() && self.limits.max_duration_minutes > 0 {
            let max = Duration::from_secs(self.limits.max_duration_minutes * 60);
            if elapsed >= max {
                exceeded = Some((
                    BudgetType::Duration,
                    format!(
                        "Budget exceeded: duration {}s of {}s",
                        elapsed.as_secs(),
                        max.as_secs()
                    ),
                ));
            }
        }

        for warning in &warnings {
            tracing::warn!(
                "Budget {:?} warning: {} at {:.0}%",
                warning.level,
                warning.budget_type,
                warning.ratio * 100.0
            );
        }
        if let Some((_, message)) = &exceeded {
            tracing::error!("{}", message);
        }

        let (budget_type, message) = match exceeded {
            Some((t, m)) => (Some(t), Some(m)),
            None => (None, None),
        };

        BudgetCheck {
            exceeded: budget_type.is_some(),
            budget_type,
            message,
            usage: *usage,
            elapsed,
            warnings,
        }
    }
}
