//! Process configuration.
//!
//! Values come from environment variables. An optional JSON file named by
//! `AUTOPLAN_CONFIG` overrides the orchestrator section, so ceilings and
//! thresholds can be tuned without touching the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::llm::{ModelConfig, ModelSpec};
use crate::plan::BudgetLimits;

/// Tunables of the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global ceilings, also copied onto every new plan
    pub budget: BudgetLimits,
    /// Minimum checker confidence (0-100) for approval
    pub approval_threshold: u8,
    /// Hard cap on loop iterations per run
    pub max_iterations: usize,
    /// How long a task may sit in `running` before startup recovery skips it
    pub recovery_grace_minutes: u64,
    pub models: ModelConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            budget: BudgetLimits::default(),
            approval_threshold: 80,
            max_iterations: 1000,
            recovery_grace_minutes: 5,
            models: ModelConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// How long a task may sit in `running` before the startup sweep skips it.
    pub fn recovery_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.recovery_grace_minutes as i64)
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub database_path: PathBuf,
    pub orchestrator: OrchestratorConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", name, raw, e)),
        _ => Ok(default),
    }
}

fn env_model(name: &str, default: &ModelSpec) -> ModelSpec {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| ModelSpec::parse(&v))
        .unwrap_or_else(|| default.clone())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load from environment variables, then apply the override file if set.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = OrchestratorConfig::default();
        let default_budget = defaults.budget;

        let threshold: u8 = env_parse("CHECKER_APPROVAL_THRESHOLD", defaults.approval_threshold)?;
        if threshold > 100 {
            anyhow::bail!("CHECKER_APPROVAL_THRESHOLD must be between 0 and 100");
        }

        let mut orchestrator = OrchestratorConfig {
            budget: BudgetLimits {
                max_llm_calls: env_parse("BUDGET_MAX_LLM_CALLS", default_budget.max_llm_calls)?,
                max_tokens: env_parse("BUDGET_MAX_TOKENS", default_budget.max_tokens)?,
                max_web_searches: env_parse(
                    "BUDGET_MAX_WEB_SEARCHES",
                    default_budget.max_web_searches,
                )?,
                max_duration_minutes: env_parse(
                    "BUDGET_MAX_DURATION_MINUTES",
                    default_budget.max_duration_minutes,
                )?,
                task_timeout_minutes: env_parse(
                    "TASK_TIMEOUT_MINUTES",
                    default_budget.task_timeout_minutes,
                )?,
            },
            approval_threshold: threshold,
            max_iterations: env_parse("ORCHESTRATOR_MAX_ITERATIONS", defaults.max_iterations)?,
            recovery_grace_minutes: env_parse(
                "RECOVERY_GRACE_MINUTES",
                defaults.recovery_grace_minutes,
            )?,
            models: ModelConfig {
                planner: env_model("PLANNER_MODEL", &defaults.models.planner),
                executor: env_model("EXECUTOR_MODEL", &defaults.models.executor),
                checker: env_model("CHECKER_MODEL", &defaults.models.checker),
                summarizer: env_model("SUMMARIZER_MODEL", &defaults.models.summarizer),
            },
        };

        if let Some(path) = env_opt("AUTOPLAN_CONFIG") {
            orchestrator = Self::load_override(Path::new(&path))?;
            tracing::info!("Loaded orchestrator config from {}", path);
        }

        Ok(Self {
            openrouter_api_key: env_opt("OPENROUTER_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_base_url: env_opt("OPENAI_BASE_URL"),
            database_path: env_opt("AUTOPLAN_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".autoplan/plans.db")),
            orchestrator,
        })
    }

    /// Read an orchestrator section from a JSON file. Missing fields take defaults.
    pub fn load_override(path: &Path) -> anyhow::Result<OrchestratorConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: OrchestratorConfig = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))?;
        if config.approval_threshold > 100 {
            anyhow::bail!("approval_threshold must be between 0 and 100");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_override_file_fills_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("autoplan.json");
        std::fs::write(
            &path,
            r#"{"approval_threshold": 70, "budget": {"max_llm_calls": 5, "max_tokens": 100,
                "max_web_searches": 1, "max_duration_minutes": 2, "task_timeout_minutes": 1}}"#,
        )
        .unwrap();

        let config = Config::load_override(&path).unwrap();
        assert_eq!(config.approval_threshold, 70);
        assert_eq!(config.budget.max_llm_calls, 5);
        assert_eq!(config.max_iterations, 1000);
        assert_eq!(config.recovery_grace(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_override_rejects_bad_threshold() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bad.json");
        std::fs::write(&path, r#"{"approval_threshold": 120}"#).unwrap();
        assert!(Config::load_override(&path).is_err());
    }
}
