//! # autoplan
//!
//! Autonomous task orchestration: a request is decomposed into a dependency
//! ordered task graph which is then executed one task at a time, each result
//! gated by an LLM quality checker, under a budget shared by every active plan.
//!
//! ```text
//!   request ──▶ Planner ──▶ graph validation ──▶ PlanStore
//!                                                   │
//!        ┌──────────────────────────────────────────┘
//!        ▼
//!   Orchestrator loop ──▶ Executor ──▶ Tool / LLM ──▶ Checker
//!        │                                              │
//!        └──────────── state persisted per task ◀───────┘
//!        │
//!        ▼
//!   Summarizer ──▶ plan completed
//! ```
//!
//! ## Modules
//! - `plan`: data model and dependency graph analysis
//! - `planner`, `executor`, `checker`, `orchestrator`: the control loop
//! - `parser`: JSON extraction, schema validation and bounded repair
//! - `budget`: global ceilings across active plans
//! - `llm`, `tools`: collaborator interfaces
//! - `store`: plan persistence (in-memory and SQLite)
//! - `events`: progress events for a transport layer

pub mod budget;
pub mod checker;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod plan;
pub mod planner;
pub mod store;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::{Config, OrchestratorConfig};
pub use context::ExecutionContext;
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
pub use plan::{Task, TaskPlan, TaskStatus};
pub use planner::PlanRequest;
