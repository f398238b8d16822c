//! Budget module - global resource ceilings across active plans.
//!
//! # Key Concepts
//! - Ceilings: LLM calls, tokens, web searches and wall-clock duration
//! - Aggregation: usage is summed over every active autonomous plan, so one
//!   plan's consumption reduces every other plan's headroom
//! - Signals: reaching 100% of any ceiling is a hard stop; 50% and 75% of the
//!   countable ceilings produce medium and high warnings on every check

mod tracker;

pub use tracker::{BudgetCheck, BudgetTracker, BudgetType, BudgetWarning, WarningLevel};
