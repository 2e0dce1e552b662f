//! Planning and Execution
//!
//! [`TaskPlanner`] turns a prompt into a [`Plan`]; [`ExecutionController`]
//! runs it under the session's strategy.
//!
//! # Strategies
//!
//! ```text
//! sequential:    NewsResearcher → FinancialAnalyst → ReportWriter
//!
//! hierarchical:  Manager ─┬→ NewsResearcher ──┬→ Manager validation → ReportWriter
//!                         └→ FinancialAnalyst ┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let controller = ExecutionController::new(repo, publisher, gateway, agents, planner);
//! let report = controller.run(&session_id, CancellationToken::new()).await?;
//! println!("{}", report.markdown);
//! ```

pub mod engine;
pub mod planner;

pub use engine::{ExecutionController, CANCELLED_REASON};
pub use planner::{Plan, TaskPlanner, TaskRequest};
