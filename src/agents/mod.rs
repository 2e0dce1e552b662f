//! Worker Agents
//!
//! A closed set of agents sharing one capability, [`Agent::produce`]: given
//! the task context and the Findings of upstream tasks, produce a new
//! [`Finding`]. Agents only read upstream Findings; they never mutate them.
//!
//! | Agent              | External calls      | Finding                     |
//! |--------------------|---------------------|-----------------------------|
//! | `NewsResearcher`   | search              | news items                  |
//! | `FinancialAnalyst` | finance             | price, history and metrics  |
//! | `ReportWriter`     | none                | memo and deduplicated sources |
//! | `Manager`          | none                | dispatch decision           |

pub mod analyst;
pub mod manager;
pub mod registry;
pub mod researcher;
pub mod writer;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolGateway;
use crate::types::{AgentKind, AppError, Finding, Task, ToolCallRecord};

pub use analyst::FinancialAnalyst;
pub use manager::{Assessment, Manager};
pub use registry::AgentRegistry;
pub use researcher::NewsResearcher;
pub use writer::ReportWriter;

/// Everything an agent may use while working on one task.
#[derive(Clone)]
pub struct AgentContext {
    pub session_id: String,
    pub task: Task,
    pub topic: String,
    pub symbol: String,
    pub gateway: Arc<ToolGateway>,
    pub cancel: CancellationToken,
}

/// Agent failure plus the tool calls made before it failed.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AgentError {
    pub error: AppError,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl From<AppError> for AgentError {
    fn from(error: AppError) -> Self {
        Self {
            error,
            tool_calls: Vec::new(),
        }
    }
}

pub type AgentResult = std::result::Result<Finding, AgentError>;

/// Base trait for all agents
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn produce(&self, ctx: &AgentContext, upstream: &[Finding]) -> AgentResult;
}
