//! Session Events
//!
//! Every observable lifecycle transition of a session is a [`SessionEvent`]:
//! a per-session sequence number, a timestamp and a typed payload. On the
//! wire an event looks like:
//!
//! ```json
//! { "seq": 4, "session_id": "…", "timestamp": "…",
//!   "type": "agent_started", "payload": { "agent": "NewsResearcher" } }
//! ```
//!
//! `final_report` and `error` are terminal: they close the stream.

/// Ordered, replayable per-session event log with live fan-out.
pub mod publisher;

pub use publisher::{EventPublisher, EventStream};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AgentKind, Source};
use crate::workflows::planner::Plan;

/// Agent and title of one planned task, as listed in `task_planned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub agent: AgentKind,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    SessionCreated {
        id: String,
    },
    RunRequested {
        id: String,
    },
    TaskPlanned {
        tasks: Vec<PlannedTask>,
        plan: Plan,
    },
    AgentStarted {
        agent: AgentKind,
    },
    AgentOutput {
        agent: AgentKind,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    AgentFinished {
        agent: AgentKind,
    },
    FinalReport {
        markdown: String,
        sources: Vec<Source>,
    },
    Error {
        message: String,
    },
}

impl EventPayload {
    pub fn task_planned(plan: &Plan) -> Self {
        EventPayload::TaskPlanned {
            tasks: plan
                .tasks
                .iter()
                .map(|t| PlannedTask {
                    agent: t.agent,
                    title: t.title.clone(),
                })
                .collect(),
            plan: plan.clone(),
        }
    }

    /// Wire name, also used as the SSE `event` field
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::SessionCreated { .. } => "session_created",
            EventPayload::RunRequested { .. } => "run_requested",
            EventPayload::TaskPlanned { .. } => "task_planned",
            EventPayload::AgentStarted { .. } => "agent_started",
            EventPayload::AgentOutput { .. } => "agent_output",
            EventPayload::AgentFinished { .. } => "agent_finished",
            EventPayload::FinalReport { .. } => "final_report",
            EventPayload::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::FinalReport { .. } | EventPayload::Error { .. }
        )
    }

    /// The payload object alone, without the type tag
    pub fn body(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Strictly increasing per session, starting at 1
    pub seq: u64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}
