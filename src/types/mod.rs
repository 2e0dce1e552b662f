use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

// ============= API Request/Response Types =============

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub prompt: String,
    #[serde(default, alias = "mode")]
    pub strategy: Strategy,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionAck {
    pub ok: bool,
    pub session_id: String,
}

/// Current state of a session as recorded by the store.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionSnapshot {
    pub session: Session,
    pub tasks: Vec<Task>,
    pub report: Option<Report>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Replay events with a sequence number strictly greater than this
    pub after: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
    pub time: DateTime<Utc>,
}

// ============= Session Types =============

/// Execution topology for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Sequential,
    Hierarchical,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Hierarchical => "hierarchical",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Strategy::Sequential),
            "hierarchical" => Ok(Strategy::Hierarchical),
            other => Err(AppError::InvalidInput(format!("Unknown strategy: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Planned,
    Running,
    Done,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Planned => "planned",
            SessionStatus::Running => "running",
            SessionStatus::Done => "done",
            SessionStatus::Failed => "failed",
        }
    }

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "planned" => Ok(SessionStatus::Planned),
            "running" => Ok(SessionStatus::Running),
            "done" => Ok(SessionStatus::Done),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(AppError::Database(format!("Unknown session status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: String,
    pub prompt: String,
    pub strategy: Strategy,
    pub status: SessionStatus,
    /// Why the session failed; exactly `"cancelled"` for cancellations
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============= Task Types =============

/// The closed set of agents a task can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum AgentKind {
    Manager,
    NewsResearcher,
    FinancialAnalyst,
    ReportWriter,
}

/// Static lookup table keyed by agent name.
const AGENT_TABLE: &[(&str, AgentKind)] = &[
    ("Manager", AgentKind::Manager),
    ("NewsResearcher", AgentKind::NewsResearcher),
    ("FinancialAnalyst", AgentKind::FinancialAnalyst),
    ("ReportWriter", AgentKind::ReportWriter),
];

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Manager => "Manager",
            AgentKind::NewsResearcher => "NewsResearcher",
            AgentKind::FinancialAnalyst => "FinancialAnalyst",
            AgentKind::ReportWriter => "ReportWriter",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        AGENT_TABLE
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(_, kind)| *kind)
    }

    pub fn all() -> impl Iterator<Item = AgentKind> {
        AGENT_TABLE.iter().map(|(_, kind)| *kind)
    }

    /// Workers are the agents the Manager can dispatch.
    pub fn is_worker(&self) -> bool {
        matches!(self, AgentKind::NewsResearcher | AgentKind::FinancialAnalyst)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(AppError::Database(format!("Unknown task status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    /// Position in the plan; also the identity used by `depends_on`
    pub index: usize,
    pub agent: AgentKind,
    pub title: String,
    pub depends_on: Vec<usize>,
    /// Failure of an essential task fails the session
    pub essential: bool,
    pub status: TaskStatus,
    pub reason: Option<String>,
}

impl Task {
    pub fn new(index: usize, agent: AgentKind, title: impl Into<String>, depends_on: Vec<usize>) -> Self {
        Self {
            index,
            agent,
            title: title.into(),
            depends_on,
            essential: true,
            status: TaskStatus::Pending,
            reason: None,
        }
    }
}

// ============= Report Types =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Source {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub markdown: String,
    pub sources: Vec<Source>,
}

// ============= Finding Types =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// ISO date, `YYYY-MM-DD`
    pub date: String,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinanceSnapshot {
    pub symbol: String,
    pub price: Option<f64>,
    /// Ordered by date ascending
    pub price_history: Vec<PricePoint>,
    pub metrics: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchDecision {
    pub topic: String,
    pub symbol: String,
    pub workers: Vec<AgentKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingData {
    News { query: String, items: Vec<NewsItem> },
    Finance(FinanceSnapshot),
    Dispatch(DispatchDecision),
    Report(Report),
}

/// Structured output of one agent for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub agent: AgentKind,
    /// Human-readable one-liner, surfaced as `agent_output.content`
    pub summary: String,
    pub data: FindingData,
    /// Set when the provider answered with mock, rate-limited or partial data
    #[serde(default)]
    pub low_confidence: bool,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Finding {
    pub fn news_items(&self) -> &[NewsItem] {
        match &self.data {
            FindingData::News { items, .. } => items,
            _ => &[],
        }
    }

    pub fn finance(&self) -> Option<&FinanceSnapshot> {
        match &self.data {
            FindingData::Finance(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&Report> {
        match &self.data {
            FindingData::Report(report) => Some(report),
            _ => None,
        }
    }

    /// Citable sources carried by this finding, in order.
    pub fn sources(&self) -> Vec<Source> {
        self.news_items()
            .iter()
            .filter(|item| !item.url.is_empty())
            .map(|item| Source {
                title: item.title.clone(),
                url: item.url.clone(),
            })
            .collect()
    }
}

// ============= Tool Types =============

/// External data providers reachable through the tool gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Search,
    Finance,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Search => "search",
            ProviderKind::Finance => "finance",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Success,
    Failed { kind: String },
}

/// Record of one gateway call, kept only inside the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub provider: ProviderKind,
    pub fingerprint: String,
    pub cached: bool,
    pub attempts: u32,
    pub outcome: ToolCallOutcome,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("InvalidPromptError: {0}")]
    InvalidPrompt(String),

    #[error("ToolUnavailableError: {0}")]
    ToolUnavailable(ProviderKind),

    #[error("ToolFailedError: {provider}: {reason}")]
    ToolFailed {
        provider: ProviderKind,
        reason: String,
    },

    #[error("DependencyCycleError: {0}")]
    DependencyCycle(String),

    #[error("SessionBusyError: session {0} is already running")]
    SessionBusy(String),

    #[error("CancelledError: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled(_))
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::InvalidPrompt(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SessionBusy(_) | AppError::DependencyCycle(_) | AppError::Cancelled(_) => {
                StatusCode::CONFLICT
            }
            AppError::ToolUnavailable(_) | AppError::ToolFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Configuration(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
