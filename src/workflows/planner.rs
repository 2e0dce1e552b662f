//! Task Planner
//!
//! Turns a prompt into an ordered, dependency-annotated task list. Plans are a
//! fixed template keyed by strategy; only the topic and ticker vary.
//!
//! | Strategy     | Tasks (index: agent → depends on)                                   |
//! |--------------|----------------------------------------------------------------------|
//! | sequential   | 0: NewsResearcher, 1: FinancialAnalyst → [0], 2: ReportWriter → [0, 1] |
//! | hierarchical | 0: Manager, 1: NewsResearcher → [0], 2: FinancialAnalyst → [0], 3: ReportWriter → [0, 1, 2] |
//!
//! In the hierarchical plan, a dependency on the Manager is satisfied by its
//! dispatch decision rather than by the Manager reaching `done`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::{AgentKind, AppError, Result, Strategy, Task};
use crate::utils::toml_config::PlannerConfig;

/// Most tokens kept in an extracted topic
const MAX_TOPIC_WORDS: usize = 3;
/// Longest parenthesized token treated as a ticker
const MAX_TICKER_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub strategy: Strategy,
    pub topic: String,
    pub symbol: String,
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    /// First task assigned to `agent`
    pub fn find(&self, agent: AgentKind) -> Option<&Task> {
        self.tasks.iter().find(|t| t.agent == agent)
    }

    /// Group tasks into tiers: every task's dependencies sit in earlier tiers.
    pub fn tiers(&self) -> Result<Vec<Vec<usize>>> {
        topological_tiers(&self.tasks)
    }
}

/// Follow-up task requested by the Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Agent name as it appears in the agent table
    pub agent: String,
    pub title: String,
    /// Existing tasks the new task waits for
    pub depends_on: Vec<usize>,
    /// Existing tasks that must now also wait for the new task
    pub blocks: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TaskPlanner {
    default_symbol: String,
}

impl Default for TaskPlanner {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::default())
    }
}

impl TaskPlanner {
    pub fn new(default_symbol: impl Into<String>) -> Self {
        Self {
            default_symbol: default_symbol.into().trim().to_uppercase(),
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        Self::new(config.default_symbol.clone())
    }

    /// Decompose a prompt into a plan for `strategy`.
    pub fn plan(&self, prompt: &str, strategy: Strategy) -> Result<Plan> {
        let subject = extract_subject(prompt)?;
        let topic = subject.topic;
        let symbol = subject.ticker.unwrap_or_else(|| self.default_symbol.clone());

        let research = research_title(&topic);
        let analysis = analysis_title(&topic, &symbol);
        let writing = writing_title(&topic);

        let tasks = match strategy {
            Strategy::Sequential => vec![
                Task::new(0, AgentKind::NewsResearcher, research, vec![]),
                Task::new(1, AgentKind::FinancialAnalyst, analysis, vec![0]),
                Task::new(2, AgentKind::ReportWriter, writing, vec![0, 1]),
            ],
            Strategy::Hierarchical => vec![
                Task::new(0, AgentKind::Manager, MANAGER_TITLE, vec![]),
                Task::new(1, AgentKind::NewsResearcher, research, vec![0]),
                Task::new(2, AgentKind::FinancialAnalyst, analysis, vec![0]),
                Task::new(3, AgentKind::ReportWriter, writing, vec![0, 1, 2]),
            ],
        };

        Ok(Plan {
            strategy,
            topic,
            symbol,
            tasks,
        })
    }

    /// Validate a follow-up request and append it to `plan`.
    ///
    /// Returns the new task's index. On any error the plan is left untouched.
    pub fn admit(&self, plan: &mut Plan, request: TaskRequest) -> Result<usize> {
        let agent = AgentKind::from_name(&request.agent)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown agent: {}", request.agent)))?;
        if !agent.is_worker() {
            return Err(AppError::InvalidInput(format!(
                "{} cannot be assigned a follow-up task",
                agent
            )));
        }

        let new_index = plan.tasks.len();
        if let Some(missing) = request
            .depends_on
            .iter()
            .chain(request.blocks.iter())
            .find(|i| **i >= new_index)
        {
            return Err(AppError::InvalidInput(format!(
                "Follow-up references unknown task {}",
                missing
            )));
        }

        let mut tasks = plan.tasks.clone();
        for blocked in &request.blocks {
            let deps = &mut tasks[*blocked].depends_on;
            if !deps.contains(&new_index) {
                deps.push(new_index);
            }
        }
        let mut task = Task::new(new_index, agent, request.title, request.depends_on);
        task.essential = false;
        tasks.push(task);

        topological_tiers(&tasks)?;
        plan.tasks = tasks;
        Ok(new_index)
    }
}

pub const MANAGER_TITLE: &str = "Create plan and delegate to specialists.";

pub fn research_title(topic: &str) -> String {
    format!("Find latest news, press releases, and product launches for {}.", topic)
}

pub fn analysis_title(topic: &str, symbol: &str) -> String {
    format!(
        "Pull recent stock/financial overview for {} (symbol: {}).",
        topic, symbol
    )
}

pub fn writing_title(topic: &str) -> String {
    format!(
        "Write a final business memo synthesizing findings about {}.",
        topic
    )
}

/// Kahn's algorithm, grouped by depth. Fails on any cycle.
fn topological_tiers(tasks: &[Task]) -> Result<Vec<Vec<usize>>> {
    let n = tasks.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for task in tasks {
        for dep in &task.depends_on {
            if *dep >= n {
                return Err(AppError::InvalidInput(format!(
                    "Task {} depends on unknown task {}",
                    task.index, dep
                )));
            }
            indegree[task.index] += 1;
            dependents[*dep].push(task.index);
        }
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
    let mut tiers = Vec::new();
    let mut visited = 0;

    while !ready.is_empty() {
        let tier: Vec<usize> = ready.drain(..).collect();
        visited += tier.len();
        for index in &tier {
            for dependent in &dependents[*index] {
                indegree[*dependent] -= 1;
                if indegree[*dependent] == 0 {
                    ready.push_back(*dependent);
                }
            }
        }
        tiers.push(tier);
    }

    if visited != n {
        let stuck: Vec<String> = (0..n)
            .filter(|i| indegree[*i] > 0)
            .map(|i| i.to_string())
            .collect();
        return Err(AppError::DependencyCycle(format!(
            "tasks {} form a cycle",
            stuck.join(", ")
        )));
    }

    Ok(tiers)
}

/// What a prompt is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub topic: String,
    pub ticker: Option<String>,
}

/// Pull the topic and an optional ticker out of a free-text prompt.
pub fn extract_subject(prompt: &str) -> Result<Subject> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidPrompt("prompt is empty".into()));
    }
    if trimmed.chars().count() < 3 {
        return Err(AppError::InvalidPrompt(
            "prompt must be at least 3 characters".into(),
        ));
    }

    let (text, ticker) = strip_tickers(trimmed);
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return Err(AppError::InvalidPrompt(
            "prompt contains no words to research".into(),
        ));
    }

    let capitalized: Vec<bool> = words
        .iter()
        .map(|w| w.chars().next().is_some_and(char::is_uppercase))
        .collect();
    let others = capitalized.iter().skip(1).any(|c| *c);

    let mut run_end = None;
    for i in (0..words.len()).rev() {
        if capitalized[i] && (i > 0 || !others) {
            run_end = Some(i);
            break;
        }
    }

    let topic_words: Vec<&str> = match run_end {
        Some(end) => {
            let mut start = end;
            while start > 0 && capitalized[start - 1] && (start - 1 > 0 || !others) {
                start -= 1;
            }
            let start = start.max((end + 1).saturating_sub(MAX_TOPIC_WORDS));
            words[start..=end].to_vec()
        }
        None => {
            let start = words.len().saturating_sub(MAX_TOPIC_WORDS);
            words[start..].to_vec()
        }
    };

    Ok(Subject {
        topic: topic_words.join(" "),
        ticker,
    })
}

/// Remove parenthesized groups, returning the remaining text and the first
/// group that looks like a ticker.
fn strip_tickers(text: &str) -> (String, Option<String>) {
    let mut remaining = String::with_capacity(text.len());
    let mut ticker = None;
    let mut rest = text;

    while let Some(open) = rest.find('(') {
        let Some(close) = rest[open..].find(')').map(|c| open + c) else {
            break;
        };
        remaining.push_str(&rest[..open]);
        remaining.push(' ');

        let inner = rest[open + 1..close].trim();
        if ticker.is_none()
            && (1..=MAX_TICKER_LEN).contains(&inner.len())
            && inner.chars().all(|c| c.is_ascii_alphanumeric())
        {
            ticker = Some(inner.to_uppercase());
        }
        rest = &rest[close + 1..];
    }
    remaining.push_str(rest);

    (remaining, ticker)
}
