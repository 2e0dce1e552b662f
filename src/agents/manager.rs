use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::{Agent, AgentContext, AgentResult};
use crate::types::{AgentKind, DispatchDecision, Finding, FindingData, Task};
use crate::utils::toml_config::SufficiencyPolicy;
use crate::workflows::planner::{Plan, TaskRequest};

/// Outcome of the Manager's sufficiency check on one Finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub agent: AgentKind,
    pub sufficient: bool,
    pub reasons: Vec<String>,
}

/// Coordinates the hierarchical strategy: dispatches the workers, then
/// checks their Findings against the sufficiency policy.
#[derive(Debug, Clone, Default)]
pub struct Manager {
    policy: SufficiencyPolicy,
}

impl Manager {
    pub fn new(policy: SufficiencyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SufficiencyPolicy {
        &self.policy
    }

    pub fn assess(&self, finding: &Finding) -> Assessment {
        let mut reasons = Vec::new();

        if self.policy.reject_low_confidence && finding.low_confidence {
            reasons.push("low confidence data".to_string());
        }

        match &finding.data {
            FindingData::News { items, .. } if items.len() < self.policy.min_news_results => {
                reasons.push(format!(
                    "{} of {} required news results",
                    items.len(),
                    self.policy.min_news_results
                ));
            }
            FindingData::Finance(snapshot)
                if self.policy.require_price
                    && snapshot.price.is_none()
                    && snapshot.price_history.is_empty() =>
            {
                reasons.push(format!("no price data for {}", snapshot.symbol));
            }
            _ => {}
        }

        Assessment {
            agent: finding.agent,
            sufficient: reasons.is_empty(),
            reasons,
        }
    }

    /// Re-dispatch request for an insufficient Finding's task.
    ///
    /// The follow-up waits for what the original waited for, and every task
    /// downstream of the original also waits for it.
    pub fn follow_up(&self, plan: &Plan, original: &Task, assessment: &Assessment) -> TaskRequest {
        let blocks = plan
            .tasks
            .iter()
            .filter(|t| t.depends_on.contains(&original.index))
            .map(|t| t.index)
            .collect();

        TaskRequest {
            agent: original.agent.name().to_string(),
            title: format!(
                "Retry: {} ({})",
                original.title.trim_end_matches('.'),
                assessment.reasons.join("; ")
            ),
            depends_on: original.depends_on.clone(),
            blocks,
        }
    }

    /// Human-readable verdict for the validation `agent_output`
    pub fn verdict(assessments: &[Assessment]) -> String {
        let reasons: Vec<String> = assessments
            .iter()
            .filter(|a| !a.sufficient)
            .map(|a| format!("{}: {}", a.agent, a.reasons.join("; ")))
            .collect();

        if reasons.is_empty() {
            "Validation passed.".to_string()
        } else {
            format!(
                "Validation incomplete ({}); proceeding with available data.",
                reasons.join(", ")
            )
        }
    }
}

#[async_trait]
impl Agent for Manager {
    fn kind(&self) -> AgentKind {
        AgentKind::Manager
    }

    async fn produce(&self, ctx: &AgentContext, _upstream: &[Finding]) -> AgentResult {
        let workers = vec![AgentKind::NewsResearcher, AgentKind::FinancialAnalyst];
        Ok(Finding {
            agent: AgentKind::Manager,
            summary: format!(
                "Delegating research to {} and {}, then requesting synthesis from {}.",
                AgentKind::NewsResearcher,
                AgentKind::FinancialAnalyst,
                AgentKind::ReportWriter
            ),
            data: FindingData::Dispatch(DispatchDecision {
                topic: ctx.topic.clone(),
                symbol: ctx.symbol.clone(),
                workers,
            }),
            low_confidence: false,
            tool_calls: Vec::new(),
        })
    }
}
