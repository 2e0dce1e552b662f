//! Agent Registry
//!
//! Static lookup from agent name (or [`AgentKind`]) to the agent that runs
//! tasks assigned to it. The set of agents is closed; registering replaces
//! the implementation behind a name, it never adds a new name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::{Agent, FinancialAnalyst, Manager, NewsResearcher, ReportWriter};
use crate::types::{AgentKind, AppError, Result};
use crate::utils::toml_config::SufficiencyPolicy;

pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    manager: Arc<Manager>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(SufficiencyPolicy::default())
    }
}

impl AgentRegistry {
    pub fn new(policy: SufficiencyPolicy) -> Self {
        let manager = Arc::new(Manager::new(policy));
        let mut agents: HashMap<AgentKind, Arc<dyn Agent>> = HashMap::new();
        agents.insert(AgentKind::Manager, manager.clone());
        agents.insert(AgentKind::NewsResearcher, Arc::new(NewsResearcher));
        agents.insert(AgentKind::FinancialAnalyst, Arc::new(FinancialAnalyst));
        agents.insert(AgentKind::ReportWriter, Arc::new(ReportWriter));
        Self { agents, manager }
    }

    /// Swap the implementation behind one agent name
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn get(&self, kind: AgentKind) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Agent not registered: {}", kind)))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn Agent>> {
        let kind = AgentKind::from_name(name)
            .ok_or_else(|| AppError::NotFound(format!("Unknown agent: {}", name)))?;
        self.get(kind)
    }

    /// The Manager, for its sufficiency checks
    pub fn manager(&self) -> &Manager {
        &self.manager
    }
}
