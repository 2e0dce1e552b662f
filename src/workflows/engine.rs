//! Execution Controller
//!
//! Drives one session run from plan to terminal event:
//!
//! ```text
//! created → planned → running → done | failed
//! ```
//!
//! Every task goes through `agent_started → agent_output → agent_finished`.
//! A failed task emits an `agent_output` carrying `{"error": ...}` instead of
//! `agent_finished`. Tasks of one tier run concurrently on a `JoinSet`; a
//! failed essential task cancels its in-flight siblings and fails the run.
//! Every run ends in exactly one `final_report` or `error` event.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agents::writer::merge_sources;
use crate::agents::{AgentContext, AgentError, AgentRegistry, Assessment, Manager};
use crate::db::traits::SessionRepository;
use crate::events::{EventPayload, EventPublisher};
use crate::tools::ToolGateway;
use crate::types::{AgentKind, AppError, Finding, Report, Result, Session, SessionStatus, Strategy, Task, TaskStatus};
use crate::workflows::planner::{Plan, TaskPlanner};

/// Reason recorded on sessions and tasks stopped by cancellation
pub const CANCELLED_REASON: &str = "cancelled";

/// In-memory state of one run.
struct RunState {
    session_id: String,
    plan: Plan,
    findings: HashMap<usize, Finding>,
    /// follow-up index → original index
    follow_ups: HashMap<usize, usize>,
    /// original index → successful follow-up index
    replacements: HashMap<usize, usize>,
}

impl RunState {
    fn new(session_id: &str, plan: Plan) -> Self {
        Self {
            session_id: session_id.to_string(),
            plan,
            findings: HashMap::new(),
            follow_ups: HashMap::new(),
            replacements: HashMap::new(),
        }
    }

    /// The Finding that stands for `index`, after follow-up replacement.
    fn effective_finding(&self, index: usize) -> Option<&Finding> {
        let effective = self.replacements.get(&index).copied().unwrap_or(index);
        self.findings.get(&effective)
    }

    /// Findings of a task's dependencies, in dependency order.
    ///
    /// Follow-ups are reached through the task they replace, never directly.
    fn upstream_for(&self, task: &Task) -> Vec<Finding> {
        task.depends_on
            .iter()
            .filter(|dep| !self.follow_ups.contains_key(dep))
            .filter_map(|dep| self.effective_finding(*dep).cloned())
            .collect()
    }

    fn index_of(&self, agent: AgentKind) -> Result<usize> {
        self.plan
            .find(agent)
            .map(|t| t.index)
            .ok_or_else(|| AppError::Internal(format!("plan has no {} task", agent)))
    }
}

#[derive(Clone)]
pub struct ExecutionController {
    repo: Arc<dyn SessionRepository>,
    publisher: Arc<EventPublisher>,
    gateway: Arc<ToolGateway>,
    agents: Arc<AgentRegistry>,
    planner: TaskPlanner,
    redispatch: bool,
}

impl ExecutionController {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        publisher: Arc<EventPublisher>,
        gateway: Arc<ToolGateway>,
        agents: Arc<AgentRegistry>,
        planner: TaskPlanner,
    ) -> Self {
        Self {
            repo,
            publisher,
            gateway,
            agents,
            planner,
            redispatch: true,
        }
    }

    /// Allow the Manager to re-dispatch an insufficient worker task once
    pub fn with_redispatch(mut self, enabled: bool) -> Self {
        self.redispatch = enabled;
        self
    }

    /// Run a session to completion.
    ///
    /// Returns the report on success. On failure the session is already
    /// marked `failed` and the terminal `error` event published; the error is
    /// returned for the caller's logs.
    pub async fn run(&self, session_id: &str, cancel: CancellationToken) -> Result<Report> {
        let session = match self.repo.get_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return Err(AppError::NotFound(format!("Session {} not found", session_id)));
            }
            Err(e) => {
                // run_requested is already out; subscribers still need a terminal event
                self.fail(session_id, &e, cancel.is_cancelled()).await;
                return Err(e);
            }
        };
        if session.status.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "Session {} already finished",
                session_id
            )));
        }

        info!(session_id = %session_id, strategy = %session.strategy, "run started");

        let outcome = AssertUnwindSafe(self.drive(&session, &cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(AppError::Internal(format!(
                    "run panicked: {}",
                    panic_message(&*panic)
                )))
            });

        let outcome = match outcome {
            Ok(report) => match self.complete(session_id, &report).await {
                Ok(()) => Ok(report),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            self.fail(session_id, e, cancel.is_cancelled()).await;
        }
        outcome
    }

    async fn drive(&self, session: &Session, cancel: &CancellationToken) -> Result<Report> {
        let session_id = session.id.as_str();
        let plan = self.planner.plan(&session.prompt, session.strategy)?;

        self.repo.save_tasks(session_id, &plan.tasks).await?;
        self.repo
            .update_session_status(session_id, SessionStatus::Planned, None)
            .await?;
        self.publisher
            .publish(session_id, EventPayload::task_planned(&plan))
            .await?;
        self.repo
            .update_session_status(session_id, SessionStatus::Running, None)
            .await?;

        info!(
            session_id = %session_id,
            topic = %plan.topic,
            symbol = %plan.symbol,
            tasks = plan.tasks.len(),
            "plan ready"
        );

        let mut state = RunState::new(session_id, plan);
        match session.strategy {
            Strategy::Sequential => self.run_sequential(&mut state, cancel).await?,
            Strategy::Hierarchical => self.run_hierarchical(&mut state, cancel).await?,
        }

        let writer = state.index_of(AgentKind::ReportWriter)?;
        state
            .findings
            .get(&writer)
            .and_then(Finding::report)
            .cloned()
            .ok_or_else(|| AppError::Internal("report writer produced no report".into()))
    }

    async fn run_sequential(&self, state: &mut RunState, cancel: &CancellationToken) -> Result<()> {
        for tier in state.plan.tiers()? {
            self.run_tier(state, &tier, cancel).await?;
        }
        Ok(())
    }

    async fn run_hierarchical(&self, state: &mut RunState, cancel: &CancellationToken) -> Result<()> {
        let manager_index = state.index_of(AgentKind::Manager)?;
        let mut manager_task = state.plan.tasks[manager_index].clone();

        let supervised = self.supervise(state, &mut manager_task, cancel).await;
        if supervised.is_err() && !manager_task.status.is_terminal() {
            manager_task.status = TaskStatus::Cancelled;
            manager_task.reason = Some(CANCELLED_REASON.to_string());
            if let Err(e) = self.repo.save_tasks(&state.session_id, &[manager_task.clone()]).await {
                warn!(session_id = %state.session_id, error = %e, "failed to record aborted manager task");
            }
        }
        state.plan.tasks[manager_index] = manager_task;
        supervised?;

        let writer = state.index_of(AgentKind::ReportWriter)?;
        self.run_tier(state, &[writer], cancel).await
    }

    /// Manager phase: dispatch, join the workers, check sufficiency,
    /// re-dispatch once where needed, then validate.
    async fn supervise(
        &self,
        state: &mut RunState,
        manager_task: &mut Task,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let session_id = state.session_id.clone();
        let ctx = self.context(state, manager_task.clone(), cancel.clone());

        self.begin(&session_id, manager_task).await?;
        // follow-ups persist the whole plan
        state.plan.tasks[manager_task.index] = manager_task.clone();
        let dispatch = self.produce(&ctx, manager_task, &[]).await?;
        state.findings.insert(manager_task.index, dispatch);

        let workers: Vec<usize> = state
            .plan
            .tasks
            .iter()
            .filter(|t| t.agent.is_worker())
            .map(|t| t.index)
            .collect();
        self.run_tier(state, &workers, cancel).await?;

        let manager = self.agents.manager();
        let mut redispatched = Vec::new();
        if self.redispatch {
            redispatched = self.redispatch_insufficient(state, manager, &workers).await?;
            if !redispatched.is_empty() {
                self.run_tier(state, &redispatched, cancel).await?;
                for follow_up in &redispatched {
                    if state.plan.tasks[*follow_up].status == TaskStatus::Done {
                        if let Some(original) = state.follow_ups.get(follow_up) {
                            state.replacements.insert(*original, *follow_up);
                        }
                    }
                }
            }
        }

        let effective: Vec<Finding> = workers
            .iter()
            .filter_map(|w| state.effective_finding(*w).cloned())
            .collect();
        let assessments: Vec<Assessment> = effective.iter().map(|f| manager.assess(f)).collect();

        self.publisher
            .publish(
                &session_id,
                EventPayload::AgentOutput {
                    agent: AgentKind::Manager,
                    content: Manager::verdict(&assessments),
                    data: Some(json!({
                        "sources_found": merge_sources(&effective).len(),
                        "assessments": assessments,
                        "redispatched": redispatched,
                    })),
                },
            )
            .await?;

        self.finish(&session_id, manager_task).await
    }

    /// Admit one follow-up per insufficient worker Finding.
    async fn redispatch_insufficient(
        &self,
        state: &mut RunState,
        manager: &Manager,
        workers: &[usize],
    ) -> Result<Vec<usize>> {
        let mut admitted = Vec::new();

        for worker in workers {
            let Some(finding) = state.findings.get(worker) else {
                continue;
            };
            let assessment = manager.assess(finding);
            if assessment.sufficient {
                continue;
            }

            let original = state.plan.tasks[*worker].clone();
            let request = manager.follow_up(&state.plan, &original, &assessment);
            match self.planner.admit(&mut state.plan, request) {
                Ok(index) => {
                    state.follow_ups.insert(index, *worker);
                    self.repo.save_tasks(&state.session_id, &state.plan.tasks).await?;
                    info!(
                        session_id = %state.session_id,
                        agent = %original.agent,
                        follow_up = index,
                        "re-dispatching insufficient finding"
                    );
                    self.publisher
                        .publish(
                            &state.session_id,
                            EventPayload::AgentOutput {
                                agent: AgentKind::Manager,
                                content: format!(
                                    "Re-dispatching {}: {}.",
                                    original.agent,
                                    assessment.reasons.join("; ")
                                ),
                                data: Some(json!({
                                    "follow_up": state.plan.tasks[index],
                                    "assessment": assessment,
                                })),
                            },
                        )
                        .await?;
                    admitted.push(index);
                }
                Err(e) => {
                    warn!(
                        session_id = %state.session_id,
                        agent = %original.agent,
                        error = %e,
                        "follow-up rejected"
                    );
                    self.publisher
                        .publish(
                            &state.session_id,
                            EventPayload::AgentOutput {
                                agent: AgentKind::Manager,
                                content: format!("Follow-up for {} rejected.", original.agent),
                                data: Some(json!({ "error": e.to_string() })),
                            },
                        )
                        .await?;
                }
            }
        }

        Ok(admitted)
    }

    /// Run a set of ready tasks concurrently and join them.
    async fn run_tier(&self, state: &mut RunState, indices: &[usize], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled("session cancelled".into()));
        }

        let tier_cancel = cancel.child_token();
        let mut set = JoinSet::new();

        for index in indices {
            let task = state
                .plan
                .task(*index)
                .cloned()
                .ok_or_else(|| AppError::Internal(format!("unknown task {}", index)))?;
            let upstream = state.upstream_for(&task);
            let ctx = self.context(state, task, tier_cancel.clone());
            let this = self.clone();

            set.spawn(async move {
                let mut task = ctx.task.clone();
                let result = this.run_task(&ctx, &mut task, &upstream).await;
                (task, result)
            });
        }

        let mut first_error: Option<AppError> = None;
        while let Some(joined) = set.join_next().await {
            let (task, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(session_id = %state.session_id, error = %e, "task join failed");
                    if first_error.is_none() {
                        tier_cancel.cancel();
                        first_error = Some(AppError::Internal(format!("task join failed: {}", e)));
                    }
                    continue;
                }
            };

            let index = task.index;
            let essential = task.essential;
            let agent = task.agent;
            state.plan.tasks[index] = task;

            match result {
                Ok(finding) => {
                    state.findings.insert(index, finding);
                }
                Err(e) if !essential => {
                    warn!(
                        session_id = %state.session_id,
                        agent = %agent,
                        error = %e,
                        "optional task failed, keeping original finding"
                    );
                }
                Err(e) => {
                    if first_error.is_none() {
                        tier_cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled("session cancelled".into()));
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_task(&self, ctx: &AgentContext, task: &mut Task, upstream: &[Finding]) -> Result<Finding> {
        self.begin(&ctx.session_id, task).await?;
        let finding = self.produce(ctx, task, upstream).await?;
        self.finish(&ctx.session_id, task).await?;
        Ok(finding)
    }

    async fn begin(&self, session_id: &str, task: &mut Task) -> Result<()> {
        task.status = TaskStatus::Running;
        self.repo.save_tasks(session_id, &[task.clone()]).await?;
        self.publisher
            .publish(session_id, EventPayload::AgentStarted { agent: task.agent })
            .await?;
        info!(session_id = %session_id, agent = %task.agent, index = task.index, "agent started");
        Ok(())
    }

    /// Call the agent and publish its `agent_output`, success or failure.
    async fn produce(&self, ctx: &AgentContext, task: &mut Task, upstream: &[Finding]) -> Result<Finding> {
        let session_id = ctx.session_id.as_str();
        let agent = self.agents.get(task.agent)?;

        let produced = AssertUnwindSafe(agent.produce(ctx, upstream))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(AgentError::from(AppError::Internal(format!(
                    "{} panicked: {}",
                    task.agent,
                    panic_message(&*panic)
                ))))
            });

        match produced {
            Ok(finding) => {
                let data = serde_json::to_value(&finding)
                    .map_err(|e| AppError::Internal(format!("Failed to encode finding: {}", e)))?;
                self.publisher
                    .publish(
                        session_id,
                        EventPayload::AgentOutput {
                            agent: task.agent,
                            content: finding.summary.clone(),
                            data: Some(data),
                        },
                    )
                    .await?;
                Ok(finding)
            }
            Err(AgentError { error, .. }) if error.is_cancelled() || ctx.cancel.is_cancelled() => {
                task.status = TaskStatus::Cancelled;
                task.reason = Some(CANCELLED_REASON.to_string());
                self.repo.save_tasks(session_id, &[task.clone()]).await?;
                info!(session_id = %session_id, agent = %task.agent, "agent cancelled");
                Err(AppError::Cancelled(format!("{} aborted", task.agent)))
            }
            Err(AgentError { error, tool_calls }) => {
                let message = error.to_string();
                warn!(session_id = %session_id, agent = %task.agent, error = %message, "agent failed");
                self.publisher
                    .publish(
                        session_id,
                        EventPayload::AgentOutput {
                            agent: task.agent,
                            content: format!("{} failed.", task.agent),
                            data: Some(json!({ "error": message, "tool_calls": tool_calls })),
                        },
                    )
                    .await?;
                task.status = TaskStatus::Failed;
                task.reason = Some(message);
                self.repo.save_tasks(session_id, &[task.clone()]).await?;
                Err(error)
            }
        }
    }

    async fn finish(&self, session_id: &str, task: &mut Task) -> Result<()> {
        task.status = TaskStatus::Done;
        self.repo.save_tasks(session_id, &[task.clone()]).await?;
        self.publisher
            .publish(session_id, EventPayload::AgentFinished { agent: task.agent })
            .await?;
        info!(session_id = %session_id, agent = %task.agent, "agent finished");
        Ok(())
    }

    fn context(&self, state: &RunState, task: Task, cancel: CancellationToken) -> AgentContext {
        AgentContext {
            session_id: state.session_id.clone(),
            task,
            topic: state.plan.topic.clone(),
            symbol: state.plan.symbol.clone(),
            gateway: self.gateway.clone(),
            cancel,
        }
    }

    /// Persist the report and status, then publish `final_report`.
    async fn complete(&self, session_id: &str, report: &Report) -> Result<()> {
        self.repo.save_report(session_id, report).await?;
        self.repo
            .update_session_status(session_id, SessionStatus::Done, None)
            .await?;
        self.publisher
            .publish(
                session_id,
                EventPayload::FinalReport {
                    markdown: report.markdown.clone(),
                    sources: report.sources.clone(),
                },
            )
            .await?;
        info!(session_id = %session_id, sources = report.sources.len(), "run finished");
        Ok(())
    }

    /// Mark the session failed, then publish the terminal `error`.
    async fn fail(&self, session_id: &str, cause: &AppError, cancelled: bool) {
        let (reason, message) = if cancelled {
            self.cancel_open_tasks(session_id).await;
            (
                CANCELLED_REASON.to_string(),
                AppError::Cancelled("session cancelled".into()).to_string(),
            )
        } else {
            (cause.to_string(), cause.to_string())
        };

        warn!(session_id = %session_id, reason = %reason, "run failed");

        if let Err(e) = self
            .repo
            .update_session_status(session_id, SessionStatus::Failed, Some(&reason))
            .await
        {
            error!(session_id = %session_id, error = %e, "failed to record session failure");
        }
        if let Err(e) = self
            .publisher
            .publish(session_id, EventPayload::Error { message })
            .await
        {
            error!(session_id = %session_id, error = %e, "failed to publish terminal error");
        }
    }

    async fn cancel_open_tasks(&self, session_id: &str) {
        let tasks = match self.repo.get_tasks(session_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "failed to load tasks for cancellation");
                return;
            }
        };

        let open: Vec<Task> = tasks
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .map(|mut t| {
                t.status = TaskStatus::Cancelled;
                t.reason = Some(CANCELLED_REASON.to_string());
                t
            })
            .collect();
        if let Err(e) = self.repo.save_tasks(session_id, &open).await {
            error!(session_id = %session_id, error = %e, "failed to cancel open tasks");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
