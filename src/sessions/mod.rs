//! Session Manager
//!
//! Keyed registry of live sessions. Each entry carries the run guard (at most
//! one in-flight run per session) and the cancellation token of that run.
//! Entries are locked per key through `DashMap`; there is no global lock.
//!
//! Finished sessions are evicted from memory after `sessions.retention_secs`;
//! their rows and event logs stay in the store and are re-hydrated on demand.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::db::SessionRepository;
use crate::events::{EventPayload, EventPublisher, EventStream};
use crate::tools::ToolGateway;
use crate::types::{AppError, Report, Result, Session, SessionSnapshot, SessionStatus, Strategy};
use crate::utils::toml_config::ConfigManager;
use crate::workflows::{ExecutionController, TaskPlanner};

#[derive(Debug)]
struct LiveSession {
    /// Set while a run is in flight
    cancel: Option<CancellationToken>,
    finished: bool,
    touched: Instant,
}

impl LiveSession {
    fn idle() -> Self {
        Self {
            cancel: None,
            finished: false,
            touched: Instant::now(),
        }
    }

    fn is_running(&self) -> bool {
        self.cancel.is_some()
    }
}

pub struct SessionManager {
    repo: Arc<dyn SessionRepository>,
    publisher: Arc<EventPublisher>,
    gateway: Arc<ToolGateway>,
    config: Arc<ConfigManager>,
    live: Arc<DashMap<String, LiveSession>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(repo: Arc<dyn SessionRepository>, gateway: Arc<ToolGateway>, config: Arc<ConfigManager>) -> Self {
        let buffer = config.config().sessions.event_buffer;
        Self {
            publisher: Arc::new(EventPublisher::new(repo.clone(), buffer)),
            repo,
            gateway,
            config,
            live: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<ToolGateway> {
        &self.gateway
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Validate the prompt, persist a new session and announce it.
    ///
    /// An invalid prompt leaves no trace: no row, no event.
    pub async fn create(&self, prompt: &str, strategy: Strategy) -> Result<Session> {
        let config = self.config.config();
        TaskPlanner::from_config(&config.planner).plan(prompt, strategy)?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.trim().to_string(),
            strategy,
            status: SessionStatus::Created,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.repo.create_session(&session).await?;
        self.publisher
            .publish(
                &session.id,
                EventPayload::SessionCreated {
                    id: session.id.clone(),
                },
            )
            .await?;
        self.live.insert(session.id.clone(), LiveSession::idle());

        info!(session_id = %session.id, strategy = %strategy, "session created");
        Ok(session)
    }

    /// Start a run in the background.
    ///
    /// The returned handle resolves to the run's outcome; dropping it detaches
    /// the run.
    pub async fn run(&self, session_id: &str) -> Result<JoinHandle<Result<Report>>> {
        let session = self.load(session_id).await?;
        if session.status.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "Session {} already finished",
                session_id
            )));
        }

        let cancel = self.shutdown.child_token();
        {
            let mut entry = self
                .live
                .entry(session_id.to_string())
                .or_insert_with(LiveSession::idle);
            if entry.is_running() {
                return Err(AppError::SessionBusy(session_id.to_string()));
            }
            entry.cancel = Some(cancel.clone());
            entry.touched = Instant::now();
        }

        if let Err(e) = self
            .publisher
            .publish(
                session_id,
                EventPayload::RunRequested {
                    id: session_id.to_string(),
                },
            )
            .await
        {
            self.release(session_id);
            return Err(e);
        }

        let controller = self.controller();
        let live = self.live.clone();
        let id = session_id.to_string();
        info!(session_id = %id, "run requested");

        Ok(tokio::spawn(async move {
            let outcome = controller.run(&id, cancel).await;
            if let Err(e) = &outcome {
                debug!(session_id = %id, error = %e, "run ended with error");
            }
            if let Some(mut entry) = live.get_mut(&id) {
                entry.cancel = None;
                entry.finished = true;
                entry.touched = Instant::now();
            }
            outcome
        }))
    }

    /// Cancel the in-flight run of a session.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        self.load(session_id).await?;

        let token = self
            .live
            .get(session_id)
            .and_then(|entry| entry.cancel.clone())
            .ok_or_else(|| AppError::InvalidInput(format!("Session {} is not running", session_id)))?;

        info!(session_id = %session_id, "cancelling run");
        token.cancel();
        Ok(())
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let session = self.load(session_id).await?;
        let tasks = self.repo.get_tasks(session_id).await?;
        let report = match session.status {
            SessionStatus::Done => self.repo.get_report(session_id).await?,
            _ => None,
        };
        Ok(SessionSnapshot {
            session,
            tasks,
            report,
        })
    }

    /// Replay events after `after_seq`, then follow the live stream.
    ///
    /// The stream also ends at [`Self::shutdown`], so open subscribers never
    /// hold up a graceful server stop.
    pub async fn subscribe(&self, session_id: &str, after_seq: u64) -> Result<EventStream> {
        self.load(session_id).await?;
        let stream = self.publisher.subscribe(session_id, after_seq).await?;
        let shutdown = self.shutdown.clone().cancelled_owned();
        Ok(Box::pin(stream.take_until(shutdown)))
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.live
            .get(session_id)
            .map(|entry| entry.is_running())
            .unwrap_or(false)
    }

    pub fn live_sessions(&self) -> usize {
        self.live.len()
    }

    /// Drop in-memory state of sessions finished longer than the retention window.
    pub fn evict_expired(&self) -> usize {
        let retention = Duration::from_secs(self.config.config().sessions.retention_secs);
        let mut evicted = Vec::new();

        self.live.retain(|id, entry| {
            let expired = entry.finished && !entry.is_running() && entry.touched.elapsed() >= retention;
            if expired {
                evicted.push(id.clone());
            }
            !expired
        });

        for id in &evicted {
            self.publisher.evict(id);
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "evicted finished sessions");
        }
        evicted.len()
    }

    /// Run [`Self::evict_expired`] periodically until [`Self::shutdown`].
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.config().sessions.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = timer.tick() => {
                        manager.evict_expired();
                    }
                }
            }
        })
    }

    /// Stop the sweeper and cancel every in-flight run
    pub fn shutdown(&self) {
        let running = self.live.iter().filter(|entry| entry.is_running()).count();
        if running > 0 {
            warn!(running, "shutting down with runs in flight");
        }
        self.shutdown.cancel();
    }

    /// A controller wired with the current planner and manager settings.
    fn controller(&self) -> ExecutionController {
        let config = self.config.config();
        ExecutionController::new(
            self.repo.clone(),
            self.publisher.clone(),
            self.gateway.clone(),
            Arc::new(AgentRegistry::new(config.manager.sufficiency.clone())),
            TaskPlanner::from_config(&config.planner),
        )
        .with_redispatch(config.manager.redispatch)
    }

    fn release(&self, session_id: &str) {
        if let Some(mut entry) = self.live.get_mut(session_id) {
            entry.cancel = None;
            entry.touched = Instant::now();
        }
    }

    async fn load(&self, session_id: &str) -> Result<Session> {
        self.repo
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SessionStore;
    use crate::tools::ToolRegistry;
    use crate::utils::toml_config::MarketScoutConfig;

    async fn manager(config: MarketScoutConfig) -> (Arc<SessionManager>, Arc<dyn SessionRepository>) {
        let repo: Arc<dyn SessionRepository> = Arc::new(SessionStore::new_memory().await.unwrap());
        let gateway = Arc::new(ToolGateway::with_registry(
            ToolRegistry::with_mock_providers(),
            &config.tools,
        ));
        let manager = SessionManager::new(repo.clone(), gateway, Arc::new(ConfigManager::from_config(config)));
        (Arc::new(manager), repo)
    }

    #[tokio::test]
    async fn test_invalid_prompt_creates_nothing() {
        let (manager, _) = manager(MarketScoutConfig::default()).await;
        let err = manager.create("   ", Strategy::Sequential).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPrompt(_)));
        assert_eq!(manager.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let (manager, _) = manager(MarketScoutConfig::default()).await;
        let session = manager
            .create("Generate a market report about Competitor X", Strategy::Sequential)
            .await
            .unwrap();

        let handle = manager.run(&session.id).await.unwrap();
        let report = handle.await.unwrap().unwrap();
        assert!(report.markdown.starts_with("# Market Research Memo"));

        let snapshot = manager.snapshot(&session.id).await.unwrap();
        assert_eq!(snapshot.session.status, SessionStatus::Done);
        assert_eq!(snapshot.tasks.len(), 3);
        assert!(snapshot.report.is_some());
        assert!(!manager.is_running(&session.id));

        let err = manager.run(&session.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (manager, _) = manager(MarketScoutConfig::default()).await;
        assert!(matches!(manager.run("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(manager.snapshot("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(manager.subscribe("nope", 0).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_requires_running_session() {
        let (manager, _) = manager(MarketScoutConfig::default()).await;
        let session = manager.create("Brief me on Acme", Strategy::Sequential).await.unwrap();
        assert!(matches!(
            manager.cancel(&session.id).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_evict_expired_drops_finished_sessions() {
        let mut config = MarketScoutConfig::default();
        config.sessions.retention_secs = 0;
        let (manager, repo) = manager(config).await;

        let session = manager.create("Brief me on Acme", Strategy::Sequential).await.unwrap();
        manager.run(&session.id).await.unwrap().await.unwrap().unwrap();
        assert_eq!(manager.live_sessions(), 1);

        assert_eq!(manager.evict_expired(), 1);
        assert_eq!(manager.live_sessions(), 0);
        assert_eq!(manager.publisher().live_sessions(), 0);

        // the store still has it
        assert!(repo.get_session(&session.id).await.unwrap().is_some());
        assert_eq!(manager.snapshot(&session.id).await.unwrap().session.status, SessionStatus::Done);
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_subscription() {
        let (manager, _) = manager(MarketScoutConfig::default()).await;
        let session = manager.create("Brief me on Acme", Strategy::Sequential).await.unwrap();

        // never run, so the log only holds session_created
        let mut stream = manager.subscribe(&session.id, 0).await.unwrap();
        assert_eq!(stream.next().await.unwrap().event_type(), "session_created");

        manager.shutdown();
        let rest = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("subscription outlived shutdown");
        assert!(rest.is_none());
    }
}
