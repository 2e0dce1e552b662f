//! Session repository abstraction
//!
//! The `SessionRepository` trait abstracts over the libsql backends
//! (in-memory SQLite, file-based SQLite, remote Turso).
//!
//! # Example
//!
//! ```rust,ignore
//! use marketscout::db::DatabaseProvider;
//!
//! // In-memory database (tests, one-shot CLI runs)
//! let repo = DatabaseProvider::Memory.create_repository().await?;
//!
//! // File-based SQLite
//! let repo = DatabaseProvider::SQLite { path: "data/marketscout.db".into() }
//!     .create_repository()
//!     .await?;
//! ```

use crate::events::SessionEvent;
use crate::types::{Report, Result, Session, SessionStatus, Task};
use crate::utils::toml_config::DatabaseConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Database provider configuration
#[derive(Debug, Clone, Default)]
pub enum DatabaseProvider {
    /// In-memory SQLite database (ephemeral, lost on restart)
    #[default]
    Memory,
    /// File-based SQLite database
    SQLite {
        /// Path to the SQLite database file
        path: String,
    },
    /// Remote Turso database (requires network access)
    #[cfg(feature = "turso")]
    Turso {
        /// The Turso database URL (e.g., `libsql://your-db.turso.io`)
        url: String,
        /// Authentication token for the Turso database
        auth_token: String,
    },
}

impl DatabaseProvider {
    /// Open the store described by this provider
    pub async fn create_repository(&self) -> Result<Arc<dyn SessionRepository>> {
        match self {
            DatabaseProvider::Memory => Ok(Arc::new(super::turso::SessionStore::new_memory().await?)),
            DatabaseProvider::SQLite { path } => {
                Ok(Arc::new(super::turso::SessionStore::new_local(path).await?))
            }
            #[cfg(feature = "turso")]
            DatabaseProvider::Turso { url, auth_token } => Ok(Arc::new(
                super::turso::SessionStore::new_remote(url.clone(), auth_token.clone()).await?,
            )),
        }
    }

    /// Resolve from the `[database]` section.
    ///
    /// Turso wins when both of its env vars are set (and the `turso` feature is
    /// enabled); `:memory:` or an empty url selects the in-memory store.
    pub fn from_config(config: &DatabaseConfig) -> Self {
        #[cfg(feature = "turso")]
        {
            let url = config
                .turso_url_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok());
            let token = config
                .turso_token_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok());
            if let (Some(url), Some(auth_token)) = (url, token) {
                if !url.is_empty() && !auth_token.is_empty() {
                    return DatabaseProvider::Turso { url, auth_token };
                }
            }
        }

        let path = config.url.trim();
        if path.is_empty() || path == ":memory:" {
            DatabaseProvider::Memory
        } else {
            DatabaseProvider::SQLite {
                path: path.to_string(),
            }
        }
    }
}

/// Durable record of sessions, plans, event logs and reports.
///
/// The store is the single source of truth; the execution controller is its
/// only writer for session and task status.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    // ============== Sessions ==============

    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Set status and failure reason, bumping `updated_at`
    async fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        failure_reason: Option<&str>,
    ) -> Result<()>;

    // ============== Tasks ==============

    /// Insert or update the given tasks
    async fn save_tasks(&self, session_id: &str, tasks: &[Task]) -> Result<()>;

    /// Tasks ordered by index
    async fn get_tasks(&self, session_id: &str) -> Result<Vec<Task>>;

    // ============== Events ==============

    async fn append_event(&self, event: &SessionEvent) -> Result<()>;

    /// Events with `seq > after_seq`, ordered by sequence number
    async fn get_events(&self, session_id: &str, after_seq: u64) -> Result<Vec<SessionEvent>>;

    // ============== Reports ==============

    async fn save_report(&self, session_id: &str, report: &Report) -> Result<()>;

    async fn get_report(&self, session_id: &str) -> Result<Option<Report>>;
}
