use crate::db::traits::SessionRepository;
use crate::events::{EventPayload, SessionEvent};
use crate::types::{AgentKind, AppError, Report, Result, Session, SessionStatus, Source, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database};
use tokio::sync::Mutex;

/// libsql-backed session store.
///
/// A single connection is shared behind a mutex: an in-memory database only
/// exists for the connection that created it, and writes are serialized.
pub struct SessionStore {
    _db: Database,
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl Fn(libsql::Error) -> AppError + '_ {
    move |e| AppError::Database(format!("{}: {}", context, e))
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::Database(format!("Invalid timestamp: {}", ms)))
}

impl SessionStore {
    pub async fn new_memory() -> Result<Self> {
        Self::new_local(":memory:").await
    }

    pub async fn new_local(path: &str) -> Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::Database(format!("Failed to create database directory: {}", e))
                    })?;
                }
            }
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(db_err("Failed to open database"))?;
        Self::from_database(db).await
    }

    #[cfg(feature = "turso")]
    pub async fn new_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(db_err("Failed to connect to Turso"))?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db.connect().map_err(db_err("Failed to get connection"))?;
        let store = Self {
            _db: db,
            conn: Mutex::new(conn),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                prompt TEXT NOT NULL,
                strategy TEXT NOT NULL,
                status TEXT NOT NULL,
                failure_reason TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create sessions table"))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                session_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                agent TEXT NOT NULL,
                title TEXT NOT NULL,
                depends_on TEXT NOT NULL,
                essential INTEGER NOT NULL,
                status TEXT NOT NULL,
                reason TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (session_id, idx),
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create tasks table"))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (session_id, seq),
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create events table"))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reports (
                session_id TEXT PRIMARY KEY,
                markdown TEXT NOT NULL,
                sources_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )",
            (),
        )
        .await
        .map_err(db_err("Failed to create reports table"))?;

        Ok(())
    }
}

#[async_trait]
impl SessionRepository for SessionStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO sessions (id, prompt, strategy, status, failure_reason, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                session.id.as_str(),
                session.prompt.as_str(),
                session.strategy.as_str(),
                session.status.as_str(),
                session.failure_reason.clone(),
                millis(session.created_at),
                millis(session.updated_at),
            ],
        )
        .await
        .map_err(db_err("Failed to create session"))?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(
                "SELECT id, prompt, strategy, status, failure_reason, created_at, updated_at
                 FROM sessions WHERE id = ?",
                [id],
            )
            .await
            .map_err(db_err("Failed to query session"))?;

        let Some(row) = rows.next().await.map_err(db_err("Failed to read session"))? else {
            return Ok(None);
        };

        let strategy: String = row.get(2).map_err(db_err("strategy"))?;
        let status: String = row.get(3).map_err(db_err("status"))?;
        Ok(Some(Session {
            id: row.get(0).map_err(db_err("id"))?,
            prompt: row.get(1).map_err(db_err("prompt"))?,
            strategy: strategy
                .parse()
                .map_err(|e: AppError| AppError::Database(e.to_string()))?,
            status: status.parse()?,
            failure_reason: row.get(4).map_err(db_err("failure_reason"))?,
            created_at: from_millis(row.get(5).map_err(db_err("created_at"))?)?,
            updated_at: from_millis(row.get(6).map_err(db_err("updated_at"))?)?,
        }))
    }

    async fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;

        let updated = conn
            .execute(
                "UPDATE sessions SET status = ?, failure_reason = ?, updated_at = ? WHERE id = ?",
                libsql::params![
                    status.as_str(),
                    failure_reason.map(str::to_string),
                    millis(Utc::now()),
                    id,
                ],
            )
            .await
            .map_err(db_err("Failed to update session"))?;

        if updated == 0 {
            return Err(AppError::NotFound(format!("Session {} not found", id)));
        }
        Ok(())
    }

    async fn save_tasks(&self, session_id: &str, tasks: &[Task]) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = millis(Utc::now());

        for task in tasks {
            let depends_on = serde_json::to_string(&task.depends_on)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            conn.execute(
                "INSERT INTO tasks (session_id, idx, agent, title, depends_on, essential, status, reason, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(session_id, idx) DO UPDATE SET
                    agent = excluded.agent,
                    title = excluded.title,
                    depends_on = excluded.depends_on,
                    essential = excluded.essential,
                    status = excluded.status,
                    reason = excluded.reason,
                    updated_at = excluded.updated_at",
                libsql::params![
                    session_id,
                    task.index as i64,
                    task.agent.name(),
                    task.title.as_str(),
                    depends_on,
                    task.essential as i64,
                    task.status.as_str(),
                    task.reason.clone(),
                    now,
                ],
            )
            .await
            .map_err(db_err("Failed to save task"))?;
        }

        Ok(())
    }

    async fn get_tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(
                "SELECT idx, agent, title, depends_on, essential, status, reason
                 FROM tasks WHERE session_id = ? ORDER BY idx ASC",
                [session_id],
            )
            .await
            .map_err(db_err("Failed to query tasks"))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err("Failed to read task"))? {
            let index: i64 = row.get(0).map_err(db_err("idx"))?;
            let agent: String = row.get(1).map_err(db_err("agent"))?;
            let depends_on: String = row.get(3).map_err(db_err("depends_on"))?;
            let essential: i64 = row.get(4).map_err(db_err("essential"))?;
            let status: String = row.get(5).map_err(db_err("status"))?;

            tasks.push(Task {
                index: index as usize,
                agent: AgentKind::from_name(&agent)
                    .ok_or_else(|| AppError::Database(format!("Unknown agent: {}", agent)))?,
                title: row.get(2).map_err(db_err("title"))?,
                depends_on: serde_json::from_str(&depends_on)
                    .map_err(|e| AppError::Database(format!("Invalid depends_on: {}", e)))?,
                essential: essential != 0,
                status: status.parse()?,
                reason: row.get(6).map_err(db_err("reason"))?,
            });
        }

        Ok(tasks)
    }

    async fn append_event(&self, event: &SessionEvent) -> Result<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        conn.execute(
            "INSERT INTO events (session_id, seq, type, payload_json, created_at)
             VALUES (?, ?, ?, ?, ?)",
            libsql::params![
                event.session_id.as_str(),
                event.seq as i64,
                event.event_type(),
                payload,
                millis(event.timestamp),
            ],
        )
        .await
        .map_err(db_err("Failed to append event"))?;

        Ok(())
    }

    async fn get_events(&self, session_id: &str, after_seq: u64) -> Result<Vec<SessionEvent>> {
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(
                "SELECT seq, payload_json, created_at FROM events
                 WHERE session_id = ? AND seq > ? ORDER BY seq ASC",
                libsql::params![session_id, after_seq as i64],
            )
            .await
            .map_err(db_err("Failed to query events"))?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err("Failed to read event"))? {
            let seq: i64 = row.get(0).map_err(db_err("seq"))?;
            let payload: String = row.get(1).map_err(db_err("payload_json"))?;
            let payload: EventPayload = serde_json::from_str(&payload)
                .map_err(|e| AppError::Database(format!("Invalid event payload: {}", e)))?;

            events.push(SessionEvent {
                seq: seq as u64,
                session_id: session_id.to_string(),
                timestamp: from_millis(row.get(2).map_err(db_err("created_at"))?)?,
                payload,
            });
        }

        Ok(events)
    }

    async fn save_report(&self, session_id: &str, report: &Report) -> Result<()> {
        let conn = self.conn.lock().await;
        let sources = serde_json::to_string(&report.sources)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        conn.execute(
            "INSERT INTO reports (session_id, markdown, sources_json, created_at)
             VALUES (?, ?, ?, ?)",
            libsql::params![
                session_id,
                report.markdown.as_str(),
                sources,
                millis(Utc::now()),
            ],
        )
        .await
        .map_err(db_err("Failed to save report"))?;

        Ok(())
    }

    async fn get_report(&self, session_id: &str) -> Result<Option<Report>> {
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(
                "SELECT markdown, sources_json FROM reports WHERE session_id = ?",
                [session_id],
            )
            .await
            .map_err(db_err("Failed to query report"))?;

        let Some(row) = rows.next().await.map_err(db_err("Failed to read report"))? else {
            return Ok(None);
        };

        let sources: String = row.get(1).map_err(db_err("sources_json"))?;
        let sources: Vec<Source> = serde_json::from_str(&sources)
            .map_err(|e| AppError::Database(format!("Invalid report sources: {}", e)))?;
        Ok(Some(Report {
            markdown: row.get(0).map_err(db_err("markdown"))?,
            sources,
        }))
    }
}
