//! Event Publisher
//!
//! One append-only log per session, mirrored to the store and fanned out to
//! live subscribers through a `tokio::sync::broadcast` channel.
//!
//! # Guarantees
//!
//! - Sequence numbers start at 1 and are strictly increasing per session.
//!   After a restart the log is re-hydrated from the store before the next
//!   publish, so numbers are never reused.
//! - A subscriber asking for events after `N` receives exactly the events
//!   with `seq > N`, in order, then live events, with no gaps or duplicates.
//! - A subscriber that falls behind the broadcast buffer is caught up from
//!   the log instead of being dropped.
//! - `final_report` and `error` close the log; later publishes are rejected.

use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

use crate::db::traits::SessionRepository;
use crate::events::{EventPayload, SessionEvent};
use crate::types::{AppError, Result};

/// Live + replayed events for one subscriber
pub type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

struct SessionLog {
    events: Vec<SessionEvent>,
    next_seq: u64,
    tx: broadcast::Sender<SessionEvent>,
    closed: bool,
}

impl SessionLog {
    fn new(events: Vec<SessionEvent>, buffer: usize) -> Self {
        let next_seq = events.last().map(|e| e.seq + 1).unwrap_or(1);
        let closed = events.last().is_some_and(SessionEvent::is_terminal);
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            events,
            next_seq,
            tx,
            closed,
        }
    }

    fn after(&self, seq: u64) -> Vec<SessionEvent> {
        // seq starts at 1 and is gapless, so position = seq - 1
        let start = (seq as usize).min(self.events.len());
        self.events[start..].to_vec()
    }
}

pub struct EventPublisher {
    repo: Arc<dyn SessionRepository>,
    logs: DashMap<String, Arc<Mutex<SessionLog>>>,
    buffer: usize,
}

impl EventPublisher {
    pub fn new(repo: Arc<dyn SessionRepository>, buffer: usize) -> Self {
        Self {
            repo,
            logs: DashMap::new(),
            buffer,
        }
    }

    /// The in-memory log for a session, hydrated from the store on first use.
    async fn log(&self, session_id: &str) -> Result<Arc<Mutex<SessionLog>>> {
        if let Some(log) = self.logs.get(session_id) {
            return Ok(log.clone());
        }

        let events = self.repo.get_events(session_id, 0).await?;
        if !events.is_empty() {
            debug!(
                session_id = %session_id,
                events = events.len(),
                "hydrated event log from store"
            );
        }
        let log = Arc::new(Mutex::new(SessionLog::new(events, self.buffer)));

        // another caller may have hydrated concurrently; keep the first
        Ok(self
            .logs
            .entry(session_id.to_string())
            .or_insert(log)
            .clone())
    }

    /// Append an event, persist it, then fan it out.
    pub async fn publish(&self, session_id: &str, payload: EventPayload) -> Result<SessionEvent> {
        let log = self.log(session_id).await?;
        let mut log = log.lock().await;

        if log.closed {
            return Err(AppError::InvalidInput(format!(
                "Event stream for session {} is closed",
                session_id
            )));
        }

        let event = SessionEvent {
            seq: log.next_seq,
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            payload,
        };
        self.repo.append_event(&event).await?;

        log.next_seq += 1;
        log.closed = event.is_terminal();
        log.events.push(event.clone());
        // no receivers is fine
        let _ = log.tx.send(event.clone());

        debug!(
            session_id = %session_id,
            seq = event.seq,
            event_type = event.event_type(),
            "published event"
        );
        Ok(event)
    }

    /// Events with `seq > after_seq`, followed by live events until the log closes.
    pub async fn subscribe(&self, session_id: &str, after_seq: u64) -> Result<EventStream> {
        let log = self.log(session_id).await?;
        let (backlog, mut rx, closed) = {
            let guard = log.lock().await;
            (guard.after(after_seq), guard.tx.subscribe(), guard.closed)
        };
        let session_id = session_id.to_string();

        let stream = async_stream::stream! {
            let mut last = after_seq;

            for event in backlog {
                last = event.seq;
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
            if closed {
                return;
            }

            loop {
                let missed = match rx.recv().await {
                    Ok(event) => {
                        if event.seq <= last {
                            continue;
                        }
                        last = event.seq;
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            session_id = %session_id,
                            skipped,
                            "subscriber lagged, catching up from log"
                        );
                        log.lock().await.after(last)
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let remaining = log.lock().await.after(last);
                        for event in remaining {
                            yield event;
                        }
                        return;
                    }
                };

                for event in missed {
                    last = event.seq;
                    let terminal = event.is_terminal();
                    yield event;
                    if terminal {
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Snapshot of every event published so far
    pub async fn events(&self, session_id: &str) -> Result<Vec<SessionEvent>> {
        let log = self.log(session_id).await?;
        let events = log.lock().await.events.clone();
        Ok(events)
    }

    pub async fn is_closed(&self, session_id: &str) -> Result<bool> {
        let log = self.log(session_id).await?;
        let closed = log.lock().await.closed;
        Ok(closed)
    }

    /// Drop the in-memory log; it is re-hydrated from the store on next use.
    pub fn evict(&self, session_id: &str) {
        self.logs.remove(session_id);
    }

    pub fn live_sessions(&self) -> usize {
        self.logs.len()
    }
}
