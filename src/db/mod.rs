//! Session Store
//!
//! Durable record of sessions, their tasks, the per-session event log and the
//! final report. One libsql-backed implementation serves every backend:
//! - **Memory**: ephemeral, for tests and one-shot CLI runs
//! - **SQLite**: local file (default)
//! - **Turso**: remote libsql, behind the `turso` feature

pub mod traits;
pub mod turso;

pub use traits::{DatabaseProvider, SessionRepository};
pub use turso::SessionStore;
