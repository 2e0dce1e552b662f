//! # MarketScout
//!
//! A multi-agent market research server. One natural-language prompt becomes a
//! supervised run of worker agents (news research, financial analysis, memo
//! writing, optionally a coordinating manager) that ends in a cited business
//! memo. Every step is streamed to callers as an ordered, replayable event log.
//!
//! ## Overview
//!
//! MarketScout can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `marketscout-server` binary
//! 2. **As a library** - Drive sessions from your own Rust project
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use marketscout::{ConfigManager, DatabaseProvider, SessionManager, Strategy, ToolGateway};
//! use std::sync::Arc;
//!
//! let config = Arc::new(ConfigManager::new("marketscout.toml")?);
//! let repo = DatabaseProvider::Memory.create_repository().await?;
//! let gateway = Arc::new(ToolGateway::from_config(&config.config().tools));
//! let sessions = SessionManager::new(repo, gateway, config);
//!
//! let session = sessions
//!     .create("Generate a market report about Competitor X", Strategy::Sequential)
//!     .await?;
//! let report = sessions.run(&session.id).await?.await??;
//! println!("{}", report.markdown);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `local-db` | Local SQLite database (default) |
//! | `turso` | Remote Turso database |
//! | `swagger-ui` | Interactive API docs at `/swagger-ui/` |
//!
//! ## Modules
//!
//! - [`agents`] - Worker agents and the Manager
//! - [`api`] - REST and SSE handlers and routes
//! - [`db`] - Session store (SQLite, Turso)
//! - [`events`] - Ordered per-session event log with live fan-out
//! - [`sessions`] - Live session registry
//! - [`tools`] - Tool gateway and provider backends
//! - [`workflows`] - Task planner and execution controller
//! - [`types`] - Common types and error handling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Worker agents and the coordinating Manager.
pub mod agents;
/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface.
pub mod cli;
/// Session store (Turso/SQLite).
pub mod db;
/// Session event log and subscriptions.
pub mod events;
/// Live session registry.
pub mod sessions;
/// Tool gateway, cache and provider backends.
pub mod tools;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;
/// Task planning and execution.
pub mod workflows;

// Re-export commonly used types
pub use agents::{Agent, AgentRegistry};
pub use db::{DatabaseProvider, SessionRepository, SessionStore};
pub use events::{EventPayload, EventPublisher, SessionEvent};
pub use sessions::SessionManager;
pub use tools::{ToolGateway, ToolRegistry};
pub use types::{AppError, Result, Strategy};
pub use utils::toml_config::{ConfigManager, MarketScoutConfig};
pub use workflows::{ExecutionController, TaskPlanner};

use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML configuration with hot-reload support
    pub config_manager: Arc<ConfigManager>,
    /// Live session registry
    pub sessions: Arc<SessionManager>,
}
