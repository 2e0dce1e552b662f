//! External Data Tools
//!
//! Agents never talk to a provider directly. Every call goes through the
//! [`ToolGateway`](crate::tools::gateway::ToolGateway), which adds caching,
//! per-attempt timeouts, bounded retries and cancellation.
//!
//! # Module Structure
//!
//! - [`registry`](crate::tools::registry) - Provider trait, request normalization and lookup
//! - [`gateway`](crate::tools::gateway) - Cache, timeout and retry around every call
//! - [`cache`](crate::tools::cache) - TTL + LRU response cache
//! - [`search`](crate::tools::search) - News search (Tavily, offline mock)
//! - [`finance`](crate::tools::finance) - Market data (Alpha Vantage, offline mock)
//!
//! # Example
//!
//! ```ignore
//! let gateway = ToolGateway::from_config(&config.tools);
//! let response = gateway
//!     .call(&ToolRequest::search("acme latest news"), &cancel)
//!     .await?;
//! println!("cached: {}", response.record.cached);
//! ```

/// TTL + LRU response cache.
pub mod cache;
/// Market data providers.
pub mod finance;
/// Cache, timeout and retry around provider calls.
pub mod gateway;
/// Provider trait and registry.
pub mod registry;
/// News search providers.
pub mod search;

pub use gateway::{RetryPolicy, ToolGateway, ToolResponse};
pub use registry::{ProviderError, ToolProvider, ToolRegistry, ToolRequest};
