//! API request handlers.
//!
//! This module contains all HTTP request handlers organized by functionality.

/// Health and diagnostics handlers.
pub mod health;
/// Session lifecycle and event streaming handlers.
pub mod sessions;
