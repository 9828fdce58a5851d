//! HTTP middleware components.

/// Staff API key authentication middleware
pub mod auth;
