//! Shared building blocks for the PostgreSQL diagnostics service.
//!
//! - `config`: environment-driven service configuration
//! - `errors`: the error taxonomy every layer reports through
//! - `middleware`: invocation id tagging for tracing
//! - `models`: request, connection and query result types
//! - `response`: the gateway `functionResponse` envelope and API wrappers
//! - `utils`: SQL validation and value formatting helpers

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
