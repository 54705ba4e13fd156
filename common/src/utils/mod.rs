//! Utility functions and helpers.

pub mod complexity;
pub mod format;
pub mod sql_validator;

// Re-export commonly used types
pub use complexity::QueryComplexity;
pub use format::{format_bytes, percentage, truncate_chars};
pub use sql_validator::SqlValidator;
