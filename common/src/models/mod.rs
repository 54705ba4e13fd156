//! Shared data models for the diagnostics service.

pub mod connection;
pub mod diagnostic;
pub mod query;

// Re-export commonly used types
pub use connection::{ConnectionParams, Environment};
pub use diagnostic::{
    DdlTarget, DiagnosticAction, DiagnosticArguments, DiagnosticRequest, ObjectType,
};
pub use query::{ColumnInfo, QueryResult, Record, ScalarValue};
