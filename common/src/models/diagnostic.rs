//! Diagnostic request models.
//!
//! Parses invocation events into a validated [`DiagnosticRequest`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::Validate;

use super::connection::Environment;
use crate::errors::{AppError, AppResult};

const MISSING_PARAMETERS: &str =
    "Missing required parameters. Need 'environment' and 'action_type'.";

/// The closed set of diagnostic actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticAction {
    SlowQuery,
    ConnectionManagementIssues,
    IndexAnalysis,
    AutovacuumAnalysis,
    IoAnalysis,
    ReplicationAnalysis,
    SystemHealth,
    VacuumProgress,
    XidAnalysis,
    BloatAnalysis,
    LongRunningTransactions,
    PerformanceInsightsAnalysis,
    ExecuteQuery,
    ExplainQuery,
    ExtractDdl,
}

impl DiagnosticAction {
    /// Every action, in the order they are advertised.
    pub const ALL: [DiagnosticAction; 15] = [
        DiagnosticAction::SlowQuery,
        DiagnosticAction::ConnectionManagementIssues,
        DiagnosticAction::IndexAnalysis,
        DiagnosticAction::AutovacuumAnalysis,
        DiagnosticAction::IoAnalysis,
        DiagnosticAction::ReplicationAnalysis,
        DiagnosticAction::SystemHealth,
        DiagnosticAction::VacuumProgress,
        DiagnosticAction::XidAnalysis,
        DiagnosticAction::BloatAnalysis,
        DiagnosticAction::LongRunningTransactions,
        DiagnosticAction::PerformanceInsightsAnalysis,
        DiagnosticAction::ExecuteQuery,
        DiagnosticAction::ExplainQuery,
        DiagnosticAction::ExtractDdl,
    ];

    /// Wire name used in `action_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticAction::SlowQuery => "slow_query",
            DiagnosticAction::ConnectionManagementIssues => "connection_management_issues",
            DiagnosticAction::IndexAnalysis => "index_analysis",
            DiagnosticAction::AutovacuumAnalysis => "autovacuum_analysis",
            DiagnosticAction::IoAnalysis => "io_analysis",
            DiagnosticAction::ReplicationAnalysis => "replication_analysis",
            DiagnosticAction::SystemHealth => "system_health",
            DiagnosticAction::VacuumProgress => "vacuum_progress",
            DiagnosticAction::XidAnalysis => "xid_analysis",
            DiagnosticAction::BloatAnalysis => "bloat_analysis",
            DiagnosticAction::LongRunningTransactions => "long_running_transactions",
            DiagnosticAction::PerformanceInsightsAnalysis => "performance_insights_analysis",
            DiagnosticAction::ExecuteQuery => "execute_query",
            DiagnosticAction::ExplainQuery => "explain_query",
            DiagnosticAction::ExtractDdl => "extract_ddl",
        }
    }

    /// Tool description advertised to the agent gateway.
    pub fn description(&self) -> &'static str {
        match self {
            DiagnosticAction::SlowQuery => {
                "Identifies and analyzes the slowest queries in your database using pg_stat_statements."
            }
            DiagnosticAction::ConnectionManagementIssues => {
                "Detects and analyzes database connection issues such as idle connections, connection leaks, and lock waits."
            }
            DiagnosticAction::IndexAnalysis => {
                "Evaluates database index usage, identifies missing or unused indexes, and provides optimization recommendations."
            }
            DiagnosticAction::AutovacuumAnalysis => {
                "Examines autovacuum progress, dead tuple accumulation, vacuum blockers and wraparound risk."
            }
            DiagnosticAction::IoAnalysis => {
                "Analyzes database I/O patterns, buffer usage, and checkpoint activity to identify performance bottlenecks."
            }
            DiagnosticAction::ReplicationAnalysis => {
                "Monitors replication status, lag, and replication slot health."
            }
            DiagnosticAction::SystemHealth => {
                "Provides a health check of the database including cache hit ratios, deadlocks, lock contention, and long-running transactions."
            }
            DiagnosticAction::VacuumProgress => {
                "Monitors current vacuum operations including phase, duration, and completion percentage."
            }
            DiagnosticAction::XidAnalysis => {
                "Analyzes transaction ID (XID) wraparound status and the tables with the oldest frozen XIDs."
            }
            DiagnosticAction::BloatAnalysis => {
                "Identifies tables with significant bloat and estimates wasted space."
            }
            DiagnosticAction::LongRunningTransactions => {
                "Identifies transactions running for more than an hour that may block vacuum or cause contention."
            }
            DiagnosticAction::PerformanceInsightsAnalysis => {
                "Summarizes database load: top queries by share of total execution time, wait events and session states."
            }
            DiagnosticAction::ExecuteQuery => {
                "Executes a read-only SQL query safely and returns the results with execution metrics."
            }
            DiagnosticAction::ExplainQuery => {
                "Analyzes and explains the execution plan for a SQL query and suggests optimizations."
            }
            DiagnosticAction::ExtractDdl => {
                "Extracts the DDL definition and description of a table, view, function, procedure, trigger, sequence or index."
            }
        }
    }

    /// Whether the action needs the caller's `query` argument.
    pub fn requires_query(&self) -> bool {
        matches!(
            self,
            DiagnosticAction::ExecuteQuery | DiagnosticAction::ExplainQuery
        )
    }

    /// Whether the action needs `object_type`, `object_name` and `object_schema`.
    pub fn requires_object(&self) -> bool {
        matches!(self, DiagnosticAction::ExtractDdl)
    }

    /// Whether `pg_stat_statements` must be installed before the action runs.
    pub fn requires_extension(&self) -> bool {
        matches!(
            self,
            DiagnosticAction::SlowQuery
                | DiagnosticAction::ConnectionManagementIssues
                | DiagnosticAction::IndexAnalysis
                | DiagnosticAction::AutovacuumAnalysis
                | DiagnosticAction::IoAnalysis
                | DiagnosticAction::ReplicationAnalysis
                | DiagnosticAction::SystemHealth
                | DiagnosticAction::PerformanceInsightsAnalysis
        )
    }

    /// Comma separated list of every wire name.
    pub fn available() -> String {
        DiagnosticAction::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for DiagnosticAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiagnosticAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiagnosticAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Unknown action_type '{}'. Available actions: {}",
                    s,
                    DiagnosticAction::available()
                ))
            })
    }
}

/// Database object kinds `extract_ddl` can describe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    View,
    Function,
    Procedure,
    Trigger,
    Sequence,
    Index,
}

impl ObjectType {
    pub const ALL: [ObjectType; 7] = [
        ObjectType::Table,
        ObjectType::View,
        ObjectType::Function,
        ObjectType::Procedure,
        ObjectType::Trigger,
        ObjectType::Sequence,
        ObjectType::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::View => "view",
            ObjectType::Function => "function",
            ObjectType::Procedure => "procedure",
            ObjectType::Trigger => "trigger",
            ObjectType::Sequence => "sequence",
            ObjectType::Index => "index",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = AppError;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = ObjectType::ALL.iter().map(|t| t.as_str()).collect();
                AppError::Validation(format!(
                    "Invalid object_type: {}. Valid types are: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// The object an `extract_ddl` request looks up.
///
/// `name` is matched case-insensitively and may carry `%` / `_` wildcards;
/// `schema` must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlTarget {
    pub object_type: ObjectType,
    pub name: String,
    pub schema: String,
}

impl DdlTarget {
    fn from_arguments(
        object_type: Option<String>,
        name: Option<String>,
        schema: Option<String>,
    ) -> AppResult<Self> {
        let object_type = object_type
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Missing required parameter 'object_type' for action_type '{}'.",
                    DiagnosticAction::ExtractDdl
                ))
            })?
            .parse()?;

        let non_empty = |v: Option<String>| {
            v.map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let (Some(name), Some(schema)) = (non_empty(name), non_empty(schema)) else {
            return Err(AppError::Validation(
                "Both object_name and object_schema are required".to_string(),
            ));
        };

        Ok(Self {
            object_type,
            name,
            schema,
        })
    }
}

/// Raw invocation arguments, before any name is resolved.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct DiagnosticArguments {
    /// Target environment (`dev` or `prod`).
    #[validate(required, length(min = 1))]
    pub environment: Option<String>,

    /// Diagnostic action to run.
    #[validate(required, length(min = 1))]
    pub action_type: Option<String>,

    /// SQL text for `execute_query` and `explain_query`.
    #[serde(default)]
    pub query: Option<String>,

    /// Object kind for `extract_ddl`.
    #[serde(default)]
    pub object_type: Option<String>,

    /// Object name pattern for `extract_ddl`.
    #[serde(default)]
    pub object_name: Option<String>,

    /// Schema of the object for `extract_ddl`.
    #[serde(default)]
    pub object_schema: Option<String>,
}

impl DiagnosticArguments {
    /// Reads arguments from a flat event or from its nested `arguments` object.
    pub fn from_event(event: &Value) -> AppResult<Self> {
        let source = match event.get("arguments") {
            Some(nested) if nested.is_object() => nested,
            _ => event,
        };
        serde_json::from_value(source.clone())
            .map_err(|_| AppError::Validation(MISSING_PARAMETERS.to_string()))
    }
}

/// A validated diagnostic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRequest {
    pub environment: Environment,
    pub action: DiagnosticAction,
    pub query: Option<String>,
    pub object: Option<DdlTarget>,
}

impl DiagnosticRequest {
    /// Parses and validates an invocation event.
    ///
    /// Fails before any I/O when a parameter is missing or unknown.
    pub fn from_event(event: &Value) -> AppResult<Self> {
        Self::try_from(DiagnosticArguments::from_event(event)?)
    }
}

impl TryFrom<DiagnosticArguments> for DiagnosticRequest {
    type Error = AppError;

    fn try_from(args: DiagnosticArguments) -> Result<Self, Self::Error> {
        args.validate()
            .map_err(|_| AppError::Validation(MISSING_PARAMETERS.to_string()))?;

        let (Some(environment), Some(action_type)) = (args.environment, args.action_type) else {
            return Err(AppError::Validation(MISSING_PARAMETERS.to_string()));
        };

        let action: DiagnosticAction = action_type.parse()?;
        let environment: Environment = environment.parse()?;

        let query = args.query.filter(|q| !q.trim().is_empty());
        if action.requires_query() && query.is_none() {
            return Err(AppError::Validation(format!(
                "Missing required parameter 'query' for action_type '{}'.",
                action
            )));
        }

        let object = if action.requires_object() {
            Some(DdlTarget::from_arguments(
                args.object_type,
                args.object_name,
                args.object_schema,
            )?)
        } else {
            None
        };

        Ok(Self {
            environment,
            action,
            query: if action.requires_query() { query } else { None },
            object,
        })
    }
}
