//! 诊断查询目录
//!
//! 每个目录动作对应一组有序的只读 SQL，每条 SQL 自带报告段落布局。
//! 段落顺序即查询顺序。

mod maintenance;
mod performance;

use std::time::{Duration, Instant};

use common::errors::AppResult;
use common::models::{DiagnosticAction, Record};

use crate::report::{DiagnosticReport, QueryOutcome};
use crate::session::DiagnosticSession;

/// Installs `pg_stat_statements` before the statistics-based actions.
pub const SETUP_EXTENSION: &str = "CREATE EXTENSION IF NOT EXISTS pg_stat_statements";

/// All queries of one action share this snapshot.
pub const BEGIN_SNAPSHOT: &str = "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY";

const SAVEPOINT: &str = "SAVEPOINT diagnostic_query";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT diagnostic_query";
const ROLLBACK_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT diagnostic_query";

/// A named diagnostic statement and the report section it feeds.
pub struct DiagnosticQuery {
    pub name: &'static str,
    pub sql: &'static str,
    pub section: Section,
}

/// Report section layout.
pub struct Section {
    pub header: &'static str,
    pub layout: Layout,
    /// Printed instead of the body when the query returned nothing or failed.
    pub empty: &'static str,
    pub recommendation: Option<&'static str>,
}

pub enum Layout {
    /// One `<label> #n:` block per row.
    Items {
        label: &'static str,
        fields: &'static [Field],
        checks: &'static [Check],
    },
    /// One `<label>: <column value>` heading per row.
    Keyed {
        label: &'static str,
        column: &'static str,
        fields: &'static [Field],
        checks: &'static [Check],
    },
    /// First row only, as plain field lines.
    Single {
        fields: &'static [Field],
        checks: &'static [Check],
    },
    /// `• <keys joined by '.'>: <value>` per row.
    Listing {
        keys: &'static [&'static str],
        value: &'static str,
    },
    /// Rows grouped by `column` in first-seen order, numbered per group.
    Grouped {
        group_label: &'static str,
        column: &'static str,
        label: &'static str,
        fields: &'static [Field],
        checks: &'static [Check],
    },
}

/// One `• <label>: <value>` line.
pub struct Field {
    pub label: &'static str,
    pub render: Render,
}

/// How a field value is produced from a row.
pub enum Render {
    Column(&'static str),
    /// Value followed by a unit, e.g. ` ms`.
    Suffixed(&'static str, &'static str),
    /// Numeric value with two decimals followed by a unit.
    Fixed(&'static str, &'static str),
    /// `Never` when NULL.
    OrNever(&'static str),
    /// Raw byte count plus a human-readable size.
    Bytes(&'static str),
    /// `hits / (hits + reads)` as a percentage; `0.00%` when nothing was read.
    HitRatio {
        hits: &'static [&'static str],
        reads: &'static [&'static str],
    },
    /// `value (pct%)`.
    WithPercent(&'static str, &'static str),
    Joined(&'static [&'static str], &'static str),
    Truncated(&'static str, usize),
}

/// A threshold rule; `message` becomes a warning line when `when` holds.
pub struct Check {
    pub message: &'static str,
    pub when: fn(&Record<'_>) -> bool,
}

pub(crate) const fn col(label: &'static str, column: &'static str) -> Field {
    Field {
        label,
        render: Render::Column(column),
    }
}

pub(crate) const fn field(label: &'static str, render: Render) -> Field {
    Field { label, render }
}

pub(crate) const fn check(message: &'static str, when: fn(&Record<'_>) -> bool) -> Check {
    Check { message, when }
}

/// Numeric column value; NULL and non-numeric read as zero.
pub(crate) fn num(record: &Record<'_>, column: &str) -> f64 {
    record.f64(column).unwrap_or(0.0)
}

/// Whether the hit ratio over the given columns is below `threshold` percent.
/// Sections that never read a block do not warn.
pub(crate) fn hit_ratio_below(record: &Record<'_>, hits: &[&str], reads: &[&str], threshold: f64) -> bool {
    let hit: f64 = hits.iter().map(|c| num(record, c)).sum();
    let read: f64 = reads.iter().map(|c| num(record, c)).sum();
    hit + read > 0.0 && hit / (hit + read) * 100.0 < threshold
}

/// Report title for a catalog action.
pub fn title(action: DiagnosticAction) -> &'static str {
    match action {
        DiagnosticAction::SlowQuery => "Database Performance Analysis Report",
        DiagnosticAction::ConnectionManagementIssues => {
            "Database Connection Management Analysis Report"
        }
        DiagnosticAction::IndexAnalysis => "Database Index Analysis Report",
        DiagnosticAction::AutovacuumAnalysis => "Database Autovacuum Analysis Report",
        DiagnosticAction::IoAnalysis => "Database I/O Analysis Report",
        DiagnosticAction::ReplicationAnalysis => "Database Replication Analysis Report",
        DiagnosticAction::SystemHealth => "Database System Health Report",
        DiagnosticAction::VacuumProgress => "Database Vacuum Progress Report",
        DiagnosticAction::XidAnalysis => "Database XID Wraparound Analysis Report",
        DiagnosticAction::BloatAnalysis => "Database Bloat Analysis Report",
        DiagnosticAction::LongRunningTransactions => "Database Long-Running Transactions Report",
        DiagnosticAction::PerformanceInsightsAnalysis => "Database Performance Insights Report",
        DiagnosticAction::ExecuteQuery => "Query Execution Report",
        DiagnosticAction::ExplainQuery => "Query Plan Analysis Report",
        DiagnosticAction::ExtractDdl => "Database Object DDL Report",
    }
}

/// Ordered query set of a catalog action; `None` for the free-text and DDL actions.
pub fn queries(action: DiagnosticAction) -> Option<&'static [DiagnosticQuery]> {
    let set: &'static [DiagnosticQuery] = match action {
        DiagnosticAction::SlowQuery => performance::SLOW_QUERY,
        DiagnosticAction::ConnectionManagementIssues => performance::CONNECTION_MANAGEMENT,
        DiagnosticAction::IndexAnalysis => performance::INDEX_ANALYSIS,
        DiagnosticAction::IoAnalysis => performance::IO_ANALYSIS,
        DiagnosticAction::SystemHealth => performance::SYSTEM_HEALTH,
        DiagnosticAction::PerformanceInsightsAnalysis => performance::PERFORMANCE_INSIGHTS,
        DiagnosticAction::AutovacuumAnalysis => maintenance::AUTOVACUUM_ANALYSIS,
        DiagnosticAction::ReplicationAnalysis => maintenance::REPLICATION_ANALYSIS,
        DiagnosticAction::VacuumProgress => maintenance::VACUUM_PROGRESS,
        DiagnosticAction::XidAnalysis => maintenance::XID_ANALYSIS,
        DiagnosticAction::BloatAnalysis => maintenance::BLOAT_ANALYSIS,
        DiagnosticAction::LongRunningTransactions => maintenance::LONG_RUNNING_TRANSACTIONS,
        DiagnosticAction::ExecuteQuery
        | DiagnosticAction::ExplainQuery
        | DiagnosticAction::ExtractDdl => return None,
    };
    Some(set)
}

/// Runs a catalog action's query set on `session`.
///
/// The setup statement and transaction control abort the action on failure;
/// an individual query failure is recorded and the next query still runs.
pub async fn collect(
    session: &mut dyn DiagnosticSession,
    action: DiagnosticAction,
    set: &'static [DiagnosticQuery],
    statement_timeout: Duration,
) -> AppResult<DiagnosticReport> {
    if action.requires_extension() {
        session.execute(SETUP_EXTENSION).await?;
    }

    session.execute(BEGIN_SNAPSHOT).await?;
    session
        .execute(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            statement_timeout.as_millis()
        ))
        .await?;

    let mut report = DiagnosticReport::new(action);
    for query in set {
        session.execute(SAVEPOINT).await?;
        let started = Instant::now();
        match session.execute(query.sql).await {
            Ok(result) => {
                session.execute(RELEASE_SAVEPOINT).await?;
                tracing::debug!(
                    query = query.name,
                    rows = result.row_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Diagnostic query completed"
                );
                report.push(query, QueryOutcome::Rows(result));
            }
            Err(e) => {
                tracing::warn!(query = query.name, error = %e, "Diagnostic query failed");
                session.execute(ROLLBACK_SAVEPOINT).await?;
                report.push(query, QueryOutcome::Failed(e.to_string()));
            }
        }
    }

    session.execute("COMMIT").await?;
    Ok(report)
}
