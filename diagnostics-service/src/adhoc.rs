//! 只读 SQL 执行（execute_query）
//!
//! 调用方的 SQL 先经过只读校验和复杂度评分，再在 `READ ONLY` 事务中逐条执行。
//! 每条语句最多返回 `max_rows` 行，所有语句合计最多 `max_total_rows` 行。

use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use common::errors::{AppError, AppResult};
use common::models::{DiagnosticAction, QueryResult};
use common::utils::{QueryComplexity, SqlValidator};

use crate::catalog;
use crate::report::ReportWriter;
use crate::session::DiagnosticSession;

/// Total execution time above which the report carries a warning.
const SLOW_EXECUTION: Duration = Duration::from_secs(5);

/// Row, statement, complexity and time limits applied to caller-supplied SQL.
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub max_rows: usize,
    pub max_statements: usize,
    pub max_total_rows: usize,
    pub max_complexity: usize,
    pub statement_timeout: Duration,
}

/// A validated statement and its complexity score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    pub sql: String,
    pub complexity: QueryComplexity,
}

/// Splits, validates and scores `sql`. Runs before any connection is opened.
pub fn prepare(sql: &str, limits: &QueryLimits) -> AppResult<Vec<PlannedStatement>> {
    SqlValidator::validate_read_only(sql, limits.max_statements)?
        .into_iter()
        .enumerate()
        .map(|(idx, sql)| {
            let complexity = QueryComplexity::analyze(&sql);
            if complexity.score > limits.max_complexity {
                return Err(AppError::UnsafeSql(format!(
                    "statement {} is too complex (score: {}), maximum allowed is {}",
                    idx + 1,
                    complexity.score,
                    limits.max_complexity
                )));
            }
            Ok(PlannedStatement { sql, complexity })
        })
        .collect()
}

/// Which cap cut a statement's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    StatementRows(usize),
    TotalRows(usize),
}

impl Truncation {
    fn note(&self) -> String {
        match self {
            Truncation::StatementRows(max) => format!("Note: Results truncated to {} rows", max),
            Truncation::TotalRows(max) => {
                format!("Note: Results truncated. Maximum total rows ({}) reached", max)
            }
        }
    }
}

#[derive(Debug)]
pub struct StatementResult {
    pub query: String,
    pub result: QueryResult,
    pub truncation: Option<Truncation>,
}

#[derive(Debug)]
pub struct ExecutionReport {
    statements: Vec<StatementResult>,
    warnings: Vec<String>,
    elapsed: Duration,
    finished_at: DateTime<Utc>,
}

/// Runs validated statements inside one read-only transaction.
pub async fn execute(
    session: &mut dyn DiagnosticSession,
    statements: &[PlannedStatement],
    limits: &QueryLimits,
) -> AppResult<ExecutionReport> {
    let started = Instant::now();

    session.execute("BEGIN READ ONLY").await?;
    session
        .execute(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            limits.statement_timeout.as_millis()
        ))
        .await?;

    let mut results = Vec::with_capacity(statements.len());
    let mut warnings = Vec::new();
    let mut shown = 0;
    for (idx, statement) in statements.iter().enumerate() {
        warnings.extend(
            statement
                .complexity
                .warnings
                .iter()
                .map(|w| format!("Statement {}: {}", idx + 1, w)),
        );

        let page = limits.max_rows.min(limits.max_total_rows.saturating_sub(shown));
        // One extra row tells a full page from a truncated one.
        let bounded = SqlValidator::with_row_limit(&statement.sql, page + 1);
        let mut result = session.execute_single(&bounded).await?;
        let truncation = result.truncate(page).then(|| {
            if page < limits.max_rows {
                Truncation::TotalRows(limits.max_total_rows)
            } else {
                Truncation::StatementRows(limits.max_rows)
            }
        });
        shown += result.row_count;
        tracing::debug!(
            statement = idx + 1,
            rows = result.row_count,
            truncated = truncation.is_some(),
            complexity = statement.complexity.score,
            elapsed_ms = result.execution_time_ms,
            "Statement executed"
        );
        results.push(StatementResult {
            query: statement.sql.clone(),
            result,
            truncation,
        });
    }

    session.execute("COMMIT").await?;

    let elapsed = started.elapsed();
    if elapsed > SLOW_EXECUTION {
        tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, "Slow ad-hoc query");
        warnings.push("Query execution time exceeded 5 seconds. Consider optimization.".to_string());
    }

    Ok(ExecutionReport {
        statements: results,
        warnings,
        elapsed,
        finished_at: Utc::now(),
    })
}

impl ExecutionReport {
    pub fn total_rows(&self) -> usize {
        self.statements.iter().map(|s| s.result.row_count).sum()
    }

    pub fn render(&self) -> String {
        let mut w = ReportWriter::new(catalog::title(DiagnosticAction::ExecuteQuery));

        w.line("Query Execution Summary:");
        w.line(&format!(
            "- Total execution time: {:.2} ms",
            self.elapsed.as_secs_f64() * 1000.0
        ));
        w.line(&format!("- Statements executed: {}", self.statements.len()));
        w.line(&format!("- Total rows returned: {}", self.total_rows()));
        w.line(&format!(
            "- Executed at: {}",
            self.finished_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));

        if !self.warnings.is_empty() {
            w.blank();
            w.line("Warnings:");
            for warning in &self.warnings {
                w.line(&format!("- {}", warning));
            }
        }

        for (idx, statement) in self.statements.iter().enumerate() {
            w.blank();
            w.line(&format!("Statement {}:", idx + 1));
            w.line(&format!("Query: {}", statement.query));
            if let Some(truncation) = &statement.truncation {
                w.line(&truncation.note());
            }
            for line in render_table(&statement.result) {
                w.line(&line);
            }
            w.line(&format!("Rows returned: {}", statement.result.row_count));
        }

        w.finish()
    }
}

/// `col | col` table with a dashed separator; columns padded to their widest cell.
fn render_table(result: &QueryResult) -> Vec<String> {
    if result.columns.is_empty() {
        return Vec::new();
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();

    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            cells
                .iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(column.name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let join = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:<width$}", value, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let header = join(result.columns.iter().map(|c| c.name.as_str()).collect());
    let separator_len = widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1);

    let mut lines = Vec::with_capacity(cells.len() + 2);
    lines.push(header);
    lines.push("-".repeat(separator_len));
    for row in &cells {
        lines.push(join(row.iter().map(String::as_str).collect()));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rows, ScriptedSession, SessionLog};
    use common::models::ScalarValue;

    fn limits() -> QueryLimits {
        QueryLimits {
            max_rows: 2,
            max_statements: 3,
            max_total_rows: 3,
            max_complexity: 15,
            statement_timeout: Duration::from_secs(30),
        }
    }

    fn three_users(sql: &str) -> AppResult<QueryResult> {
        if sql.contains("FROM users") {
            let all = vec![
                vec![ScalarValue::Int(1), ScalarValue::Text("alice".into())],
                vec![ScalarValue::Int(2), ScalarValue::Text("bob".into())],
                vec![ScalarValue::Int(3), ScalarValue::Null],
            ];
            // Honour the outer LIMIT the way the server would.
            let limit = sql
                .rsplit("LIMIT ")
                .next()
                .and_then(|n| n.trim().parse::<usize>().ok())
                .unwrap_or(all.len());
            Ok(rows(
                &[("id", "INT4"), ("name", "TEXT")],
                all.into_iter().take(limit).collect(),
            ))
        } else {
            Ok(QueryResult::empty())
        }
    }

    #[test]
    fn test_prepare_rejects_writes_and_excess_statements() {
        let err = prepare("UPDATE users SET name = 'x'", &limits()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query validation failed: statement 1: prohibited operation 'update'"
        );
        assert!(prepare("SELECT 1; SELECT 2; SELECT 3; SELECT 4", &limits()).is_err());
        assert_eq!(prepare("SELECT 1; SHOW work_mem", &limits()).unwrap().len(), 2);
    }

    #[test]
    fn test_prepare_rejects_complex_statements() {
        // 4 joins (8) + 3 subqueries (9) + 2 conditions (2)
        let sql = "SELECT * FROM a JOIN b USING (id) JOIN c USING (id) JOIN d USING (id) \
                   JOIN e USING (id) WHERE a.x IN (SELECT 1) AND a.y IN (SELECT 2) \
                   AND a.z IN (SELECT 3)";
        let err = prepare(&format!("SELECT 1; {}", sql), &limits()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query validation failed: statement 2 is too complex (score: 19), maximum allowed is 15"
        );

        let relaxed = QueryLimits {
            max_complexity: 19,
            ..limits()
        };
        let planned = prepare(sql, &relaxed).unwrap();
        assert_eq!(planned[0].complexity.score, 19);
    }

    #[tokio::test]
    async fn test_execute_limits_rows_and_renders_table() {
        let log = SessionLog::default();
        let mut session = ScriptedSession::new(log.clone(), three_users);

        let statements = prepare("SELECT id, name FROM users", &limits()).unwrap();
        let report = execute(&mut session, &statements, &limits()).await.unwrap();

        assert_eq!(
            log.executed(),
            vec![
                "BEGIN READ ONLY".to_string(),
                "SET LOCAL statement_timeout = '30000ms'".to_string(),
                "SELECT * FROM (\nSELECT id, name FROM users\n) AS q LIMIT 3".to_string(),
                "COMMIT".to_string(),
            ]
        );
        assert_eq!(report.total_rows(), 2);

        let rendered = report.render();
        assert!(rendered.starts_with("Query Execution Report\n\nQuery Execution Summary:\n"));
        assert!(rendered.contains("- Statements executed: 1\n- Total rows returned: 2\n"));
        assert!(!rendered.contains("Warnings:"));
        assert!(rendered.contains(
            "Statement 1:\nQuery: SELECT id, name FROM users\nNote: Results truncated to 2 rows\nid | name\n----------\n1  | alice\n2  | bob\nRows returned: 2\n"
        ));
    }

    #[tokio::test]
    async fn test_total_row_cap_spans_statements() {
        let log = SessionLog::default();
        let mut session = ScriptedSession::new(log.clone(), three_users);

        let statements = prepare(
            "SELECT id, name FROM users; SELECT id, name FROM users ORDER BY id; SELECT id, name FROM users",
            &limits(),
        )
        .unwrap();
        let report = execute(&mut session, &statements, &limits()).await.unwrap();

        let executed = log.executed();
        assert!(executed[2].ends_with("LIMIT 3"));
        assert!(executed[3].ends_with("LIMIT 2"));
        assert!(executed[4].ends_with("LIMIT 1"));
        assert_eq!(report.total_rows(), 3);
        assert_eq!(
            report.statements[1].truncation,
            Some(Truncation::TotalRows(3))
        );
        assert_eq!(report.statements[2].result.row_count, 0);

        let rendered = report.render();
        assert!(rendered.contains(
            "Statement 2:\nQuery: SELECT id, name FROM users ORDER BY id\nNote: Results truncated. Maximum total rows (3) reached\nid | name\n----------\n1  | alice\nRows returned: 1\n"
        ));
    }

    #[tokio::test]
    async fn test_complexity_warnings_are_reported() {
        let log = SessionLog::default();
        let mut session = ScriptedSession::new(log, |_| Ok(QueryResult::empty()));

        let statements = prepare(
            "SELECT 1; SELECT rank() OVER (ORDER BY id) FROM users",
            &limits(),
        )
        .unwrap();
        let report = execute(&mut session, &statements, &limits()).await.unwrap();

        assert!(report.render().contains(
            "\nWarnings:\n- Statement 2: Query uses window functions - monitor performance\n"
        ));
    }

    #[tokio::test]
    async fn test_execute_propagates_statement_failure() {
        let log = SessionLog::default();
        let mut session = ScriptedSession::new(log.clone(), |sql| {
            if sql.starts_with("SELECT") {
                Err(AppError::DatabaseQuery("relation \"missing\" does not exist".into()))
            } else {
                Ok(QueryResult::empty())
            }
        });
        let statements = prepare("SELECT * FROM missing", &limits()).unwrap();
        let err = execute(&mut session, &statements, &limits()).await.unwrap_err();
        assert_eq!(err.kind(), "query");
        assert!(!log.executed().contains(&"COMMIT".to_string()));
    }

    #[test]
    fn test_statement_without_rows_has_no_table() {
        assert!(render_table(&QueryResult::empty()).is_empty());
    }
}
