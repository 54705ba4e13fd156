//! 诊断报告渲染
//!
//! 纯函数：相同的查询结果总是得到逐字节相同的文本。

use common::models::{DiagnosticAction, QueryResult, Record};
use common::utils::{format_bytes, percentage, truncate_chars};

use crate::catalog::{self, Check, DiagnosticQuery, Field, Layout, Render};

/// Result of one named query.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Rows(QueryResult),
    /// The query failed; rendered like an empty result.
    Failed(String),
}

pub struct ReportEntry {
    pub query: &'static DiagnosticQuery,
    pub outcome: QueryOutcome,
}

/// Ordered per-query outcomes of one catalog action.
pub struct DiagnosticReport {
    action: DiagnosticAction,
    entries: Vec<ReportEntry>,
}

impl DiagnosticReport {
    pub fn new(action: DiagnosticAction) -> Self {
        Self {
            action,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, query: &'static DiagnosticQuery, outcome: QueryOutcome) {
        self.entries.push(ReportEntry { query, outcome });
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// `(query name, error)` of every query that failed.
    pub fn failures(&self) -> Vec<(&'static str, &str)> {
        self.entries
            .iter()
            .filter_map(|e| match &e.outcome {
                QueryOutcome::Failed(error) => Some((e.query.name, error.as_str())),
                QueryOutcome::Rows(_) => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut writer = ReportWriter::new(catalog::title(self.action));
        for entry in &self.entries {
            render_section(&mut writer, entry.query, &entry.outcome);
        }
        writer.finish()
    }
}

/// Line-oriented text builder shared by every report.
pub struct ReportWriter {
    out: String,
    sections: usize,
}

impl ReportWriter {
    pub fn new(title: &str) -> Self {
        Self {
            out: format!("{}\n\n", title),
            sections: 0,
        }
    }

    /// `=== HEADER ===`, separated from the previous section by a blank line.
    pub fn section(&mut self, header: &str) {
        if self.sections > 0 {
            self.out.push('\n');
        }
        self.sections += 1;
        self.out.push_str(&format!("=== {} ===\n", header));
    }

    /// A line preceded by a blank line.
    pub fn heading(&mut self, text: &str) {
        self.out.push_str(&format!("\n{}\n", text));
    }

    pub fn field(&mut self, label: &str, value: &str) {
        self.out.push_str(&format!("• {}: {}\n", label, value));
    }

    pub fn warning(&mut self, message: &str) {
        self.out.push_str(&format!("⚠️ Warning: {}\n", message));
    }

    pub fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn finish(self) -> String {
        self.out
    }
}

fn render_section(w: &mut ReportWriter, query: &DiagnosticQuery, outcome: &QueryOutcome) {
    let section = &query.section;
    w.section(section.header);

    let result = match outcome {
        QueryOutcome::Rows(result) if !result.is_empty() => result,
        _ => {
            w.line(section.empty);
            return;
        }
    };

    match &section.layout {
        Layout::Items {
            label,
            fields,
            checks,
        } => {
            for (idx, record) in result.records().enumerate() {
                w.heading(&format!("{} #{}:", label, idx + 1));
                render_record(w, &record, fields, checks);
            }
        }
        Layout::Keyed {
            label,
            column,
            fields,
            checks,
        } => {
            for record in result.records() {
                w.heading(&format!("{}: {}", label, record.get(column)));
                render_record(w, &record, fields, checks);
            }
        }
        Layout::Single { fields, checks } => {
            if let Some(record) = result.first() {
                render_record(w, &record, fields, checks);
            }
        }
        Layout::Listing { keys, value } => {
            for record in result.records() {
                let key = keys
                    .iter()
                    .map(|k| record.get(k).to_string())
                    .collect::<Vec<_>>()
                    .join(".");
                w.field(&key, &record.get(value).to_string());
            }
        }
        Layout::Grouped {
            group_label,
            column,
            label,
            fields,
            checks,
        } => {
            let mut groups: Vec<(String, Vec<Record<'_>>)> = Vec::new();
            for record in result.records() {
                let key = record.get(column).to_string();
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(record),
                    None => groups.push((key, vec![record])),
                }
            }
            for (key, members) in &groups {
                w.heading(&format!("{}: {}", group_label, key));
                for (idx, record) in members.iter().enumerate() {
                    w.line(&format!("{} #{}:", label, idx + 1));
                    render_record(w, record, fields, checks);
                }
            }
        }
    }

    if let Some(recommendation) = section.recommendation {
        w.heading(&format!("Recommendation: {}", recommendation));
    }
}

fn render_record(w: &mut ReportWriter, record: &Record<'_>, fields: &[Field], checks: &[Check]) {
    for field in fields {
        w.field(field.label, &render_value(record, &field.render));
    }
    for check in checks {
        if (check.when)(record) {
            w.warning(check.message);
        }
    }
}

fn render_value(record: &Record<'_>, render: &Render) -> String {
    match *render {
        Render::Column(column) => record.get(column).to_string(),
        Render::Suffixed(column, suffix) => {
            let value = record.get(column);
            if value.is_null() {
                value.to_string()
            } else {
                format!("{}{}", value, suffix)
            }
        }
        Render::Fixed(column, suffix) => match record.f64(column) {
            Some(v) => format!("{:.2}{}", v, suffix),
            None => record.get(column).to_string(),
        },
        Render::OrNever(column) => {
            let value = record.get(column);
            if value.is_null() {
                "Never".to_string()
            } else {
                value.to_string()
            }
        }
        Render::Bytes(column) => match record.f64(column) {
            Some(v) if v.abs() < 1024.0 => format_bytes(v),
            Some(v) => format!("{:.0} bytes ({})", v, format_bytes(v)),
            None => record.get(column).to_string(),
        },
        Render::HitRatio { hits, reads } => {
            let hit: f64 = hits.iter().map(|c| catalog::num(record, c)).sum();
            let read: f64 = reads.iter().map(|c| catalog::num(record, c)).sum();
            format!("{:.2}%", percentage(hit, hit + read))
        }
        Render::WithPercent(column, pct) => {
            format!("{} ({}%)", record.get(column), record.get(pct))
        }
        Render::Joined(columns, separator) => columns
            .iter()
            .map(|c| record.get(c).to_string())
            .collect::<Vec<_>>()
            .join(separator),
        Render::Truncated(column, max_chars) => {
            truncate_chars(&record.get(column).to_string(), max_chars)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::rows;
    use common::models::ScalarValue;

    fn text(s: &str) -> ScalarValue {
        ScalarValue::Text(s.to_string())
    }

    /// Report with every query of `action` answered by `answer`, or empty.
    fn report_with(
        action: DiagnosticAction,
        mut answer: impl FnMut(&str) -> Option<QueryOutcome>,
    ) -> DiagnosticReport {
        let mut report = DiagnosticReport::new(action);
        for query in catalog::queries(action).unwrap() {
            let outcome =
                answer(query.name).unwrap_or_else(|| QueryOutcome::Rows(QueryResult::empty()));
            report.push(query, outcome);
        }
        report
    }

    fn database_statistics(deadlocks: i64, blks_read: i64, blks_hit: i64) -> QueryOutcome {
        QueryOutcome::Rows(rows(
            &[
                ("datname", "NAME"),
                ("blks_read", "INT8"),
                ("blks_hit", "INT8"),
                ("conflicts", "INT8"),
                ("temp_files", "INT8"),
                ("temp_bytes", "INT8"),
                ("deadlocks", "INT8"),
            ],
            vec![vec![
                text("app"),
                ScalarValue::Int(blks_read),
                ScalarValue::Int(blks_hit),
                ScalarValue::Int(0),
                ScalarValue::Int(5),
                ScalarValue::Int(150_000_000),
                ScalarValue::Int(deadlocks),
            ]],
        ))
    }

    #[test]
    fn test_empty_report_uses_fallback_sentences() {
        let report = report_with(DiagnosticAction::VacuumProgress, |_| None);
        assert_eq!(
            report.render(),
            "Database Vacuum Progress Report\n\n=== CURRENT VACUUM PROGRESS ===\nNo active vacuum operations found.\n"
        );
    }

    #[test]
    fn test_sections_follow_query_order() {
        let report = report_with(DiagnosticAction::IndexAnalysis, |_| None);
        let rendered = report.render();
        let unused = rendered.find("=== UNUSED INDEXES ===").unwrap();
        let missing = rendered
            .find("=== POTENTIAL MISSING INDEXES (High Sequential Scans) ===")
            .unwrap();
        let efficiency = rendered.find("=== INDEX USAGE EFFICIENCY ===").unwrap();
        assert!(unused < missing && missing < efficiency);
        assert_eq!(rendered.matches("=== ").count(), 3);
        assert!(rendered.contains("No tables with significant sequential scans found."));
        assert!(!rendered.contains("Recommendation:"));
    }

    #[test]
    fn test_system_health_without_incidents_has_no_warnings() {
        let report = report_with(DiagnosticAction::SystemHealth, |name| {
            (name == "database_statistics").then(|| database_statistics(0, 0, 0))
        });
        let rendered = report.render();
        assert!(rendered.contains("\nDatabase: app\n"));
        assert!(rendered.contains("• Cache Hit Ratio: 0.00%\n"));
        assert!(rendered.contains("• Temporary Bytes Written: 150000000 bytes (143.05 MB)\n"));
        assert!(!rendered.contains("NaN"));
        assert!(!rendered.contains("Warning"));
    }

    #[test]
    fn test_system_health_warns_on_deadlocks_and_low_cache_hits() {
        let report = report_with(DiagnosticAction::SystemHealth, |name| {
            (name == "database_statistics").then(|| database_statistics(2, 50, 50))
        });
        let rendered = report.render();
        assert!(rendered.contains("• Cache Hit Ratio: 50.00%\n"));
        assert!(rendered.contains(
            "⚠️ Warning: Low cache hit ratio. Consider increasing shared_buffers.\n⚠️ Warning: Deadlocks detected!\n"
        ));
        assert!(!rendered.contains("Conflicts detected!"));
        assert!(!rendered.contains("High number of temporary files created!"));
    }

    #[test]
    fn test_failed_query_renders_like_empty_result() {
        let report = report_with(DiagnosticAction::ReplicationAnalysis, |name| {
            (name == "aurora_replica_status").then(|| {
                QueryOutcome::Failed("function aurora_replica_status() does not exist".into())
            })
        });
        assert_eq!(
            report.failures(),
            vec![(
                "aurora_replica_status",
                "function aurora_replica_status() does not exist"
            )]
        );
        let rendered = report.render();
        assert!(rendered.contains(
            "=== AURORA REPLICA STATUS ===\nNo Aurora replica status information available.\n"
        ));
        assert!(!rendered.contains("does not exist"));
    }

    #[test]
    fn test_lock_contention_groups_by_relation() {
        let locks = rows(
            &[
                ("locktype", "TEXT"),
                ("relation", "TEXT"),
                ("mode", "TEXT"),
                ("pid", "INT4"),
                ("granted", "BOOL"),
            ],
            vec![
                vec![text("relation"), text("orders"), text("AccessShareLock"), ScalarValue::Int(10), ScalarValue::Bool(true)],
                vec![text("relation"), text("users"), text("RowExclusiveLock"), ScalarValue::Int(11), ScalarValue::Bool(true)],
                vec![text("relation"), text("orders"), text("ExclusiveLock"), ScalarValue::Int(12), ScalarValue::Bool(false)],
            ],
        );
        let report = report_with(DiagnosticAction::SystemHealth, |name| {
            (name == "lock_contention").then(|| QueryOutcome::Rows(locks.clone()))
        });
        let rendered = report.render();
        assert!(rendered.contains("\nRelation: orders\nLock #1:\n• Type: relation\n"));
        assert!(rendered.contains("Lock #2:\n• Type: relation\n• Mode: ExclusiveLock\n"));
        assert!(rendered.contains("\nRelation: users\nLock #1:\n"));
        assert_eq!(rendered.matches("Lock waiting to be granted!").count(), 1);
        assert!(rendered.find("Relation: orders").unwrap() < rendered.find("Relation: users").unwrap());
    }

    #[test]
    fn test_xid_listing_and_wraparound_warning() {
        let report = report_with(DiagnosticAction::XidAnalysis, |name| match name {
            "percent_towards_wraparound" => Some(QueryOutcome::Rows(rows(
                &[
                    ("oldest_current_xid", "INT4"),
                    ("percent_towards_wraparound", "FLOAT8"),
                    ("percent_towards_emergency_autovac", "FLOAT8"),
                ],
                vec![vec![ScalarValue::Int(1_700_000_000), ScalarValue::Float(79.0), ScalarValue::Float(850.0)]],
            ))),
            "tables_with_oldest_relfrozenxid" => Some(QueryOutcome::Rows(rows(
                &[("schema_name", "NAME"), ("table_name", "NAME"), ("xid_age", "INT4")],
                vec![vec![text("public"), text("events"), ScalarValue::Int(1_650_000_000)]],
            ))),
            _ => None,
        });
        let rendered = report.render();
        assert!(rendered.contains("• Percent Towards Wraparound: 79%\n"));
        assert!(rendered.contains("⚠️ Warning: Database is approaching transaction wraparound limit!\n"));
        assert!(rendered.contains("• public.events: 1650000000\n"));
    }

    #[test]
    fn test_index_recommendation_follows_items() {
        let report = report_with(DiagnosticAction::IndexAnalysis, |name| {
            (name == "unused_indexes").then(|| {
                QueryOutcome::Rows(rows(
                    &[
                        ("schemaname", "NAME"),
                        ("table_name", "NAME"),
                        ("index_name", "NAME"),
                        ("idx_scan", "INT8"),
                        ("index_size", "TEXT"),
                    ],
                    vec![vec![text("public"), text("orders"), text("orders_note_idx"), ScalarValue::Int(0), text("16 kB")]],
                ))
            })
        });
        let rendered = report.render();
        assert!(rendered.contains(
            "=== UNUSED INDEXES ===\n\nUnused Index #1:\n• Schema: public\n• Table: orders\n• Index: orders_note_idx\n• Scan Count: 0\n• Index Size: 16 kB\n\nRecommendation: Consider removing"
        ));
    }

    #[test]
    fn test_long_running_transaction_fields() {
        let report = report_with(DiagnosticAction::LongRunningTransactions, |_| {
            Some(QueryOutcome::Rows(rows(
                &[
                    ("pid", "INT4"),
                    ("xact_age_hours", "NUMERIC"),
                    ("wait_event_type", "TEXT"),
                    ("wait_event", "TEXT"),
                    ("query", "TEXT"),
                ],
                vec![vec![
                    ScalarValue::Int(42),
                    ScalarValue::Float(2.5),
                    text("Lock"),
                    text("transactionid"),
                    text(&"x".repeat(120)),
                ]],
            )))
        });
        let rendered = report.render();
        assert!(rendered.contains("\nLong-Running Transaction #1:\n• PID: 42\n"));
        assert!(rendered.contains("• Transaction Age: 2.50 hours\n"));
        assert!(rendered.contains("• Query Age: N/A\n"));
        assert!(rendered.contains("• Wait Event: Lock.transactionid\n"));
        assert!(rendered.contains(&format!("• Query: {}...\n", "x".repeat(100))));
    }

    #[test]
    fn test_render_is_deterministic() {
        let report = report_with(DiagnosticAction::SystemHealth, |name| {
            (name == "database_statistics").then(|| database_statistics(2, 10, 990))
        });
        assert_eq!(report.render(), report.render());
    }

    fn one_row(values: &[(&str, ScalarValue)]) -> QueryOutcome {
        let columns: Vec<(&str, &str)> = values.iter().map(|(name, _)| (*name, "TEXT")).collect();
        QueryOutcome::Rows(rows(
            &columns,
            vec![values.iter().map(|(_, v)| v.clone()).collect()],
        ))
    }

    /// Whether answering `query` with one row of `values` raises `message`.
    fn warns(
        action: DiagnosticAction,
        query: &str,
        values: &[(&str, ScalarValue)],
        message: &str,
    ) -> bool {
        assert!(catalog::queries(action).unwrap().iter().any(|q| q.name == query));
        let report = report_with(action, |name| (name == query).then(|| one_row(values)));
        report.render().contains(&format!("⚠️ Warning: {}\n", message))
    }

    #[test]
    fn test_replica_lag_threshold() {
        let lag = |seconds: f64| {
            warns(
                DiagnosticAction::ReplicationAnalysis,
                "aurora_replica_status",
                &[("server_id", text("replica-1")), ("lag_seconds", ScalarValue::Float(seconds))],
                "High replication lag detected!",
            )
        };
        assert!(!lag(30.0));
        assert!(lag(30.01));
    }

    #[test]
    fn test_temp_files_threshold() {
        let temp_files = |count: i64| {
            warns(
                DiagnosticAction::SystemHealth,
                "database_statistics",
                &[("datname", text("app")), ("temp_files", ScalarValue::Int(count))],
                "High number of temporary files created!",
            )
        };
        assert!(!temp_files(1000));
        assert!(temp_files(1001));
    }

    #[test]
    fn test_replication_byte_lag_threshold() {
        let lag = |bytes: i64| {
            warns(
                DiagnosticAction::ReplicationAnalysis,
                "replication_connections",
                &[("client_addr", text("10.0.0.7")), ("lag_bytes", ScalarValue::Int(bytes))],
                "Large replication lag detected!",
            )
        };
        assert!(!lag(100_000_000));
        assert!(lag(100_000_001));
    }

    #[test]
    fn test_inactive_slot_warning() {
        for (action, query) in [
            (DiagnosticAction::ReplicationAnalysis, "replication_slots"),
            (DiagnosticAction::AutovacuumAnalysis, "inactive_replication_slots"),
        ] {
            let slot = |active: bool| {
                warns(
                    action,
                    query,
                    &[("slot_name", text("standby_1")), ("active", ScalarValue::Bool(active))],
                    "Inactive replication slot detected!",
                )
            };
            assert!(slot(false), "{}", query);
            assert!(!slot(true), "{}", query);
        }
    }

    #[test]
    fn test_dead_tuple_threshold() {
        let dead = |pct: f64| {
            warns(
                DiagnosticAction::AutovacuumAnalysis,
                "tables_high_dead_tuple_ratio",
                &[("relname", text("orders")), ("dead_tuple_percentage", ScalarValue::Float(pct))],
                "High dead tuple percentage. Consider running VACUUM.",
            )
        };
        assert!(!dead(20.0));
        assert!(dead(20.5));
    }

    #[test]
    fn test_requested_checkpoints_warning() {
        let checkpoints = |requested: i64, timed: i64| {
            warns(
                DiagnosticAction::IoAnalysis,
                "checkpoint_activity",
                &[
                    ("checkpoints_timed", ScalarValue::Int(timed)),
                    ("checkpoints_req", ScalarValue::Int(requested)),
                ],
                "High number of requested checkpoints. Consider increasing checkpoint_timeout or max_wal_size.",
            )
        };
        assert!(!checkpoints(40, 40));
        assert!(checkpoints(41, 40));
    }

    #[test]
    fn test_transaction_age_threshold() {
        let age = |seconds: f64| {
            warns(
                DiagnosticAction::SystemHealth,
                "long_running_transactions",
                &[("pid", ScalarValue::Int(4242)), ("xact_age_seconds", ScalarValue::Float(seconds))],
                "Transaction running for an extended period!",
            )
        };
        assert!(!age(3599.0));
        assert!(age(3600.0));
    }
}
